//! `opfuzz config show|check`.

use anyhow::{Context, Result};
use clap::Subcommand;
use console::style;
use opfuzz_backends::check_backends;
use opfuzz_campaign::{ResultFilter, base_registry};
use opfuzz_common::FuzzConfig;

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Validate the configuration, backend names, opset and filter patch
    Check,
}

impl ConfigAction {
    pub fn execute(self, config: FuzzConfig) -> Result<()> {
        match self {
            ConfigAction::Show => {
                let text = config.to_toml_string().context("failed to serialize configuration")?;
                print!("{text}");
            }
            ConfigAction::Check => {
                let config = crate::settings::validated(config)?;
                check_backends(&config.backend.targets)?;
                if let Some(backend) = &config.inference.backend {
                    check_backends(std::slice::from_ref(backend))?;
                }
                let registry = base_registry(&config)?;
                let filter = ResultFilter::from_config(&config.filter)?;
                println!("{} configuration is valid", style("ok").green().bold());
                println!("  backends:  {}", config.backend.targets.join(", "));
                println!("  operators: {}", registry.names().collect::<Vec<_>>().join(", "));
                println!("  patches:   {}", filter.patches().len());
            }
        }
        Ok(())
    }
}
