//! `opfuzz infer`: learn validity rules and write a rule file.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use opfuzz_campaign::{base_registry, infer_rules};
use opfuzz_common::FuzzConfig;
use opfuzz_infer::InferenceReport;
use std::path::PathBuf;
use tracing::info;

/// Probe operators against a backend and save the learned rules
#[derive(Debug, Args)]
pub struct InferCommand {
    /// Rule file to write (default: `inference.rules_path`, else rules.json)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Backend to probe, overriding `inference.backend`
    #[arg(long, value_name = "NAME")]
    pub backend: Option<String>,

    /// Probe budget per operator
    #[arg(long, value_name = "N")]
    pub budget: Option<usize>,

    /// Comma-separated operators to infer, overriding `model.opset`
    #[arg(long, value_name = "OPS")]
    pub opset: Option<String>,

    /// Seed for randomized probes
    #[arg(long)]
    pub seed: Option<u64>,
}

impl InferCommand {
    pub fn execute(self, mut config: FuzzConfig) -> Result<()> {
        if let Some(backend) = self.backend {
            config.inference.backend = Some(backend);
        }
        if let Some(budget) = self.budget {
            config.inference.probe_budget = budget;
        }
        if let Some(opset) = &self.opset {
            config.model.opset = Some(super::split_list(opset));
        }
        if let Some(seed) = self.seed {
            config.campaign.seed = Some(seed);
        }
        let output = self
            .output
            .or_else(|| config.inference.rules_path.clone())
            .unwrap_or_else(|| PathBuf::from("rules.json"));
        let config = crate::settings::validated(config)?;

        let mut registry = base_registry(&config)?;
        info!(target: "opfuzz::infer", operators = registry.len(), output = %output.display(), "starting inference");
        let (rules, reports) = infer_rules(&config, &mut registry, Some(super::self_worker()?))?;
        rules.save(&output).with_context(|| format!("failed to save rules to {}", output.display()))?;

        print_summary(&rules.backend, &reports);
        println!("rules written to {}", output.display());
        Ok(())
    }
}

fn print_summary(backend: &str, reports: &[InferenceReport]) {
    println!("{} {}", style("inferred against").bold(), style(backend).cyan());
    println!("  {:<12} {:>6} {:>7} {:>8} {:>9}", "operator", "probes", "crashes", "cases", "converged");
    for report in reports {
        let converged = match report.converged {
            true => style(format!("{:>9}", "yes")).green(),
            false => style(format!("{:>9}", "no")).yellow(),
        };
        println!(
            "  {:<12} {:>6} {:>7} {:>8} {}",
            report.op,
            report.probes,
            report.crashes,
            format!("{}/{}", report.valid_cases, report.cases),
            converged,
        );
    }
    let probes: usize = reports.iter().map(|r| r.probes).sum();
    println!("  {} operators, {probes} probes", reports.len());
}
