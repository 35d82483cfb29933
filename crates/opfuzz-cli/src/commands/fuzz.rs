//! `opfuzz fuzz`: run a campaign, optionally under a restarting supervisor.

use anyhow::{Context, Result};
use clap::Args;
use opfuzz_campaign::CampaignOrchestrator;
use opfuzz_common::FuzzConfig;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Environment variables the supervisor pins its children's identity with.
pub const SEED_ENV: &str = "OPFUZZ_SEED";
pub const CAMPAIGN_ENV: &str = "OPFUZZ_CAMPAIGN";

/// Run a fuzzing campaign
#[derive(Debug, Args)]
pub struct FuzzCommand {
    /// Report root directory
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Campaign directory name under the root
    #[arg(long, value_name = "NAME", env = CAMPAIGN_ENV)]
    pub name: Option<String>,

    /// Wall-clock budget, e.g. `30s`, `10m`, `2h`
    #[arg(long, value_name = "DURATION")]
    pub time_budget: Option<String>,

    /// Stop once the campaign has run this many iterations in total
    #[arg(long, value_name = "N")]
    pub max_iterations: Option<u64>,

    /// Base seed; iteration i uses seed + i
    #[arg(long, env = SEED_ENV)]
    pub seed: Option<u64>,

    /// Continue an existing campaign from its state file
    #[arg(long)]
    pub resume: bool,

    /// Backend to test, replacing `backend.targets` (repeatable)
    #[arg(long = "backend", value_name = "NAME")]
    pub backends: Vec<String>,

    /// Learned rule file, overriding `inference.rules_path`
    #[arg(long, value_name = "PATH")]
    pub rules: Option<PathBuf>,

    /// Relaunch the campaign with --resume when its process dies
    #[arg(long)]
    pub supervise: bool,

    /// Relaunches allowed under --supervise
    #[arg(long, value_name = "N", default_value_t = 3, requires = "supervise")]
    pub max_restarts: u32,
}

/// Why a supervised campaign ended without success.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("campaign process rejected its configuration")]
    Config,

    #[error("campaign process failed {attempts} times; last exit: {last}")]
    RestartsExhausted { attempts: u32, last: String },
}

impl FuzzCommand {
    pub fn execute(self, config: FuzzConfig) -> Result<()> {
        let config = crate::settings::validated(self.apply(config))?;
        if self.supervise {
            return self.run_supervised(&config);
        }

        let mut campaign = CampaignOrchestrator::from_config(&config, Some(super::self_worker()?))?;
        let summary = campaign.run()?;
        println!("{summary}");
        Ok(())
    }

    fn apply(&self, mut config: FuzzConfig) -> FuzzConfig {
        let campaign = &mut config.campaign;
        if let Some(root) = &self.root {
            campaign.root = root.clone();
        }
        if let Some(name) = &self.name {
            campaign.name = Some(name.clone());
        }
        if let Some(budget) = &self.time_budget {
            campaign.time_budget = budget.clone();
        }
        if let Some(max) = self.max_iterations {
            campaign.max_iterations = Some(max);
        }
        if let Some(seed) = self.seed {
            campaign.seed = Some(seed);
        }
        campaign.resume |= self.resume;
        if !self.backends.is_empty() {
            config.backend.targets = self.backends.clone();
        }
        if let Some(rules) = &self.rules {
            config.inference.rules_path = Some(rules.clone());
        }
        config
    }

    /// Relaunch this command without `--supervise` until it exits cleanly.
    /// Seed and name are resolved once and pinned through the environment,
    /// so every relaunch resumes the same campaign directory.
    fn run_supervised(&self, config: &FuzzConfig) -> Result<()> {
        let seed = config.campaign.seed.unwrap_or_else(rand::random);
        let name = config.campaign.name.clone().unwrap_or_else(|| format!("campaign-{seed}"));
        let budget = config.campaign.time_budget()?;
        let exe = std::env::current_exe().context("failed to locate the opfuzz executable")?;
        let args: Vec<OsString> = std::env::args_os().skip(1).collect();
        let base = child_args(&args);

        let started = Instant::now();
        let mut resume = config.campaign.resume;
        let mut attempts = 0;
        loop {
            let remaining = budget.saturating_sub(started.elapsed());
            let mut command = Command::new(&exe);
            command
                .args(&base)
                .arg("--time-budget")
                .arg(format_budget(remaining))
                .env(SEED_ENV, seed.to_string())
                .env(CAMPAIGN_ENV, &name);
            if resume {
                command.arg("--resume");
            }
            info!(target: "opfuzz::fuzz", campaign = %name, seed, attempt = attempts + 1, resume, "launching campaign process");
            let status = command.status().context("failed to launch campaign process")?;

            match status.code() {
                Some(crate::exit::EXIT_SUCCESS) => return Ok(()),
                Some(crate::exit::EXIT_CONFIG) => return Err(SupervisorError::Config.into()),
                _ => {}
            }
            attempts += 1;
            if attempts > self.max_restarts {
                return Err(SupervisorError::RestartsExhausted { attempts, last: status.to_string() }.into());
            }
            if remaining.is_zero() {
                warn!(target: "opfuzz::fuzz", campaign = %name, %status, "campaign process failed with no time left");
                return Ok(());
            }
            warn!(target: "opfuzz::fuzz", campaign = %name, %status, restarts = attempts, "campaign process died; resuming");
            resume = true;
        }
    }
}

fn format_budget(remaining: Duration) -> String {
    format!("{}ms", remaining.as_millis())
}

/// The original arguments minus the options the supervisor owns.
pub fn child_args(args: &[OsString]) -> Vec<OsString> {
    const FLAGS: &[&str] = &["--supervise", "--resume"];
    const VALUED: &[&str] = &["--max-restarts", "--time-budget"];

    let mut out = Vec::with_capacity(args.len());
    let mut skip_value = false;
    for arg in args {
        if std::mem::take(&mut skip_value) {
            continue;
        }
        let text = arg.to_str().unwrap_or_default();
        if FLAGS.contains(&text) {
            continue;
        }
        if VALUED.contains(&text) {
            skip_value = true;
            continue;
        }
        if VALUED.iter().any(|flag| text.strip_prefix(flag).is_some_and(|rest| rest.starts_with('='))) {
            continue;
        }
        out.push(arg.clone());
    }
    out
}
