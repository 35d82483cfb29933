//! opfuzz CLI application
//!
//! Generates operator graphs, runs them differentially across backends,
//! learns operator validity rules and drives long-running campaigns.

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use opfuzz_cli::commands::{ConfigAction, FuzzCommand, GenerateCommand, InferCommand, WorkerCommandArgs};
use opfuzz_cli::exit::{EXIT_SUCCESS, exit_code};
use opfuzz_cli::{logging, settings};
use opfuzz_common::LoggingConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

/// opfuzz - differential fuzzing for tensor-graph runtimes
#[derive(Parser)]
#[command(name = "opfuzz")]
#[command(about = "Differential fuzzing for tensor-graph runtimes")]
#[command(long_about = r#"
opfuzz builds random but valid operator graphs with a constraint solver,
executes them on several backends in isolated workers and reports crashes,
timeouts, NaN/Inf outputs and numeric divergences as deduplicated bug bundles.

Examples:
  # Generate one graph and run it on the configured backends
  opfuzz generate --seed 42 --execute

  # Learn operator rules against a backend
  opfuzz infer --backend reference --output rules.json

  # Run a ten-minute campaign, restarting it if it dies
  opfuzz fuzz --time-budget 10m --supervise

  # Validate a configuration file
  opfuzz --config opfuzz.toml config check
"#)]
#[command(version)]
struct Cli {
    /// Configuration file path (default: ./opfuzz.toml if present)
    #[arg(short, long, value_name = "PATH", global = true, env = "OPFUZZ_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long, value_name = "FORMAT", global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate one graph, optionally executing it
    #[command(alias = "gen")]
    Generate(GenerateCommand),

    /// Run a fuzzing campaign
    Fuzz(FuzzCommand),

    /// Learn operator validity rules against a backend
    Infer(InferCommand),

    /// Execute one request from stdin in an isolated worker
    #[command(hide = true)]
    Worker(WorkerCommandArgs),

    /// Inspect or validate the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Workers answer one request; their stderr is captured by the parent.
    let command = match cli.command {
        Some(Commands::Worker(args)) => {
            let quiet = LoggingConfig { level: "warn".to_string(), format: "compact".to_string() };
            logging::init(None, None, &quiet);
            return finish(args.execute());
        }
        other => other,
    };

    let loaded = settings::load(cli.config.as_deref());
    let defaults = LoggingConfig::default();
    let logging_config = loaded.as_ref().map(|c| &c.logging).unwrap_or(&defaults);
    logging::init(cli.log_level.as_deref(), cli.log_format.as_deref(), logging_config);

    let result = loaded.and_then(|mut config| {
        if let Some(level) = cli.log_level {
            config.logging.level = level;
        }
        if let Some(format) = cli.log_format {
            config.logging.format = format;
        }
        run(command, config)
    });
    finish(result)
}

fn run(command: Option<Commands>, config: opfuzz_common::FuzzConfig) -> Result<()> {
    match command {
        Some(Commands::Generate(cmd)) => cmd.execute(config),
        Some(Commands::Fuzz(cmd)) => cmd.execute(config),
        Some(Commands::Infer(cmd)) => cmd.execute(config),
        Some(Commands::Config { action }) => action.execute(config),
        Some(Commands::Worker(args)) => args.execute(),
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

fn finish(result: Result<()>) -> ExitCode {
    let Err(err) = result else {
        return ExitCode::from(EXIT_SUCCESS as u8);
    };
    error!("Command failed: {err}");
    for cause in err.chain().skip(1) {
        error!("  Caused by: {cause}");
    }
    ExitCode::from(exit_code(&err) as u8)
}
