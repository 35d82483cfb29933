//! Subcommand implementations.

pub mod config;
pub mod fuzz;
pub mod generate;
pub mod infer;
pub mod worker;

pub use config::ConfigAction;
pub use fuzz::FuzzCommand;
pub use generate::GenerateCommand;
pub use infer::InferCommand;
pub use worker::WorkerCommandArgs;

use anyhow::{Context, Result};
use opfuzz_runner::WorkerCommand;

/// Subprocess workers re-enter this binary through its hidden `worker`
/// subcommand.
pub(crate) fn self_worker() -> Result<WorkerCommand> {
    WorkerCommand::current_exe().context("failed to locate the opfuzz executable")
}

/// Split `relu,add` style lists, dropping empty items.
pub(crate) fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}
