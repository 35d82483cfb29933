//! Hidden `opfuzz worker`: one isolated execution per process.
//!
//! Reads a request from stdin and writes the response to stdout. A worker
//! that aborts or hangs is observed and killed by the parent.

use anyhow::{Context, Result};
use clap::Args;
use opfuzz_backends::{create_backend, serve};

#[derive(Debug, Args)]
pub struct WorkerCommandArgs {
    /// Backend to execute with
    #[arg(long, value_name = "NAME")]
    pub backend: String,
}

impl WorkerCommandArgs {
    pub fn execute(self) -> Result<()> {
        let backend = create_backend(&self.backend)?;
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        serve(backend.as_ref(), stdin.lock(), stdout.lock()).context("worker pipe failed")
    }
}
