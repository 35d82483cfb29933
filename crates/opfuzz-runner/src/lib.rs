//! Differential execution.
//!
//! [`DifferentialRunner::run`] executes a graph on every configured backend,
//! each inside an isolation boundary with a timeout, and compares the
//! outputs against the first successful backend and against the graph's
//! declared output specs.

pub mod compare;
pub mod isolation;
pub mod outcome;
pub mod runner;

pub use compare::{Mismatch, Tolerance, check_declared, compare_outputs};
pub use isolation::{Isolation, Limits, WorkerCommand, execute_isolated};
pub use outcome::{Execution, OutputSummary, RunOutcome, RunStatus};
pub use runner::{DECLARED, DifferentialRunner, Divergence, RunReport};
