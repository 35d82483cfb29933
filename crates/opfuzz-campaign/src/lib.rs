//! Fuzzing campaigns.
//!
//! [`CampaignOrchestrator`] repeatedly builds a graph, runs it on every
//! backend through the [`DifferentialRunner`], classifies the result with a
//! [`ResultFilter`] and persists interesting cases as report [`Bundle`]s.
//! Its only durable state is the [`CampaignState`] file, which makes a
//! campaign resumable after the process dies.
//!
//! [`DifferentialRunner`]: opfuzz_runner::DifferentialRunner

pub mod bundle;
pub mod error;
pub mod filter;
pub mod orchestrator;
pub mod setup;
pub mod state;

pub use bundle::{BUGS_DIR, Bundle};
pub use error::{CampaignError, Result};
pub use filter::{BuiltinFilter, DEDUP, Disposition, Finding, PatchAction, PatchFilter, ResultFilter, Verdict};
pub use orchestrator::{CampaignOrchestrator, CampaignSummary, Phase, StopHandle, StopReason};
pub use setup::{base_registry, infer_rules, prepare_registry};
pub use state::{CampaignState, Counters, STATE_FILE, STATE_VERSION};
