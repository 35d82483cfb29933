//! Operator rule inference.
//!
//! [`RuleInferenceEngine::infer`] learns a [`ValidityPredicate`] for an
//! operator kind by probing a [`ProbeOracle`] with concrete instantiations
//! and synthesizing constraints that separate what executed from what did
//! not. Probes run inside the runner's isolation boundary, so a backend that
//! crashes on a probe only contributes a labelled data point.
//!
//! [`ValidityPredicate`]: opfuzz_ops::ValidityPredicate

pub mod engine;
pub mod error;
mod plan;
pub mod probe;
pub mod rules;
mod synth;

pub use engine::{InferenceReport, RuleInferenceEngine};
pub use error::{InferenceError, Result};
pub use probe::{BackendOracle, ProbeLabel, ProbeOracle, ProbeRecord, probe_graph};
pub use rules::{OperatorRules, RULE_FILE_VERSION, RuleFile};
