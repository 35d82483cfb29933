//! Per-backend execution outcomes.

use opfuzz_backends::ExecutionError;
use opfuzz_common::{TensorData, TensorSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    /// The backend raised, panicked, or its worker died.
    Crash,
    Timeout,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Ok => "ok",
            RunStatus::Crash => "crash",
            RunStatus::Timeout => "timeout",
        })
    }
}

/// What an isolated execution produced, before it is labelled.
#[derive(Debug)]
pub enum Execution {
    Finished(Result<Vec<TensorData>, ExecutionError>),
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub backend: String,
    pub graph_id: String,
    pub status: RunStatus,
    /// Output tensors; empty unless `status` is `Ok`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<TensorData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    pub elapsed_ms: u64,
}

impl RunOutcome {
    pub fn new(backend: &str, graph_id: &str, execution: Execution, elapsed: Duration) -> Self {
        let (status, outputs, error) = match execution {
            Execution::Finished(Ok(outputs)) => (RunStatus::Ok, outputs, None),
            Execution::Finished(Err(err)) => (RunStatus::Crash, Vec::new(), Some(err)),
            Execution::TimedOut => (RunStatus::Timeout, Vec::new(), None),
        };
        Self {
            backend: backend.to_string(),
            graph_id: graph_id.to_string(),
            status,
            outputs,
            error,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RunStatus::Ok
    }

    pub fn has_nan(&self) -> bool {
        self.outputs.iter().any(TensorData::has_nan)
    }

    pub fn has_inf(&self) -> bool {
        self.outputs.iter().any(TensorData::has_inf)
    }

    pub fn summaries(&self) -> Vec<OutputSummary> {
        self.outputs.iter().map(OutputSummary::of).collect()
    }

    /// One line for logs and the console.
    pub fn describe(&self) -> String {
        match (&self.status, &self.error) {
            (RunStatus::Crash, Some(err)) => format!("{}: crash ({err})", self.backend),
            (status, _) => format!("{}: {status} in {}ms", self.backend, self.elapsed_ms),
        }
    }
}

/// Digest of one output tensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSummary {
    pub spec: TensorSpec,
    pub nan: usize,
    pub inf: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl OutputSummary {
    pub fn of(tensor: &TensorData) -> Self {
        let finite = tensor.values.iter().copied().filter(|v| v.is_finite());
        let (min, max) = finite.fold((None, None), |(lo, hi): (Option<f64>, Option<f64>), v| {
            (Some(lo.map_or(v, |m| m.min(v))), Some(hi.map_or(v, |m| m.max(v))))
        });
        Self {
            spec: tensor.spec.clone(),
            nan: tensor.values.iter().filter(|v| v.is_nan()).count(),
            inf: tensor.values.iter().filter(|v| v.is_infinite()).count(),
            min,
            max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opfuzz_common::DType;

    #[test]
    fn labels_executions() {
        let ok = RunOutcome::new("a", "g", Execution::Finished(Ok(vec![])), Duration::from_millis(3));
        assert_eq!(ok.status, RunStatus::Ok);
        let crash =
            RunOutcome::new("a", "g", Execution::Finished(Err(ExecutionError::rejected("x"))), Duration::ZERO);
        assert_eq!(crash.status, RunStatus::Crash);
        assert!(crash.describe().contains("rejected: x"));
        let hung = RunOutcome::new("a", "g", Execution::TimedOut, Duration::from_secs(1));
        assert_eq!(hung.status, RunStatus::Timeout);
        assert_eq!(hung.elapsed_ms, 1000);
    }

    #[test]
    fn summary_counts_non_finite() {
        let spec = TensorSpec::new(vec![4], DType::Float64);
        let tensor = TensorData::new(spec, vec![1.0, f64::NAN, -2.0, f64::INFINITY]).unwrap();
        let summary = OutputSummary::of(&tensor);
        assert_eq!((summary.nan, summary.inf), (1, 1));
        assert_eq!((summary.min, summary.max), (Some(-2.0), Some(1.0)));
    }

    #[test]
    fn ok_outcome_json_omits_error() {
        let ok = RunOutcome::new("reference", "abc", Execution::Finished(Ok(vec![])), Duration::ZERO);
        let json = serde_json::to_string(&ok).unwrap();
        assert!(!json.contains("error"), "{json}");
        assert!(json.contains("\"status\":\"ok\""));
    }
}
