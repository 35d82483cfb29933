//! Differential execution of one graph across every configured backend.

use crate::compare::{Mismatch, Tolerance, check_declared, compare_outputs};
use crate::isolation::{Isolation, Limits, WorkerCommand, execute_isolated};
use crate::outcome::{Execution, RunOutcome, RunStatus};
use opfuzz_backends::{Backend, ExecutionError, create_backend};
use opfuzz_common::{ConfigError, FuzzConfig, TensorData};
use opfuzz_graph::{Fingerprint, Graph};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info};

/// Name used in a [`Divergence`] when a backend disagrees with the graph's
/// own declared output specs.
pub const DECLARED: &str = "declared";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Divergence {
    pub backend: String,
    /// The backend it was compared against, or [`DECLARED`].
    pub against: String,
    pub mismatch: Mismatch,
}

/// Everything one differential run observed.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub graph_id: String,
    /// One outcome per backend, in configured order.
    pub outcomes: Vec<RunOutcome>,
    pub divergences: Vec<Divergence>,
}

impl RunReport {
    pub fn by_backend(&self) -> BTreeMap<&str, &RunOutcome> {
        self.outcomes.iter().map(|o| (o.backend.as_str(), o)).collect()
    }

    pub fn with_status(&self, status: RunStatus) -> impl Iterator<Item = &RunOutcome> {
        self.outcomes.iter().filter(move |o| o.status == status)
    }

    pub fn any_nan(&self) -> bool {
        self.outcomes.iter().any(RunOutcome::has_nan)
    }

    pub fn any_inf(&self) -> bool {
        self.outcomes.iter().any(RunOutcome::has_inf)
    }

    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(RunOutcome::is_ok)
    }
}

pub struct DifferentialRunner {
    backends: Vec<Arc<dyn Backend>>,
    isolation: Isolation,
    limits: Limits,
    tolerance: Tolerance,
}

impl DifferentialRunner {
    pub fn new(backends: Vec<Arc<dyn Backend>>, isolation: Isolation, limits: Limits, tolerance: Tolerance) -> Self {
        Self { backends, isolation, limits, tolerance }
    }

    /// Build from `[backend]` and `[compare]`. Process isolation needs the
    /// command that starts a worker.
    pub fn from_config(config: &FuzzConfig, worker: Option<WorkerCommand>) -> Result<Self, ConfigError> {
        let backends = config
            .backend
            .targets
            .iter()
            .map(|name| create_backend(name).map(Arc::from))
            .collect::<Result<Vec<Arc<dyn Backend>>, _>>()?;
        let isolation = Isolation::from_mode(config.backend.isolation, worker)?;
        Ok(Self::new(backends, isolation, Limits::from(&config.backend), Tolerance::from(&config.compare)))
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn isolation(&self) -> &Isolation {
        &self.isolation
    }

    /// Execute on every backend concurrently, then compare.
    pub fn run(&self, graph: &Graph, inputs: &[TensorData]) -> RunReport {
        let graph_id = Fingerprint::of(graph).short().to_string();
        let outcomes = thread::scope(|scope| {
            let handles: Vec<_> = self
                .backends
                .iter()
                .map(|backend| {
                    let graph_id = graph_id.as_str();
                    scope.spawn(move || {
                        let started = Instant::now();
                        let execution = execute_isolated(backend, &self.isolation, graph, inputs, self.limits);
                        RunOutcome::new(backend.name(), graph_id, execution, started.elapsed())
                    })
                })
                .collect();
            handles
                .into_iter()
                .zip(&self.backends)
                .map(|(handle, backend)| {
                    handle.join().unwrap_or_else(|payload| {
                        let execution = Execution::Finished(Err(ExecutionError::from_panic(payload)));
                        RunOutcome::new(backend.name(), &graph_id, execution, Default::default())
                    })
                })
                .collect::<Vec<_>>()
        });
        for outcome in &outcomes {
            debug!(graph_id = %graph_id, backend = %outcome.backend, status = %outcome.status, elapsed_ms = outcome.elapsed_ms, "executed");
        }
        let divergences = self.compare(graph, &outcomes);
        for d in &divergences {
            info!(graph_id = %graph_id, backend = %d.backend, against = %d.against, "divergence: {}", d.mismatch);
        }
        RunReport { graph_id, outcomes, divergences }
    }

    fn compare(&self, graph: &Graph, outcomes: &[RunOutcome]) -> Vec<Divergence> {
        let declared = graph.output_specs();
        let mut divergences = Vec::new();
        let ok: Vec<&RunOutcome> = outcomes.iter().filter(|o| o.is_ok()).collect();
        for outcome in &ok {
            if let Some(mismatch) = check_declared(&declared, &outcome.outputs) {
                divergences.push(Divergence {
                    backend: outcome.backend.clone(),
                    against: DECLARED.to_string(),
                    mismatch,
                });
            }
        }
        if let Some((reference, rest)) = ok.split_first() {
            for outcome in rest {
                if let Some(mismatch) = compare_outputs(&reference.outputs, &outcome.outputs, self.tolerance) {
                    divergences.push(Divergence {
                        backend: outcome.backend.clone(),
                        against: reference.backend.clone(),
                        mismatch,
                    });
                }
            }
        }
        divergences
    }
}
