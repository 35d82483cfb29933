//! A backend with injectable faults.
//!
//! Wraps the reference interpreter and misbehaves on request, so the runner,
//! filters and campaign loop can be exercised against every failure class
//! without a real buggy runtime. Selected with `faulty:<mode>` or
//! `faulty:<mode>:<op>`; with an op name the fault only fires on graphs
//! containing that operator.

use crate::backend::Backend;
use crate::error::ExecutionError;
use crate::reference::ReferenceBackend;
use opfuzz_common::{ConfigError, TensorData};
use opfuzz_graph::Graph;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
    /// Add 1.0 to the first element of the first output.
    Perturb,
    /// Refuse the graph.
    Reject,
    Panic,
    /// Never return.
    Hang,
    /// Replace the first output element with NaN.
    Nan,
    /// Replace the first output element with +inf.
    Inf,
    /// Abort the process. Under thread isolation this takes the host down
    /// with it, so pair it with process isolation.
    Abort,
}

impl FaultMode {
    pub const NAMES: &'static [&'static str] = &["perturb", "reject", "panic", "hang", "nan", "inf", "abort"];

    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "perturb" => FaultMode::Perturb,
            "reject" => FaultMode::Reject,
            "panic" => FaultMode::Panic,
            "hang" => FaultMode::Hang,
            "nan" => FaultMode::Nan,
            "inf" => FaultMode::Inf,
            "abort" => FaultMode::Abort,
            _ => return None,
        })
    }
}

impl fmt::Display for FaultMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultMode::Perturb => "perturb",
            FaultMode::Reject => "reject",
            FaultMode::Panic => "panic",
            FaultMode::Hang => "hang",
            FaultMode::Nan => "nan",
            FaultMode::Inf => "inf",
            FaultMode::Abort => "abort",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct FaultyBackend {
    name: String,
    mode: FaultMode,
    trigger: Option<String>,
    inner: ReferenceBackend,
}

impl FaultyBackend {
    pub fn new(mode: FaultMode, trigger: Option<String>) -> Self {
        let name = match &trigger {
            Some(op) => format!("faulty:{mode}:{op}"),
            None => format!("faulty:{mode}"),
        };
        Self { name, mode, trigger, inner: ReferenceBackend::f64() }
    }

    /// Parse the part after `faulty:`.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let (mode, trigger) = match spec.split_once(':') {
            Some((mode, op)) if !op.is_empty() => (mode, Some(op.to_string())),
            _ => (spec, None),
        };
        let mode = FaultMode::parse(mode).ok_or_else(|| ConfigError::unknown("fault mode", mode, FaultMode::NAMES))?;
        Ok(Self::new(mode, trigger))
    }

    fn fires_on(&self, graph: &Graph) -> bool {
        self.trigger.as_deref().is_none_or(|op| graph.op_sequence().contains(&op))
    }
}

impl Backend for FaultyBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, graph: &Graph, inputs: &[TensorData]) -> Result<Vec<TensorData>, ExecutionError> {
        if !self.fires_on(graph) {
            return self.inner.execute(graph, inputs);
        }
        match self.mode {
            FaultMode::Reject => Err(ExecutionError::rejected("injected fault")),
            FaultMode::Panic => panic!("injected fault in {}", self.name),
            FaultMode::Hang => loop {
                std::thread::sleep(Duration::from_secs(3600));
            },
            FaultMode::Abort => std::process::abort(),
            FaultMode::Perturb | FaultMode::Nan | FaultMode::Inf => {
                let mut outputs = self.inner.execute(graph, inputs)?;
                if let Some(first) = outputs.first_mut().and_then(|t| t.values.first_mut()) {
                    *first = match self.mode {
                        FaultMode::Nan => f64::NAN,
                        FaultMode::Inf => f64::INFINITY,
                        _ => *first + 1.0,
                    };
                }
                Ok(outputs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::materialize;
    use opfuzz_common::{DType, TensorSpec};
    use opfuzz_graph::{GRAPH_FORMAT_VERSION, GraphNode, NodeKind, TensorRef};

    fn abs_graph() -> Graph {
        let spec = TensorSpec::new(vec![2], DType::Float64);
        Graph {
            version: GRAPH_FORMAT_VERSION,
            seed: 4,
            nodes: vec![
                GraphNode { id: 0, kind: NodeKind::Input, inputs: vec![], outputs: vec![spec.clone()] },
                GraphNode {
                    id: 1,
                    kind: NodeKind::Op { op: "abs".to_string(), attrs: vec![] },
                    inputs: vec![TensorRef::new(0, 0)],
                    outputs: vec![spec],
                },
            ],
            inputs: vec![0],
            outputs: vec![TensorRef::new(1, 0)],
        }
    }

    #[test]
    fn parse_modes_and_triggers() {
        assert_eq!(FaultyBackend::parse("perturb").unwrap().name(), "faulty:perturb");
        assert_eq!(FaultyBackend::parse("reject:matmul").unwrap().name(), "faulty:reject:matmul");
        assert!(FaultyBackend::parse("explode").is_err());
        for name in FaultMode::NAMES {
            assert_eq!(FaultMode::parse(name).map(|m| m.to_string()).as_deref(), Some(*name));
        }
    }

    #[test]
    fn inf_replaces_first_element() {
        let graph = abs_graph();
        let feeds = materialize(&graph);
        let out = FaultyBackend::new(FaultMode::Inf, None).execute(&graph, &feeds).unwrap();
        assert_eq!(out[0].values[0], f64::INFINITY);
        assert!(out[0].values[1].is_finite());
    }

    #[test]
    fn perturb_shifts_first_element() {
        let graph = abs_graph();
        let feeds = materialize(&graph);
        let clean = ReferenceBackend::f64().execute(&graph, &feeds).unwrap();
        let dirty = FaultyBackend::new(FaultMode::Perturb, None).execute(&graph, &feeds).unwrap();
        assert_eq!(dirty[0].values[0], clean[0].values[0] + 1.0);
        assert_eq!(dirty[0].values[1], clean[0].values[1]);
    }

    #[test]
    fn trigger_limits_the_fault() {
        let graph = abs_graph();
        let feeds = materialize(&graph);
        assert!(FaultyBackend::new(FaultMode::Reject, Some("relu".into())).execute(&graph, &feeds).is_ok());
        assert!(FaultyBackend::new(FaultMode::Reject, Some("abs".into())).execute(&graph, &feeds).is_err());
    }
}
