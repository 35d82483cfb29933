//! Probes: one concrete instantiation tried against an oracle.

use opfuzz_backends::{Backend, ExecutionError, materialize};
use opfuzz_common::{TensorData, TensorSpec};
use opfuzz_graph::{GRAPH_FORMAT_VERSION, Graph, GraphNode, NodeKind, TensorRef};
use opfuzz_ops::{OpInstance, Signature};
use opfuzz_runner::{Execution, Isolation, Limits, execute_isolated};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeLabel {
    Success,
    /// Executed, but some output is NaN or infinite.
    NumericInvalid,
    /// Clean refusal by the backend.
    Rejected,
    /// Panic, abnormal exit, protocol failure or timeout.
    Crash,
}

impl ProbeLabel {
    /// The backend produced outputs. Shape rules learn from these.
    pub fn executed(self) -> bool {
        matches!(self, ProbeLabel::Success | ProbeLabel::NumericInvalid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub instance: OpInstance,
    pub label: ProbeLabel,
    /// Output specs of an executed probe.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<TensorSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProbeRecord {
    pub fn executed(instance: OpInstance, outputs: &[TensorData]) -> Self {
        let label =
            if outputs.iter().all(TensorData::is_finite) { ProbeLabel::Success } else { ProbeLabel::NumericInvalid };
        Self { instance, label, outputs: outputs.iter().map(|t| t.spec.clone()).collect(), detail: None }
    }

    pub fn failed(instance: OpInstance, label: ProbeLabel, detail: impl Into<String>) -> Self {
        Self { instance, label, outputs: Vec::new(), detail: Some(detail.into()) }
    }
}

/// Labels instantiations of an operator.
pub trait ProbeOracle {
    fn name(&self) -> &str;

    fn probe(&mut self, op: &str, signature: &Signature, instance: &OpInstance) -> ProbeRecord;
}

/// A one-operator graph exercising `instance`.
///
/// Every operand is a graph input. The op's declared outputs are
/// placeholders; the oracle reads the real specs from what executes.
pub fn probe_graph(op: &str, signature: &Signature, instance: &OpInstance, seed: u64) -> Graph {
    let mut nodes: Vec<GraphNode> = instance
        .inputs
        .iter()
        .enumerate()
        .map(|(id, spec)| GraphNode { id, kind: NodeKind::Input, inputs: vec![], outputs: vec![spec.clone()] })
        .collect();
    let id = nodes.len();
    let dtype = instance.inputs.first().map(|s| s.dtype).unwrap_or(opfuzz_common::DType::Float32);
    let placeholder = TensorSpec::new(Vec::<usize>::new(), dtype);
    let outputs = signature.outputs.max(1);
    nodes.push(GraphNode {
        id,
        kind: NodeKind::Op { op: op.to_string(), attrs: instance.attrs.clone() },
        inputs: (0..id).map(|i| TensorRef::new(i, 0)).collect(),
        outputs: vec![placeholder; outputs],
    });
    Graph {
        version: GRAPH_FORMAT_VERSION,
        seed,
        nodes,
        inputs: (0..id).collect(),
        outputs: (0..outputs).map(|o| TensorRef::new(id, o)).collect(),
    }
}

/// Probes a real backend inside the runner's isolation boundary, so a
/// crashing probe is recorded instead of taking inference down.
pub struct BackendOracle {
    backend: Arc<dyn Backend>,
    isolation: Isolation,
    limits: Limits,
    seed: u64,
    probes: u64,
}

impl BackendOracle {
    pub fn new(backend: Arc<dyn Backend>, isolation: Isolation, limits: Limits, seed: u64) -> Self {
        Self { backend, isolation, limits, seed, probes: 0 }
    }
}

impl ProbeOracle for BackendOracle {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn probe(&mut self, op: &str, signature: &Signature, instance: &OpInstance) -> ProbeRecord {
        self.probes += 1;
        let graph = probe_graph(op, signature, instance, self.seed.wrapping_add(self.probes));
        let inputs = materialize(&graph);
        let instance = instance.clone();
        let record = match execute_isolated(&self.backend, &self.isolation, &graph, &inputs, self.limits) {
            Execution::Finished(Ok(outputs)) if outputs.len() == graph.outputs.len() => {
                ProbeRecord::executed(instance, &outputs)
            }
            Execution::Finished(Ok(outputs)) => ProbeRecord::failed(
                instance,
                ProbeLabel::Rejected,
                format!("produced {} outputs, expected {}", outputs.len(), graph.outputs.len()),
            ),
            Execution::Finished(Err(ExecutionError::Rejected { reason })) => {
                ProbeRecord::failed(instance, ProbeLabel::Rejected, reason)
            }
            Execution::Finished(Err(other)) => ProbeRecord::failed(instance, ProbeLabel::Crash, other.to_string()),
            Execution::TimedOut => ProbeRecord::failed(instance, ProbeLabel::Crash, "timed out"),
        };
        trace!(target: "opfuzz::infer", op, label = ?record.label, detail = record.detail.as_deref(), "probe");
        record
    }
}
