//! Graph IR.

use opfuzz_common::TensorSpec;
use opfuzz_ops::{OpInstance, OperatorSpecRegistry};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Version of the serialized graph layout.
pub const GRAPH_FORMAT_VERSION: u32 = 1;

/// Output `output` of node `node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorRef {
    pub node: usize,
    pub output: usize,
}

impl TensorRef {
    pub const fn new(node: usize, output: usize) -> Self {
        Self { node, output }
    }
}

impl fmt::Display for TensorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}:{}", self.node, self.output)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Fed by the caller at execution time.
    Input,
    /// Filled deterministically from the graph seed.
    Constant,
    Op { op: String, attrs: Vec<i64> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: usize,
    #[serde(flatten)]
    pub kind: NodeKind,
    pub inputs: Vec<TensorRef>,
    pub outputs: Vec<TensorSpec>,
}

impl GraphNode {
    pub fn op_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Op { op, .. } => Some(op),
            _ => None,
        }
    }

    pub fn is_source(&self) -> bool {
        !matches!(self.kind, NodeKind::Op { .. })
    }
}

/// An acyclic, topologically ordered computation graph.
///
/// Node `i` has id `i` and only reads outputs of nodes `< i`. Immutable once
/// built; build one with [`crate::GraphBuilder`] or decode one from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub version: u32,
    /// Seed the graph was built from; also seeds its constant values.
    pub seed: u64,
    pub nodes: Vec<GraphNode>,
    /// Ids of `Input` nodes, in feed order.
    pub inputs: Vec<usize>,
    pub outputs: Vec<TensorRef>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("unsupported graph format version {0}")]
    Version(u32),

    #[error("node at position {index} has id {id}")]
    Misnumbered { index: usize, id: usize },

    #[error("node {node} reads {input}, which is not produced by an earlier node")]
    ForwardReference { node: usize, input: TensorRef },

    #[error("node {node}: inputs and constants take no operands and produce one tensor")]
    BadSource { node: usize },

    #[error("node {node}: an operator must produce at least one tensor")]
    NoOutputs { node: usize },

    #[error("graph input list {listed:?} does not match input nodes {actual:?}")]
    InputList { listed: Vec<usize>, actual: Vec<usize> },

    #[error("graph output {0} does not exist")]
    DanglingOutput(TensorRef),

    #[error("node {node}: unknown operator `{op}`")]
    UnknownOperator { node: usize, op: String },

    #[error("node {node}: `{op}` does not accept its operands")]
    Rejected { node: usize, op: String },

    #[error("node {node}: declared outputs {declared} differ from derived outputs {derived}")]
    OutputMismatch { node: usize, declared: String, derived: String },

    #[error("no operator in the registry can be placed")]
    NoOperators,

    #[error("malformed graph JSON: {0}")]
    Decode(String),
}

fn specs_text(specs: &[TensorSpec]) -> String {
    specs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl Graph {
    pub fn spec(&self, tensor: TensorRef) -> Option<&TensorSpec> {
        self.nodes.get(tensor.node)?.outputs.get(tensor.output)
    }

    pub fn operator_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.is_source()).count()
    }

    pub fn input_specs(&self) -> Vec<&TensorSpec> {
        self.inputs.iter().filter_map(|&id| self.nodes.get(id)?.outputs.first()).collect()
    }

    pub fn output_specs(&self) -> Vec<&TensorSpec> {
        self.outputs.iter().filter_map(|&r| self.spec(r)).collect()
    }

    /// Operator sequence, for logs.
    pub fn op_sequence(&self) -> Vec<&str> {
        self.nodes.iter().filter_map(GraphNode::op_name).collect()
    }

    /// The concrete operator instance at an op node.
    pub fn instance(&self, node: &GraphNode) -> Option<OpInstance> {
        let NodeKind::Op { attrs, .. } = &node.kind else { return None };
        let inputs = node.inputs.iter().map(|&r| self.spec(r).cloned()).collect::<Option<Vec<_>>>()?;
        Some(OpInstance::new(inputs, attrs.clone()))
    }

    /// Structural invariants: topological numbering, no forward references,
    /// well-formed sources, consistent input and output lists.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.version != GRAPH_FORMAT_VERSION {
            return Err(GraphError::Version(self.version));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if node.id != index {
                return Err(GraphError::Misnumbered { index, id: node.id });
            }
            if node.is_source() {
                if !node.inputs.is_empty() || node.outputs.len() != 1 {
                    return Err(GraphError::BadSource { node: index });
                }
                continue;
            }
            if node.outputs.is_empty() {
                return Err(GraphError::NoOutputs { node: index });
            }
            for &input in &node.inputs {
                if input.node >= index || self.spec(input).is_none() {
                    return Err(GraphError::ForwardReference { node: index, input });
                }
            }
        }
        let actual: Vec<usize> =
            self.nodes.iter().filter(|n| n.kind == NodeKind::Input).map(|n| n.id).collect();
        if actual != self.inputs {
            return Err(GraphError::InputList { listed: self.inputs.clone(), actual });
        }
        if let Some(&dangling) = self.outputs.iter().find(|&&r| self.spec(r).is_none()) {
            return Err(GraphError::DanglingOutput(dangling));
        }
        Ok(())
    }

    /// [`Graph::validate`] plus, for every operator node, the registry's
    /// signature and predicate accept its operands and derive exactly its
    /// declared outputs.
    pub fn validate_with(&self, registry: &OperatorSpecRegistry) -> Result<(), GraphError> {
        self.validate()?;
        for node in &self.nodes {
            let NodeKind::Op { op, .. } = &node.kind else { continue };
            let entry = registry
                .get(op)
                .ok_or_else(|| GraphError::UnknownOperator { node: node.id, op: op.clone() })?;
            let rejected = || GraphError::Rejected { node: node.id, op: op.clone() };
            let instance = self.instance(node).ok_or_else(rejected)?;
            let derived = entry.predicate.output_specs(entry.signature(), &instance).ok_or_else(rejected)?;
            if derived != node.outputs {
                return Err(GraphError::OutputMismatch {
                    node: node.id,
                    declared: specs_text(&node.outputs),
                    derived: specs_text(&derived),
                });
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Decode and check structural invariants.
    pub fn from_json(text: &str) -> Result<Self, GraphError> {
        let graph: Graph = serde_json::from_str(text).map_err(|e| GraphError::Decode(e.to_string()))?;
        graph.validate()?;
        Ok(graph)
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            let outs = specs_text(&node.outputs);
            match &node.kind {
                NodeKind::Input => writeln!(f, "%{} = input {outs}", node.id)?,
                NodeKind::Constant => writeln!(f, "%{} = constant {outs}", node.id)?,
                NodeKind::Op { op, attrs } => {
                    let args = node.inputs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
                    writeln!(f, "%{} = {op}{attrs:?}({args}) -> {outs}", node.id)?;
                }
            }
        }
        let outs = self.outputs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        write!(f, "return {outs}")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use opfuzz_common::DType;

    pub(crate) fn relu_graph() -> Graph {
        let spec = TensorSpec::new(vec![2, 3], DType::Float32);
        Graph {
            version: GRAPH_FORMAT_VERSION,
            seed: 11,
            nodes: vec![
                GraphNode { id: 0, kind: NodeKind::Input, inputs: vec![], outputs: vec![spec.clone()] },
                GraphNode {
                    id: 1,
                    kind: NodeKind::Op { op: "relu".to_string(), attrs: vec![] },
                    inputs: vec![TensorRef::new(0, 0)],
                    outputs: vec![spec],
                },
            ],
            inputs: vec![0],
            outputs: vec![TensorRef::new(1, 0)],
        }
    }

    #[test]
    fn valid_graph_passes_both_checks() {
        let graph = relu_graph();
        graph.validate().unwrap();
        graph.validate_with(&OperatorSpecRegistry::builtin(4)).unwrap();
        assert_eq!(graph.operator_count(), 1);
        assert_eq!(graph.op_sequence(), vec!["relu"]);
    }

    #[test]
    fn forward_reference_is_rejected() {
        let mut graph = relu_graph();
        graph.nodes[1].inputs[0] = TensorRef::new(1, 0);
        assert!(matches!(graph.validate(), Err(GraphError::ForwardReference { node: 1, .. })));
    }

    #[test]
    fn misdeclared_output_is_rejected() {
        let mut graph = relu_graph();
        graph.nodes[1].outputs[0].shape = vec![3, 2];
        let err = graph.validate_with(&OperatorSpecRegistry::builtin(4)).unwrap_err();
        assert!(matches!(err, GraphError::OutputMismatch { node: 1, .. }), "{err}");
    }

    #[test]
    fn dtype_mismatch_is_rejected_by_registry() {
        let mut graph = relu_graph();
        graph.nodes[1].kind = NodeKind::Op { op: "sigmoid".to_string(), attrs: vec![] };
        graph.nodes[0].outputs[0].dtype = DType::Int32;
        graph.nodes[1].outputs[0].dtype = DType::Int32;
        let err = graph.validate_with(&OperatorSpecRegistry::builtin(4)).unwrap_err();
        assert!(matches!(err, GraphError::Rejected { node: 1, .. }));
    }

    #[test]
    fn input_list_must_match() {
        let mut graph = relu_graph();
        graph.inputs.clear();
        assert!(matches!(graph.validate(), Err(GraphError::InputList { .. })));
    }

    #[test]
    fn json_round_trip_validates() {
        let graph = relu_graph();
        let text = graph.to_json().unwrap();
        assert!(text.contains("\"kind\": \"op\""));
        assert_eq!(Graph::from_json(&text).unwrap(), graph);
        assert!(matches!(Graph::from_json("{"), Err(GraphError::Decode(_))));
    }

    #[test]
    fn display_lists_nodes() {
        let text = relu_graph().to_string();
        assert!(text.contains("%1 = relu[](%0:0) -> float32[2,3]"), "{text}");
        assert!(text.ends_with("return %1:0"));
    }
}
