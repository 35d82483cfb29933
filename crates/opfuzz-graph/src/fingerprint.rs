//! Structural digests for deduplication.

use crate::graph::{Graph, GraphNode, TensorRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Blake3 digest over a graph's operator sequence, edges, shapes and
/// attributes. The build seed is not part of it, so the same structure
/// built in two iterations has one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

#[derive(Serialize)]
struct Canonical<'a> {
    nodes: &'a [GraphNode],
    inputs: &'a [usize],
    outputs: &'a [TensorRef],
}

impl Fingerprint {
    pub fn of(graph: &Graph) -> Self {
        let canonical = Canonical { nodes: &graph.nodes, inputs: &graph.inputs, outputs: &graph.outputs };
        // Serializing plain structs and vectors cannot fail.
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        Fingerprint(blake3::hash(&bytes).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for directory names and logs. Digests read
    /// back from disk may be anything, so this cuts on a char boundary.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(hex: String) -> Self {
        Fingerprint(hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;
    use crate::graph::tests::relu_graph;

    #[test]
    fn seed_does_not_affect_fingerprint() {
        let a = relu_graph();
        let mut b = relu_graph();
        b.seed = 999;
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
        assert_eq!(Fingerprint::of(&a).as_str().len(), 64);
        assert_eq!(Fingerprint::of(&a).short().len(), 12);
    }

    #[test]
    fn shapes_and_ops_change_fingerprint() {
        let a = relu_graph();
        let mut b = relu_graph();
        b.nodes[1].kind = NodeKind::Op { op: "abs".to_string(), attrs: vec![] };
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
        let mut c = relu_graph();
        c.nodes[0].outputs[0].shape = vec![2, 4];
        c.nodes[1].outputs[0].shape = vec![2, 4];
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&c));
    }

    #[test]
    fn short_form_of_hand_edited_digest() {
        assert_eq!(Fingerprint::from("abc".to_string()).short(), "abc");
        let wide = Fingerprint::from("ééééééééééééééé".to_string());
        assert_eq!(wide.short().chars().count(), 12);
        let digest: Fingerprint = serde_json::from_str("\"ü0123456789abcdef\"").unwrap();
        assert_eq!(digest.short(), "ü0123456789a");
    }
}
