//! Deterministic input and constant values.

use opfuzz_common::{TensorData, TensorSpec};
use opfuzz_graph::Graph;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const GOLDEN: u64 = 0x9E37_79B9_7F4A_7C15;

/// Values for every source node of `graph`, in node order.
///
/// Each node draws from its own stream seeded by the graph seed and node id,
/// so a graph always gets the same feeds. Floats are uniform in `[-1, 1]`.
/// Integers are nonzero with magnitude at most 4; the first half of each
/// tensor is positive so index-like consumers see valid values.
pub fn materialize(graph: &Graph) -> Vec<TensorData> {
    graph
        .nodes
        .iter()
        .filter(|node| node.is_source())
        .filter_map(|node| {
            let spec = node.outputs.first()?;
            Some(fill(spec, graph.seed ^ (node.id as u64).wrapping_mul(GOLDEN)))
        })
        .collect()
}

pub fn fill(spec: &TensorSpec, seed: u64) -> TensorData {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let numel = spec.numel();
    let values = (0..numel)
        .map(|i| {
            if spec.dtype.is_float() {
                spec.dtype.quantize(rng.random_range(-1.0..=1.0))
            } else {
                let magnitude = rng.random_range(1..=4) as f64;
                if i < numel.div_ceil(2) || rng.random_bool(0.5) { magnitude } else { -magnitude }
            }
        })
        .collect();
    TensorData { spec: spec.clone(), values }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opfuzz_common::DType;
    use opfuzz_graph::{GRAPH_FORMAT_VERSION, GraphNode, NodeKind, TensorRef};

    fn two_source_graph(seed: u64) -> Graph {
        let f = TensorSpec::new(vec![4, 4], DType::Float32);
        let i = TensorSpec::new(vec![8], DType::Int64);
        Graph {
            version: GRAPH_FORMAT_VERSION,
            seed,
            nodes: vec![
                GraphNode { id: 0, kind: NodeKind::Input, inputs: vec![], outputs: vec![f.clone()] },
                GraphNode { id: 1, kind: NodeKind::Constant, inputs: vec![], outputs: vec![i] },
                GraphNode {
                    id: 2,
                    kind: NodeKind::Op { op: "relu".to_string(), attrs: vec![] },
                    inputs: vec![TensorRef::new(0, 0)],
                    outputs: vec![f],
                },
            ],
            inputs: vec![0],
            outputs: vec![TensorRef::new(2, 0)],
        }
    }

    #[test]
    fn one_value_per_source_and_deterministic() {
        let graph = two_source_graph(5);
        let a = materialize(&graph);
        assert_eq!(a.len(), 2);
        assert_eq!(a, materialize(&graph));
        assert_ne!(a, materialize(&two_source_graph(6)));
    }

    #[test]
    fn value_ranges() {
        let feeds = materialize(&two_source_graph(9));
        assert!(feeds[0].values.iter().all(|v| (-1.0..=1.0).contains(v)));
        let ints = &feeds[1].values;
        assert!(ints.iter().all(|v| v.fract() == 0.0 && *v != 0.0 && v.abs() <= 4.0));
        assert!(ints[..4].iter().all(|v| *v > 0.0));
    }
}
