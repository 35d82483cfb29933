use opfuzz_common::{AssignmentStrategy, DType, GenerationConfig, GenerationMethod, TensorSpec};
use opfuzz_graph::{Fingerprint, Graph, GraphBuilder, NodeKind};
use opfuzz_ops::OperatorSpecRegistry;
use proptest::prelude::*;

fn assert_edges_consistent(graph: &Graph) {
    for node in &graph.nodes {
        for input in &node.inputs {
            assert!(input.node < node.id, "edge {input} into node {} is not topological", node.id);
            assert!(graph.spec(*input).is_some());
        }
    }
}

#[test]
fn budget_five_from_declared_input_stays_consistent() {
    let registry = OperatorSpecRegistry::builtin(4);
    let cfg = GenerationConfig::default();
    let declared = TensorSpec::new(vec![1, 3, 8, 8], DType::Float32);
    for seed in 0..40 {
        let graph = GraphBuilder::new(&registry, &cfg).with_inputs(vec![declared.clone()]).build(5, seed).unwrap();
        let ops = graph.operator_count();
        assert!((1..=5).contains(&ops), "seed {seed}: {ops} operators\n{graph}");
        graph.validate_with(&registry).unwrap();
        assert_edges_consistent(&graph);
    }
}

#[test]
fn independent_builds_of_one_structure_share_a_fingerprint() {
    let registry = OperatorSpecRegistry::builtin(4);
    let cfg = GenerationConfig::default();
    let builder = GraphBuilder::new(&registry, &cfg);
    let a = builder.build(3, 77).unwrap();
    let mut b = builder.build(3, 77).unwrap();
    b.seed = 78;
    assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
}

#[test]
fn backward_insertion_occurs_in_hybrid_mode() {
    let registry = OperatorSpecRegistry::builtin(4);
    let cfg = GenerationConfig { forward_prob: 0.2, ..GenerationConfig::default() };
    let backward: usize = (0..20)
        .map(|seed| GraphBuilder::new(&registry, &cfg).build_with_stats(6, seed).unwrap().1.backward)
        .sum();
    assert!(backward > 0);
}

#[test]
fn every_graph_has_inputs_and_non_constant_outputs() {
    let registry = OperatorSpecRegistry::builtin(4);
    let cfg = GenerationConfig::default();
    for seed in 0..20 {
        let graph = GraphBuilder::new(&registry, &cfg).build(4, seed).unwrap();
        assert!(!graph.inputs.is_empty(), "seed {seed}");
        assert!(!graph.outputs.is_empty());
        for output in &graph.outputs {
            assert!(!matches!(graph.nodes[output.node].kind, NodeKind::Constant));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn built_graphs_satisfy_invariants(
        seed in any::<u64>(),
        budget in 1usize..8,
        forward_only in any::<bool>(),
        strategy in prop_oneof![
            Just(AssignmentStrategy::Random),
            Just(AssignmentStrategy::Smallest),
            Just(AssignmentStrategy::Largest),
        ],
    ) {
        let registry = OperatorSpecRegistry::builtin(4);
        let cfg = GenerationConfig {
            method: if forward_only { GenerationMethod::Forward } else { GenerationMethod::Hybrid },
            assignment: strategy,
            ..GenerationConfig::default()
        };
        let graph = GraphBuilder::new(&registry, &cfg).build(budget, seed).unwrap();
        prop_assert!(graph.operator_count() <= budget);
        prop_assert!(graph.validate_with(&registry).is_ok());
        for node in &graph.nodes {
            for input in &node.inputs {
                prop_assert!(input.node < node.id);
            }
            for spec in &node.outputs {
                prop_assert!(spec.numel() <= cfg.max_elem_per_tensor);
                prop_assert!(spec.shape.iter().all(|&d| d >= 1));
            }
        }
        let text = graph.to_json().unwrap();
        prop_assert_eq!(Graph::from_json(&text).unwrap(), graph);
    }
}
