use opfuzz_backends::{Backend, FaultMode, FaultyBackend, ReferenceBackend, materialize};
use opfuzz_campaign::{CampaignState, Disposition, ResultFilter};
use opfuzz_common::{DType, FilterConfig, GenerationConfig, TensorSpec};
use opfuzz_graph::{GRAPH_FORMAT_VERSION, Graph, GraphBuilder, GraphNode, NodeKind, TensorRef};
use opfuzz_ops::OperatorSpecRegistry;
use opfuzz_runner::{DifferentialRunner, Isolation, Limits, RunStatus, Tolerance};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn sigmoid_graph() -> Graph {
    let spec = TensorSpec::new(vec![3, 4], DType::Float32);
    Graph {
        version: GRAPH_FORMAT_VERSION,
        seed: 3,
        nodes: vec![
            GraphNode { id: 0, kind: NodeKind::Input, inputs: vec![], outputs: vec![spec.clone()] },
            GraphNode {
                id: 1,
                kind: NodeKind::Op { op: "sigmoid".to_string(), attrs: vec![] },
                inputs: vec![TensorRef::new(0, 0)],
                outputs: vec![spec],
            },
        ],
        inputs: vec![0],
        outputs: vec![TensorRef::new(1, 0)],
    }
}

fn runner(second: impl Backend + 'static) -> DifferentialRunner {
    let limits = Limits { timeout: Duration::from_secs(5), grace: Duration::from_millis(100) };
    let backends: Vec<Arc<dyn Backend>> = vec![Arc::new(ReferenceBackend::f64()), Arc::new(second)];
    DifferentialRunner::new(backends, Isolation::Thread, limits, Tolerance::default())
}

fn filter() -> ResultFilter {
    ResultFilter::from_config(&FilterConfig::default()).unwrap()
}

#[test]
fn agreeing_backends_are_benign() {
    let graph = sigmoid_graph();
    let report = runner(ReferenceBackend::f32()).run(&graph, &materialize(&graph));
    let verdict = filter().classify(&graph, &report, &CampaignState::new("c", 0));
    assert_eq!(verdict.disposition, Disposition::Benign, "{verdict:?}");
}

#[test]
fn perturbed_output_is_an_interesting_divergence() {
    let graph = sigmoid_graph();
    let report = runner(FaultyBackend::new(FaultMode::Perturb, None)).run(&graph, &materialize(&graph));
    let verdict = filter().classify(&graph, &report, &CampaignState::new("c", 0));
    assert!(verdict.is_interesting());
    assert!(verdict.has_class("divergence"));
    assert_eq!(verdict.primary_class(), Some("divergence"));
}

#[test]
fn raising_backend_is_a_crash_unless_crash_is_inactive() {
    let graph = sigmoid_graph();
    let report = runner(FaultyBackend::new(FaultMode::Reject, Some("sigmoid".to_string())))
        .run(&graph, &materialize(&graph));
    assert_eq!(report.outcomes[1].status, RunStatus::Crash);
    let state = CampaignState::new("c", 0);
    assert!(filter().classify(&graph, &report, &state).has_class("crash"));

    let config = FilterConfig {
        active: vec!["nan".to_string(), "divergence".to_string(), "dup".to_string()],
        ..FilterConfig::default()
    };
    let verdict = ResultFilter::from_config(&config).unwrap().classify(&graph, &report, &state);
    assert_eq!(verdict.disposition, Disposition::Benign);
}

#[test]
fn injected_nan_is_flagged_and_can_be_suppressed() {
    let graph = sigmoid_graph();
    let report = runner(FaultyBackend::new(FaultMode::Nan, None)).run(&graph, &materialize(&graph));
    let state = CampaignState::new("c", 0);
    assert!(filter().classify(&graph, &report, &state).has_class("nan"));

    let config = FilterConfig {
        active: vec!["nan".to_string(), "dup".to_string()],
        suppress: vec!["nan".to_string()],
        ..FilterConfig::default()
    };
    let verdict = ResultFilter::from_config(&config).unwrap().classify(&graph, &report, &state);
    assert!(!verdict.is_interesting());
    assert_eq!(verdict.suppressed[0].backend.as_deref(), Some("faulty:nan"));
}

#[test]
fn hanging_backend_is_an_interesting_timeout() {
    let graph = sigmoid_graph();
    let limits = Limits { timeout: Duration::from_millis(200), grace: Duration::from_millis(50) };
    let backends: Vec<Arc<dyn Backend>> =
        vec![Arc::new(ReferenceBackend::f64()), Arc::new(FaultyBackend::new(FaultMode::Hang, None))];
    let report = DifferentialRunner::new(backends, Isolation::Thread, limits, Tolerance::default())
        .run(&graph, &materialize(&graph));
    assert_eq!(report.outcomes[1].status, RunStatus::Timeout);

    let verdict = filter().classify(&graph, &report, &CampaignState::new("c", 0));
    assert!(verdict.is_interesting());
    assert!(verdict.has_class("timeout"));
    assert_eq!(verdict.primary_class(), Some("timeout"));
}

#[test]
fn injected_inf_is_flagged_and_can_be_suppressed() {
    let graph = sigmoid_graph();
    let report = runner(FaultyBackend::new(FaultMode::Inf, None)).run(&graph, &materialize(&graph));
    let state = CampaignState::new("c", 0);
    let verdict = filter().classify(&graph, &report, &state);
    assert!(verdict.is_interesting());
    assert!(verdict.has_class("inf"));

    let config = FilterConfig { suppress: vec!["inf".to_string(), "divergence".to_string()], ..FilterConfig::default() };
    let verdict = ResultFilter::from_config(&config).unwrap().classify(&graph, &report, &state);
    assert_eq!(verdict.disposition, Disposition::Benign);
    assert!(verdict.suppressed.iter().any(|f| f.class == "inf" && f.backend.as_deref() == Some("faulty:inf")));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Independently built graphs of equal structure share a fingerprint,
    /// so only the first is ever interesting.
    #[test]
    fn rebuilt_graph_is_a_duplicate(seed in any::<u64>()) {
        let registry = OperatorSpecRegistry::builtin(2);
        let generation = GenerationConfig { max_nodes: 3, dim_range: [1, 3], ..GenerationConfig::default() };
        let builder = GraphBuilder::new(&registry, &generation);
        let first = builder.build(3, seed).unwrap();
        let mut second = builder.build(3, seed).unwrap();
        second.seed ^= 0xdead_beef;

        let crash = |graph: &Graph| {
            runner(FaultyBackend::new(FaultMode::Reject, None)).run(graph, &materialize(graph))
        };
        let filter = filter();
        let mut state = CampaignState::new("p", 0);
        let verdict = filter.classify(&first, &crash(&first), &state);
        prop_assert!(verdict.is_interesting());
        state.record(verdict.fingerprint.clone(), "crash");

        let again = filter.classify(&second, &crash(&second), &state);
        prop_assert_eq!(&again.fingerprint, &verdict.fingerprint);
        prop_assert!(again.duplicate);
        prop_assert_eq!(again.disposition, Disposition::Benign);
    }
}
