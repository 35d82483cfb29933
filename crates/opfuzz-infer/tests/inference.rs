use opfuzz_backends::{Backend, FaultMode, FaultyBackend, ReferenceBackend};
use opfuzz_common::{DType, InferenceConfig, TensorSpec};
use opfuzz_infer::{BackendOracle, ProbeLabel, ProbeOracle, ProbeRecord, RuleFile, RuleInferenceEngine};
use opfuzz_ops::{
    AttrDomain, AttrSlot, InputSlot, OpInstance, OperatorKind, OperatorSpecRegistry, RuleTemplate, Signature,
};
use opfuzz_runner::{Isolation, Limits};
use proptest::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

fn spec(shape: &[usize], dtype: DType) -> TensorSpec {
    TensorSpec::new(shape.to_vec(), dtype)
}

fn config(budget: usize) -> InferenceConfig {
    InferenceConfig { probe_budget: budget, max_rank: 3, dim_max: 6, ..InferenceConfig::default() }
}

fn reference_oracle(backend: impl Backend + 'static) -> BackendOracle {
    let limits = Limits { timeout: Duration::from_secs(10), grace: Duration::from_millis(100) };
    BackendOracle::new(Arc::new(backend), Isolation::Thread, limits, 11)
}

/// Runs anything non-empty and returns its first input unchanged.
struct PassThrough;

impl ProbeOracle for PassThrough {
    fn name(&self) -> &str {
        "pass-through"
    }

    fn probe(&mut self, _op: &str, _signature: &Signature, instance: &OpInstance) -> ProbeRecord {
        let first = &instance.inputs[0];
        if first.numel() == 0 {
            return ProbeRecord::failed(instance.clone(), ProbeLabel::Rejected, "empty input");
        }
        ProbeRecord { instance: instance.clone(), label: ProbeLabel::Success, outputs: vec![first.clone()], detail: None }
    }
}

#[test]
fn custom_operator_learns_rank_and_dtype_domain() {
    let signature = Signature {
        inputs: vec![InputSlot::new(1, 4, &[DType::Float32, DType::Int32])],
        attrs: vec![],
        outputs: 1,
    };
    let mut registry = OperatorSpecRegistry::new();
    registry
        .register(OperatorKind { name: "custom".to_string(), signature: signature.clone(), template: RuleTemplate::None })
        .unwrap();
    let mut engine = RuleInferenceEngine::new(&config(1_024), 3);
    let (rules, reports) = engine.infer_registry(&mut registry, &mut PassThrough).unwrap();
    assert_eq!(reports[0].valid_cases, 4);
    assert!(rules.operators.contains_key("custom"));

    let predicate = &registry.get("custom").unwrap().predicate;
    assert!(predicate.accepts(&signature, &OpInstance::new(vec![spec(&[3, 4], DType::Float32)], vec![])));
    for dtype in [DType::Float32, DType::Int32, DType::Float64] {
        assert!(!predicate.accepts(&signature, &OpInstance::new(vec![spec(&[2; 5], dtype)], vec![])));
    }
}

#[test]
fn relu_against_reference_is_sound_and_useful() {
    let registry = OperatorSpecRegistry::builtin(3);
    let kind = registry.get("relu").unwrap().kind.clone();
    let mut oracle = reference_oracle(ReferenceBackend::f64());
    let report = RuleInferenceEngine::new(&config(512), 5).infer(&kind, &mut oracle);

    assert_eq!(report.crashes, 0);
    for record in report.records.iter().filter(|r| !r.label.executed()) {
        assert!(!report.accepts(&kind.signature, &record.instance), "{:?}", record.instance);
    }
    let ok = OpInstance::new(vec![spec(&[2, 3], DType::Float32)], vec![]);
    assert_eq!(report.predicate.output_specs(&kind.signature, &ok), Some(vec![spec(&[2, 3], DType::Float32)]));
    let ints = OpInstance::new(vec![spec(&[4], DType::Int64)], vec![]);
    assert!(report.accepts(&kind.signature, &ints));
    let empty = OpInstance::new(vec![spec(&[0, 3], DType::Float32)], vec![]);
    assert!(!report.accepts(&kind.signature, &empty));
}

#[test]
fn slice_learns_ordered_bounds() {
    let registry = OperatorSpecRegistry::builtin(2);
    let kind = registry.get("slice").unwrap().kind.clone();
    let mut oracle = reference_oracle(ReferenceBackend::f64());
    let report = RuleInferenceEngine::new(&config(1_024), 8).infer(&kind, &mut oracle);

    let slice = |len: usize, start: i64, end: i64| OpInstance::new(vec![spec(&[len], DType::Float32)], vec![0, start, end]);
    assert_eq!(
        report.predicate.output_specs(&kind.signature, &slice(6, 1, 4)),
        Some(vec![spec(&[3], DType::Float32)])
    );
    assert!(!report.accepts(&kind.signature, &slice(6, 4, 2)));
    assert!(!report.accepts(&kind.signature, &slice(6, 3, 3)));
    assert!(!report.accepts(&kind.signature, &slice(6, 2, 7)));
    assert!(!report.accepts(&kind.signature, &slice(6, -1, 2)));
    // Axis 1 does not exist on a rank-1 input.
    let bad_axis = OpInstance::new(vec![spec(&[6], DType::Float32)], vec![1, 0, 2]);
    assert!(!report.accepts(&kind.signature, &bad_axis));
}

#[test]
fn crashing_backend_does_not_abort_inference() {
    let registry = OperatorSpecRegistry::builtin(2);
    let kind = registry.get("abs").unwrap().kind.clone();
    let mut oracle = reference_oracle(FaultyBackend::new(FaultMode::Panic, Some("abs".to_string())));
    let report = RuleInferenceEngine::new(&config(40), 1).infer(&kind, &mut oracle);
    assert!(report.probes > 0);
    assert_eq!(report.crashes, report.probes);
    assert!(report.predicate.is_empty());
    assert!(report.records.iter().all(|r| r.label == ProbeLabel::Crash));
}

#[test]
fn rule_file_round_trips_and_reapplies() {
    let mut registry = OperatorSpecRegistry::builtin(2);
    registry.restrict(&["neg", "add"]).unwrap();
    let mut oracle = reference_oracle(ReferenceBackend::f64());
    let mut engine = RuleInferenceEngine::new(&config(400), 21);
    let (rules, _) = engine.infer_registry(&mut registry, &mut oracle).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules").join("reference.json");
    rules.save(&path).unwrap();
    let loaded = RuleFile::load(&path).unwrap();
    assert_eq!(loaded, rules);
    assert_eq!(loaded.backend, "reference");

    let mut fresh = OperatorSpecRegistry::builtin(2);
    fresh.restrict(&["neg", "add"]).unwrap();
    assert_eq!(loaded.apply(&mut fresh), 2);
    for name in ["neg", "add"] {
        assert_eq!(fresh.get(name).unwrap().predicate, registry.get(name).unwrap().predicate);
    }
}

/// Labels instances by a salted hash, so rejections follow no shape logic.
struct Arbitrary {
    salt: u64,
    one_in: u64,
}

impl ProbeOracle for Arbitrary {
    fn name(&self) -> &str {
        "arbitrary"
    }

    fn probe(&mut self, _op: &str, _signature: &Signature, instance: &OpInstance) -> ProbeRecord {
        let mut hasher = DefaultHasher::new();
        (self.salt, instance).hash(&mut hasher);
        if hasher.finish() % self.one_in == 0 {
            return ProbeRecord::failed(instance.clone(), ProbeLabel::Rejected, "unlucky");
        }
        let outputs = vec![instance.inputs[0].clone()];
        ProbeRecord { instance: instance.clone(), label: ProbeLabel::Success, outputs, detail: None }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn learned_predicate_never_accepts_an_observed_failure(salt in any::<u64>(), one_in in 2u64..6, seed in any::<u64>()) {
        let slot = InputSlot::new(0, 2, &[DType::Float32, DType::Int32]);
        let signature = Signature {
            inputs: vec![slot.clone(), slot],
            attrs: vec![AttrSlot::numeric("k", AttrDomain::Int { min: 0, max: 3 })],
            outputs: 1,
        };
        let kind = OperatorKind { name: "arbitrary".to_string(), signature, template: RuleTemplate::None };
        let report = RuleInferenceEngine::new(&config(240), seed).infer(&kind, &mut Arbitrary { salt, one_in });
        for record in report.records.iter().filter(|r| !r.label.executed()) {
            prop_assert!(!report.accepts(&kind.signature, &record.instance), "{:?}", record.instance);
        }
        for record in report.records.iter().filter(|r| r.label.executed()) {
            if let Some(outputs) = report.predicate.output_specs(&kind.signature, &record.instance) {
                prop_assert_eq!(&outputs, &record.outputs);
            }
        }
    }
}
