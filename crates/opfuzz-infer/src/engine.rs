//! The rule inference loop.
//!
//! For each case of an operator the engine first finds which dtype tuples
//! execute at all, then runs refinement rounds: probe a batch of points
//! (boundaries in the first round, random and template-guided points after
//! that), re-synthesize the case rule, and stop once a complete round leaves
//! the rule unchanged or the probe budget runs out.

use crate::plan::{CaseSpace, symbol_env};
use crate::probe::{ProbeLabel, ProbeOracle, ProbeRecord};
use crate::rules::RuleFile;
use crate::synth::{Synthesis, synthesize};
use opfuzz_common::{DType, InferenceConfig};
use opfuzz_ops::{
    Assignment, CaseKey, OpInstance, OperatorKind, OperatorSpecRegistry, RegistryError, Signature, ValidityPredicate,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Instant;
use tracing::{debug, info};

/// Probes every case gets even when the budget is spread thin.
const MIN_CASE_PROBES: usize = 4;
/// Random searches for a first execution when the anchor point fails.
const SEARCH_PROBES: usize = 8;

/// What inferring one operator kind observed and produced.
#[derive(Debug, Clone)]
pub struct InferenceReport {
    pub op: String,
    pub predicate: ValidityPredicate,
    pub probes: usize,
    pub crashes: usize,
    pub rejected: usize,
    pub numeric_invalid: usize,
    /// Case keys the signature admits.
    pub cases: usize,
    /// Cases that ended with a rule.
    pub valid_cases: usize,
    /// Cases whose rule is the unmodified hand-written template.
    pub template_cases: usize,
    /// Most refinement rounds any case used.
    pub rounds: usize,
    /// Every probed case stabilized within budget.
    pub converged: bool,
    /// Every probe, in order. Kept for inspection.
    pub records: Vec<ProbeRecord>,
}

impl InferenceReport {
    /// Whether the learned predicate accepts an observed instance.
    pub fn accepts(&self, signature: &Signature, instance: &OpInstance) -> bool {
        self.predicate.accepts(signature, instance)
    }
}

struct Session<'o, O: ?Sized> {
    op: &'o str,
    signature: &'o Signature,
    oracle: &'o mut O,
    budget: usize,
    probes: usize,
    crashes: usize,
    rejected: usize,
    numeric_invalid: usize,
}

impl<O: ProbeOracle + ?Sized> Session<'_, O> {
    fn exhausted(&self) -> bool {
        self.probes >= self.budget
    }

    fn probe(&mut self, instance: &OpInstance) -> ProbeRecord {
        self.probes += 1;
        let record = self.oracle.probe(self.op, self.signature, instance);
        match record.label {
            ProbeLabel::Success => {}
            ProbeLabel::NumericInvalid => self.numeric_invalid += 1,
            ProbeLabel::Rejected => self.rejected += 1,
            ProbeLabel::Crash => self.crashes += 1,
        }
        record
    }
}

struct CaseOutcome {
    synthesis: Option<Synthesis>,
    records: Vec<ProbeRecord>,
    rounds: usize,
    converged: bool,
}

/// Learns validity predicates by probing an oracle.
pub struct RuleInferenceEngine {
    config: InferenceConfig,
    rng: ChaCha8Rng,
}

impl RuleInferenceEngine {
    pub fn new(config: &InferenceConfig, seed: u64) -> Self {
        Self { config: config.clone(), rng: ChaCha8Rng::seed_from_u64(seed) }
    }

    /// Infer a predicate for `kind`. Probe failures, crashes included, are
    /// recorded as data; nothing here returns an error.
    pub fn infer(&mut self, kind: &OperatorKind, oracle: &mut dyn ProbeOracle) -> InferenceReport {
        let started = Instant::now();
        let signature = &kind.signature;
        let keys = signature.case_keys();
        let budget = self.config.probe_budget.max(1);
        let allowance = (budget / keys.len().max(1)).max(MIN_CASE_PROBES);
        let mut session = Session {
            op: &kind.name,
            signature,
            oracle,
            budget,
            probes: 0,
            crashes: 0,
            rejected: 0,
            numeric_invalid: 0,
        };

        let mut predicate = ValidityPredicate::reject_all();
        let mut records = Vec::new();
        let (mut template_cases, mut rounds, mut converged) = (0, 0, true);
        for key in &keys {
            if session.exhausted() {
                converged = false;
                break;
            }
            let outcome = self.infer_case(kind, key, &mut session, allowance);
            rounds = rounds.max(outcome.rounds);
            converged &= outcome.converged;
            records.extend(outcome.records);
            if let Some(synthesis) = outcome.synthesis {
                debug!(target: "opfuzz::infer", op = %kind.name, case = %key, constraint = %synthesis.rule.constraint, "case learned");
                template_cases += usize::from(synthesis.from_template);
                predicate.upsert(synthesis.rule);
            }
        }

        let report = InferenceReport {
            op: kind.name.clone(),
            valid_cases: predicate.cases.len(),
            predicate,
            probes: session.probes,
            crashes: session.crashes,
            rejected: session.rejected,
            numeric_invalid: session.numeric_invalid,
            cases: keys.len(),
            template_cases,
            rounds,
            converged,
            records,
        };
        info!(
            target: "opfuzz::infer",
            op = %report.op,
            oracle = session.oracle.name(),
            probes = report.probes,
            crashes = report.crashes,
            valid_cases = report.valid_cases,
            cases = report.cases,
            converged = report.converged,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "operator inferred"
        );
        report
    }

    fn infer_case<O: ProbeOracle + ?Sized>(
        &mut self,
        kind: &OperatorKind,
        key: &CaseKey,
        session: &mut Session<'_, O>,
        allowance: usize,
    ) -> CaseOutcome {
        let signature = &kind.signature;
        let space = CaseSpace::new(signature, key, self.config.dim_max);
        let start = session.probes;
        let within = |session: &Session<'_, O>| session.probes - start < allowance && !session.exhausted();
        let mut records: Vec<ProbeRecord> = Vec::new();
        let mut executed: Vec<Assignment> = Vec::new();
        let mut accepted: Vec<Vec<DType>> = Vec::new();

        // Dtype tuples, probed at a point the template believes valid.
        let uniform = signature.uniform_dtype_tuples();
        let all_tuples = signature.dtype_tuples();
        let mut anchor = space.anchor(kind.template, self.rng.random());
        let mut anchor_moved = false;
        for tuple in &uniform {
            if !within(session) {
                break;
            }
            let record = session.probe(&space.instance(tuple, &anchor));
            if record.label.executed() {
                accepted.push(tuple.clone());
            }
            records.push(record);
        }
        if accepted.is_empty() {
            for attempt in 0..SEARCH_PROBES.min(allowance / 2).max(1) {
                if !within(session) || all_tuples.is_empty() {
                    break;
                }
                let tuple = &all_tuples[attempt % all_tuples.len()];
                let env = space.random(&mut self.rng, &[]);
                let record = session.probe(&space.instance(tuple, &env));
                let hit = record.label.executed();
                records.push(record);
                if hit {
                    accepted.push(tuple.clone());
                    anchor = env;
                    anchor_moved = true;
                    break;
                }
            }
            if accepted.is_empty() {
                debug!(target: "opfuzz::infer", op = %kind.name, case = %key, probes = records.len(), "case never executed");
                return CaseOutcome { synthesis: None, records, rounds: 0, converged: true };
            }
        }
        executed.push(anchor.clone());
        for tuple in &all_tuples {
            if accepted.contains(tuple) || (uniform.contains(tuple) && !anchor_moved) {
                continue;
            }
            if !within(session) {
                break;
            }
            let record = session.probe(&space.instance(tuple, &anchor));
            if record.label.executed() {
                accepted.push(tuple.clone());
            }
            records.push(record);
        }

        let mut synthesis = synthesize(signature, key, kind.template, &records, &accepted);
        let mut rounds = 0;
        let mut converged = false;
        for round in 0..self.config.rounds.max(1) {
            let mut plan = if round == 0 { space.boundary() } else { Vec::new() };
            for i in 0..self.config.random_per_round {
                let guided = if i % 3 == 0 { space.template_sample(kind.template, self.rng.random()) } else { None };
                plan.push(guided.unwrap_or_else(|| space.random(&mut self.rng, &executed)));
            }
            let mut complete = true;
            for env in plan {
                if !within(session) {
                    complete = false;
                    break;
                }
                let tuple = if accepted.len() > 1 && self.rng.random_bool(0.25) {
                    &accepted[self.rng.random_range(0..accepted.len())]
                } else {
                    &accepted[0]
                };
                let record = session.probe(&space.instance(tuple, &env));
                if record.label.executed() {
                    executed.push(symbol_env(&space.symbols, &record.instance));
                }
                records.push(record);
            }
            rounds = round + 1;
            let next = synthesize(signature, key, kind.template, &records, &accepted);
            let stable = next.as_ref().map(|s| &s.rule) == synthesis.as_ref().map(|s| &s.rule);
            synthesis = next;
            if !complete {
                break;
            }
            if stable {
                converged = true;
                break;
            }
        }
        CaseOutcome { synthesis, records, rounds, converged }
    }

    /// Infer every operator in `registry`, install the learned predicates,
    /// and return them as a rule file together with per-operator reports.
    pub fn infer_registry(
        &mut self,
        registry: &mut OperatorSpecRegistry,
        oracle: &mut dyn ProbeOracle,
    ) -> Result<(RuleFile, Vec<InferenceReport>), RegistryError> {
        let kinds: Vec<OperatorKind> = registry.entries().map(|e| e.kind.clone()).collect();
        let mut rules = RuleFile::new(oracle.name(), self.config.max_rank);
        let mut reports = Vec::with_capacity(kinds.len());
        for kind in &kinds {
            let report = self.infer(kind, oracle);
            registry.set_predicate(&kind.name, report.predicate.clone())?;
            rules.insert(&report);
            reports.push(report);
        }
        Ok((rules, reports))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opfuzz_common::TensorSpec;
    use opfuzz_ops::{InputSlot, RuleTemplate};

    /// Identity semantics on non-empty tensors.
    struct Identity;

    impl ProbeOracle for Identity {
        fn name(&self) -> &str {
            "identity"
        }

        fn probe(&mut self, _op: &str, _signature: &Signature, instance: &OpInstance) -> ProbeRecord {
            let spec = &instance.inputs[0];
            if spec.numel() == 0 {
                return ProbeRecord::failed(instance.clone(), ProbeLabel::Rejected, "empty");
            }
            ProbeRecord { instance: instance.clone(), label: ProbeLabel::Success, outputs: vec![spec.clone()], detail: None }
        }
    }

    fn custom(template: RuleTemplate) -> OperatorKind {
        let signature = Signature {
            inputs: vec![InputSlot::new(1, 4, &[DType::Float32, DType::Int32])],
            attrs: vec![],
            outputs: 1,
        };
        OperatorKind { name: "custom".to_string(), signature, template }
    }

    fn config(budget: usize) -> InferenceConfig {
        InferenceConfig { probe_budget: budget, ..InferenceConfig::default() }
    }

    #[test]
    fn budget_is_a_hard_cap() {
        let mut engine = RuleInferenceEngine::new(&config(10), 1);
        let report = engine.infer(&custom(RuleTemplate::None), &mut Identity);
        assert!(report.probes <= 10);
        assert_eq!(report.records.len(), report.probes);
        assert!(!report.converged);
    }

    #[test]
    fn identity_converges_on_template() {
        let mut engine = RuleInferenceEngine::new(&config(2_048), 2);
        let kind = custom(RuleTemplate::Elementwise);
        let report = engine.infer(&kind, &mut Identity);
        assert_eq!(report.valid_cases, 4);
        assert_eq!(report.template_cases, 4);
        assert!(report.converged);
        let ok = OpInstance::new(vec![TensorSpec::new(vec![5, 7, 2], DType::Int32)], vec![]);
        assert_eq!(
            report.predicate.output_specs(&kind.signature, &ok),
            Some(vec![TensorSpec::new(vec![5, 7, 2], DType::Int32)])
        );
    }

    #[test]
    fn same_seed_same_predicate() {
        let kind = custom(RuleTemplate::None);
        let a = RuleInferenceEngine::new(&config(300), 9).infer(&kind, &mut Identity);
        let b = RuleInferenceEngine::new(&config(300), 9).infer(&kind, &mut Identity);
        assert_eq!(a.predicate, b.predicate);
        assert_eq!(a.records, b.records);
    }
}
