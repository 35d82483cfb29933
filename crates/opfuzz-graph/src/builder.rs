//! Solver-guided graph construction.
//!
//! The builder keeps a pool of concrete tensors. Forward insertion picks an
//! operator, binds some of its inputs to pooled tensors and lets the solver
//! choose everything else; backward insertion picks a placeholder the
//! builder created earlier and replaces it by an operator whose output is
//! exactly that tensor. Operator choice is random, parameters come from the
//! solver, so every placed node satisfies its predicate.

use crate::graph::{GRAPH_FORMAT_VERSION, Graph, GraphError, GraphNode, NodeKind, TensorRef};
use opfuzz_common::{DType, GenerationConfig, GenerationMethod, TensorSpec};
use opfuzz_ops::{
    Atom, CaseRule, Domain, Expr, FiniteDomainSolver, OpEntry, OpInstance, OperatorSpecRegistry, Problem, Solver,
    Var,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Probability that a non-anchor operand of a forward insertion reuses a
/// pooled tensor instead of getting a fresh placeholder.
const REUSE_PROB: f64 = 0.6;
/// Initial placeholder dtype: floats are four times as likely as integers.
const FLOAT_PROB: f64 = 0.8;

/// Counters describing one construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub forward: usize,
    pub backward: usize,
    pub failed_attempts: usize,
    pub skipped_steps: usize,
    pub stalled: bool,
    pub timed_out: bool,
}

pub struct GraphBuilder<'a> {
    registry: &'a OperatorSpecRegistry,
    config: &'a GenerationConfig,
    declared: Vec<TensorSpec>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a OperatorSpecRegistry, config: &'a GenerationConfig) -> Self {
        Self { registry, config, declared: Vec::new() }
    }

    /// Declared graph inputs. They seed the pool, always become graph
    /// inputs, and are never replaced by backward insertion.
    pub fn with_inputs(mut self, inputs: Vec<TensorSpec>) -> Self {
        self.declared = inputs;
        self
    }

    /// Build a graph with at most `budget` operator nodes.
    pub fn build(&self, budget: usize, seed: u64) -> Result<Graph, GraphError> {
        self.build_with_stats(budget, seed).map(|(graph, _)| graph)
    }

    pub fn build_with_stats(&self, budget: usize, seed: u64) -> Result<(Graph, BuildStats), GraphError> {
        if !self.registry.entries().any(OpEntry::is_usable) {
            return Err(GraphError::NoOperators);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let solver = FiniteDomainSolver::new(self.config.assignment, rng.random());
        let mut work = Construction {
            registry: self.registry,
            config: self.config,
            rng,
            solver,
            values: Vec::new(),
            ops: Vec::new(),
            stats: BuildStats::default(),
        };
        if self.declared.is_empty() {
            let spec = work.initial_placeholder(self.max_rank());
            work.values.push(Value { spec, source: Source::Placeholder { declared: false } });
        } else {
            for spec in &self.declared {
                work.values.push(Value { spec: spec.clone(), source: Source::Placeholder { declared: true } });
            }
        }

        work.grow(budget);
        let (graph, stats) = work.finish(seed);
        graph.validate_with(self.registry)?;
        debug!(
            target: "opfuzz::gen",
            seed,
            nodes = graph.nodes.len(),
            operators = graph.operator_count(),
            forward = stats.forward,
            backward = stats.backward,
            skipped = stats.skipped_steps,
            stalled = stats.stalled,
            "graph built"
        );
        Ok((graph, stats))
    }

    fn max_rank(&self) -> usize {
        self.registry
            .entries()
            .flat_map(|e| e.signature().inputs.iter().map(|s| s.max_rank))
            .max()
            .unwrap_or(1)
            .max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Placeholder { declared: bool },
    Op(usize),
}

#[derive(Debug, Clone)]
struct Value {
    spec: TensorSpec,
    source: Source,
}

#[derive(Debug, Clone)]
struct PendingOp {
    op: String,
    attrs: Vec<i64>,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
}

/// Where each operand of a placement comes from.
#[derive(Debug, Clone, Copy)]
enum Operand {
    Pooled(usize),
    Fresh,
}

struct Construction<'a> {
    registry: &'a OperatorSpecRegistry,
    config: &'a GenerationConfig,
    rng: ChaCha8Rng,
    solver: FiniteDomainSolver,
    values: Vec<Value>,
    ops: Vec<PendingOp>,
    stats: BuildStats,
}

impl Construction<'_> {
    fn cap(&self) -> i64 {
        i64::try_from(self.config.max_elem_per_tensor).unwrap_or(i64::MAX).max(1)
    }

    fn dim_domain(&self) -> Domain {
        let [lo, hi] = self.config.dim_range;
        Domain::new(lo.max(1) as i64, hi.max(1) as i64)
    }

    fn initial_placeholder(&mut self, max_rank: usize) -> TensorSpec {
        let rank = self.rng.random_range(1..=max_rank);
        let dtypes = if self.config.init_float || self.rng.random_bool(FLOAT_PROB) {
            DType::floats()
        } else {
            DType::ints()
        };
        let dtype = dtypes[self.rng.random_range(0..dtypes.len())];
        let domain = self.dim_domain();
        let mut shape: Vec<usize> =
            (0..rank).map(|_| self.rng.random_range(domain.lo..=domain.hi) as usize).collect();
        let cap = self.config.max_elem_per_tensor.max(1);
        while shape.iter().product::<usize>() > cap {
            if let Some(largest) = shape.iter_mut().max() {
                *largest = (*largest / 2).max(1);
            }
        }
        TensorSpec::new(shape, dtype)
    }

    fn holes(&self) -> Vec<usize> {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.source == Source::Placeholder { declared: false })
            .map(|(i, _)| i)
            .collect()
    }

    fn grow(&mut self, budget: usize) {
        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        let attempts = self.config.max_attempts_per_step.max(1);
        let stall_limit = self.config.stall_limit.max(1);
        let mut consecutive_skips = 0;
        while self.ops.len() < budget {
            if Instant::now() >= deadline {
                self.stats.timed_out = true;
                break;
            }
            let mut placed = false;
            for _ in 0..attempts {
                let backward = self.config.method == GenerationMethod::Hybrid
                    && !self.holes().is_empty()
                    && !self.rng.random_bool(self.config.forward_prob.clamp(0.0, 1.0));
                placed = if backward { self.try_backward() } else { self.try_forward() };
                if placed {
                    break;
                }
                self.stats.failed_attempts += 1;
            }
            if placed {
                consecutive_skips = 0;
                continue;
            }
            self.stats.skipped_steps += 1;
            consecutive_skips += 1;
            if consecutive_skips >= stall_limit {
                self.stats.stalled = true;
                debug!(target: "opfuzz::gen", operators = self.ops.len(), "construction stalled");
                break;
            }
        }
    }

    /// Solve `case` with the given operand sources, fixed output shapes
    /// (backward) or free outputs (forward).
    fn solve_case(
        &mut self,
        entry: &OpEntry,
        case: &CaseRule,
        input_dtypes: &[DType],
        operands: &[Operand],
        fixed_output: Option<&TensorSpec>,
    ) -> Option<OpInstance> {
        let signature = entry.signature();
        let cap = self.cap();
        let dims = self.dim_domain();
        let mut problem = Problem::new();
        for (input, (&rank, operand)) in case.key.ranks.iter().zip(operands).enumerate() {
            match *operand {
                Operand::Pooled(value) => {
                    for (axis, &d) in self.values[value].spec.shape.iter().enumerate() {
                        problem.fix(Var::dim(input, axis), d as i64);
                    }
                }
                Operand::Fresh => {
                    for axis in 0..rank {
                        problem.bind(Var::dim(input, axis), dims);
                    }
                    let numel = Expr::product((0..rank).map(|axis| Expr::dim(input, axis)));
                    problem.require(Atom::le(numel, Expr::c(cap)));
                }
            }
        }
        for index in signature.numeric_indices() {
            let (lo, hi) = signature.attrs[index].domain.bounds();
            problem.bind(Var::Attr(index), Domain::new(lo, hi));
        }
        problem.require_all(&case.constraint);
        problem.require_all(&case.output_formula());
        for (output, shape) in case.outputs.iter().enumerate() {
            for axis in 0..shape.len() {
                problem.bind(Var::out(output, axis), Domain::new(1, cap));
            }
            let numel = Expr::product((0..shape.len()).map(|axis| Expr::v(Var::out(output, axis))));
            problem.require(Atom::le(numel, Expr::c(cap)));
        }
        if let Some(target) = fixed_output {
            for (axis, &d) in target.shape.iter().enumerate() {
                problem.fix(Var::out(0, axis), d as i64);
            }
        }

        let model = match self.solver.solve(&problem) {
            Ok(outcome) => outcome.into_model()?,
            Err(err) => {
                debug!(target: "opfuzz::gen", op = entry.name(), error = %err, "malformed placement problem");
                return None;
            }
        };
        let inputs = case
            .key
            .ranks
            .iter()
            .zip(operands)
            .zip(input_dtypes)
            .enumerate()
            .map(|(input, ((&rank, operand), &dtype))| match *operand {
                Operand::Pooled(value) => Some(self.values[value].spec.clone()),
                Operand::Fresh => {
                    let shape = (0..rank)
                        .map(|axis| model.get(&Var::dim(input, axis)).and_then(|&d| usize::try_from(d).ok()))
                        .collect::<Option<Vec<_>>>()?;
                    Some(TensorSpec::new(shape, dtype))
                }
            })
            .collect::<Option<Vec<_>>>()?;
        let numeric: Vec<i64> =
            signature.numeric_indices().map(|i| model.get(&Var::Attr(i)).copied().unwrap_or_default()).collect();
        let attrs = signature.attrs_for(&case.key, &numeric);
        Some(OpInstance::new(inputs, attrs))
    }

    fn place(&mut self, entry: &OpEntry, instance: OpInstance, operands: &[Operand], outputs: Vec<usize>) {
        let inputs = operands
            .iter()
            .zip(&instance.inputs)
            .map(|(operand, spec)| match *operand {
                Operand::Pooled(value) => value,
                Operand::Fresh => {
                    self.values.push(Value { spec: spec.clone(), source: Source::Placeholder { declared: false } });
                    self.values.len() - 1
                }
            })
            .collect();
        trace!(target: "opfuzz::gen", op = entry.name(), attrs = ?instance.attrs, "placed operator");
        self.ops.push(PendingOp { op: entry.name().to_string(), attrs: instance.attrs, inputs, outputs });
    }

    fn try_forward(&mut self) -> bool {
        let registry = self.registry;
        let Some(entry) = registry.choose(&mut self.rng, self.config.op_selection, |_| true) else {
            return false;
        };
        // (case, dtype rule, pooled candidates per slot) with at least one anchor.
        let mut options = Vec::new();
        for case in &entry.predicate.cases {
            for rule in &case.dtypes {
                let candidates: Vec<Vec<usize>> = case
                    .key
                    .ranks
                    .iter()
                    .zip(&rule.inputs)
                    .map(|(&rank, &dtype)| {
                        self.values
                            .iter()
                            .enumerate()
                            .filter(|(_, v)| v.spec.rank() == rank && v.spec.dtype == dtype)
                            .map(|(i, _)| i)
                            .collect()
                    })
                    .collect();
                if candidates.iter().any(|c| !c.is_empty()) {
                    options.push((case, rule, candidates));
                }
            }
        }
        if options.is_empty() {
            return false;
        }
        let (case, rule, candidates) = &options[self.rng.random_range(0..options.len())];
        let anchors: Vec<usize> = (0..candidates.len()).filter(|&i| !candidates[i].is_empty()).collect();
        let anchor = anchors[self.rng.random_range(0..anchors.len())];
        let operands: Vec<Operand> = candidates
            .iter()
            .enumerate()
            .map(|(slot, pool)| {
                if !pool.is_empty() && (slot == anchor || self.rng.random_bool(REUSE_PROB)) {
                    Operand::Pooled(pool[self.rng.random_range(0..pool.len())])
                } else {
                    Operand::Fresh
                }
            })
            .collect();

        let Some(instance) = self.solve_case(entry, case, &rule.inputs, &operands, None) else {
            return false;
        };
        let Some(specs) = case.output_specs(&instance) else { return false };
        let first_output = self.values.len();
        let op_index = self.ops.len();
        for spec in specs {
            self.values.push(Value { spec, source: Source::Op(op_index) });
        }
        let outputs = (first_output..self.values.len()).collect();
        self.place(entry, instance, &operands, outputs);
        self.stats.forward += 1;
        true
    }

    fn try_backward(&mut self) -> bool {
        let holes = self.holes();
        if holes.is_empty() {
            return false;
        }
        let target = holes[self.rng.random_range(0..holes.len())];
        let spec = self.values[target].spec.clone();
        let registry = self.registry;
        let Some(entry) = registry.choose(&mut self.rng, self.config.op_selection, |e| e.signature().outputs == 1)
        else {
            return false;
        };
        let options: Vec<_> = entry
            .predicate
            .cases
            .iter()
            .filter(|case| case.output_ranks() == [spec.rank()])
            .flat_map(|case| {
                case.dtypes.iter().filter(|r| r.outputs.first() == Some(&spec.dtype)).map(move |r| (case, r))
            })
            .collect();
        if options.is_empty() {
            return false;
        }
        let (case, rule) = options[self.rng.random_range(0..options.len())];
        let operands = vec![Operand::Fresh; case.key.ranks.len()];
        let Some(instance) = self.solve_case(entry, case, &rule.inputs, &operands, Some(&spec)) else {
            return false;
        };
        if case.output_specs(&instance).as_deref() != Some(std::slice::from_ref(&spec)) {
            return false;
        }
        let op_index = self.ops.len();
        self.place(entry, instance, &operands, vec![target]);
        self.values[target].source = Source::Op(op_index);
        self.stats.backward += 1;
        true
    }

    /// Number placeholders first, then operators in dependency order.
    fn finish(mut self, seed: u64) -> (Graph, BuildStats) {
        let mut refs: Vec<Option<TensorRef>> = vec![None; self.values.len()];
        let mut nodes = Vec::new();
        let mut inputs = Vec::new();
        let any_declared = self.values.iter().any(|v| v.source == Source::Placeholder { declared: true });
        let mut first_hole = true;
        for (index, value) in self.values.iter().enumerate() {
            let Source::Placeholder { declared } = value.source else { continue };
            let as_input = if declared {
                true
            } else if !any_declared && first_hole {
                first_hole = false;
                true
            } else {
                self.rng.random_bool(0.5)
            };
            let id = nodes.len();
            let kind = if as_input { NodeKind::Input } else { NodeKind::Constant };
            if as_input {
                inputs.push(id);
            }
            nodes.push(GraphNode { id, kind, inputs: vec![], outputs: vec![value.spec.clone()] });
            refs[index] = Some(TensorRef::new(id, 0));
        }

        let mut done = vec![false; self.ops.len()];
        loop {
            let mut progress = false;
            for (index, op) in self.ops.iter().enumerate() {
                if done[index] {
                    continue;
                }
                let Some(operands) = op.inputs.iter().map(|&v| refs[v]).collect::<Option<Vec<_>>>() else {
                    continue;
                };
                let id = nodes.len();
                for (slot, &value) in op.outputs.iter().enumerate() {
                    refs[value] = Some(TensorRef::new(id, slot));
                }
                nodes.push(GraphNode {
                    id,
                    kind: NodeKind::Op { op: op.op.clone(), attrs: op.attrs.clone() },
                    inputs: operands,
                    outputs: op.outputs.iter().map(|&v| self.values[v].spec.clone()).collect(),
                });
                done[index] = true;
                progress = true;
            }
            if !progress {
                break;
            }
        }

        let mut consumed = vec![false; self.values.len()];
        for op in &self.ops {
            for &v in &op.inputs {
                consumed[v] = true;
            }
        }
        let mut outputs: Vec<TensorRef> = self
            .values
            .iter()
            .enumerate()
            .filter(|(i, v)| matches!(v.source, Source::Op(_)) && !consumed[*i])
            .filter_map(|(i, _)| refs[i])
            .collect();
        if outputs.is_empty() {
            outputs = inputs.iter().map(|&id| TensorRef::new(id, 0)).collect();
        }
        outputs.sort();

        let graph = Graph { version: GRAPH_FORMAT_VERSION, seed, nodes, inputs, outputs };
        (graph, self.stats)
    }
}
