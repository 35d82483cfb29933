//! Probe planning for one case of an operator.
//!
//! A case fixes input ranks and structural attributes; what remains is an
//! assignment to the case's symbols (input dimensions and numeric
//! attributes). Planning produces those assignments: boundary points first,
//! then random interior points biased towards what already executed.

use opfuzz_common::{AssignmentStrategy, DType, TensorSpec};
use opfuzz_ops::{
    Assignment, CaseKey, Domain, FiniteDomainSolver, OpInstance, Problem, RuleTemplate, Signature, Solver, Var,
};
use rand::Rng;
use std::collections::BTreeMap;

pub(crate) struct CaseSpace<'a> {
    pub signature: &'a Signature,
    pub key: &'a CaseKey,
    pub symbols: Vec<Var>,
    pub domains: BTreeMap<Var, Domain>,
    dim_max: i64,
}

impl<'a> CaseSpace<'a> {
    pub fn new(signature: &'a Signature, key: &'a CaseKey, dim_max: usize) -> Self {
        let dim_max = dim_max.max(1) as i64;
        let symbols = signature.symbols(key);
        let domains = symbols
            .iter()
            .map(|&var| {
                let domain = match var {
                    Var::Attr(index) => {
                        let (lo, hi) = signature.attrs[index].domain.bounds();
                        Domain::new(lo, hi)
                    }
                    _ => Domain::new(0, dim_max),
                };
                (var, domain)
            })
            .collect();
        Self { signature, key, symbols, domains, dim_max }
    }

    fn domain(&self, var: Var) -> Domain {
        self.domains.get(&var).copied().unwrap_or(Domain::point(0))
    }

    fn clamp(&self, var: Var, value: i64) -> i64 {
        let d = self.domain(var);
        value.clamp(d.lo, d.hi)
    }

    /// Materialize an assignment as a concrete instance with `dtypes`.
    pub fn instance(&self, dtypes: &[DType], env: &Assignment) -> OpInstance {
        let inputs = self
            .key
            .ranks
            .iter()
            .zip(dtypes)
            .enumerate()
            .map(|(input, (&rank, &dtype))| {
                let shape: Vec<usize> = (0..rank)
                    .map(|axis| env.get(&Var::dim(input, axis)).copied().unwrap_or(1).max(0) as usize)
                    .collect();
                TensorSpec::new(shape, dtype)
            })
            .collect();
        let numeric: Vec<i64> = self
            .signature
            .numeric_indices()
            .map(|index| env.get(&Var::Attr(index)).copied().unwrap_or_else(|| self.domain(Var::Attr(index)).lo))
            .collect();
        OpInstance::new(inputs, self.signature.attrs_for(self.key, &numeric))
    }

    fn with_dims(&self, dim: impl Fn(Var) -> i64, attr: impl Fn(usize, Var) -> i64) -> Assignment {
        let mut attr_index = 0;
        self.symbols
            .iter()
            .map(|&var| {
                let value = match var {
                    Var::Attr(_) => {
                        attr_index += 1;
                        attr(attr_index - 1, var)
                    }
                    _ => dim(var),
                };
                (var, value)
            })
            .collect()
    }

    /// Rank-boundary and size-boundary points: all ones, all at the maximum,
    /// each dimension zero in turn and each dimension two in turn, crossed
    /// with attributes at their edges.
    pub fn boundary(&self) -> Vec<Assignment> {
        let mut points: Vec<Assignment> = Vec::new();
        let mut push = |env: Assignment| {
            if !points.contains(&env) {
                points.push(env);
            }
        };
        let patterns: [&dyn Fn(usize, Var) -> i64; 4] = [
            &|k, var| self.clamp(var, k as i64),
            &|_, var| self.domain(var).lo,
            &|_, var| self.domain(var).hi,
            &|_, var| self.clamp(var, 0),
        ];
        for base in [1, self.dim_max] {
            for pattern in patterns {
                push(self.with_dims(|_| base, pattern));
            }
        }
        let ascending = |k: usize, var: Var| self.clamp(var, k as i64);
        for &target in self.symbols.iter().filter(|v| matches!(v, Var::Dim { .. })) {
            for value in [0, 2] {
                push(self.with_dims(|var| if var == target { value } else { 1 }, ascending));
            }
        }
        points
    }

    /// A random point: a small mutation of a point that executed, or a fresh
    /// sample that favours repeated and unit dimensions.
    pub fn random<R: Rng + ?Sized>(&self, rng: &mut R, executed: &[Assignment]) -> Assignment {
        if !executed.is_empty() && rng.random_bool(0.6) {
            let mut env = executed[rng.random_range(0..executed.len())].clone();
            if self.symbols.is_empty() {
                return env;
            }
            for _ in 0..rng.random_range(1..=2) {
                let var = self.symbols[rng.random_range(0..self.symbols.len())];
                let current = env.get(&var).copied().unwrap_or(1);
                let value = match rng.random_range(0..3) {
                    0 => self.sample(rng, var),
                    1 => {
                        let other = self.symbols[rng.random_range(0..self.symbols.len())];
                        env.get(&other).copied().unwrap_or(current)
                    }
                    _ if rng.random_bool(0.5) => current + 1,
                    _ => current - 1,
                };
                env.insert(var, self.clamp(var, value));
            }
            return env;
        }
        let mut env = Assignment::new();
        for &var in &self.symbols {
            let earlier: Vec<i64> = env.iter().filter(|(v, _)| matches!(v, Var::Dim { .. })).map(|(_, &x)| x).collect();
            let value = if !earlier.is_empty() && rng.random_bool(0.3) {
                self.clamp(var, earlier[rng.random_range(0..earlier.len())])
            } else {
                self.sample(rng, var)
            };
            env.insert(var, value);
        }
        env
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, var: Var) -> i64 {
        let domain = self.domain(var);
        match var {
            Var::Attr(_) => rng.random_range(domain.lo..=domain.hi),
            _ if rng.random_bool(0.05) => 0,
            _ if rng.random_bool(0.2) => 1,
            _ => rng.random_range(1..=self.dim_max),
        }
    }

    /// A point the hand-written template considers valid, if it has one.
    pub fn template_sample(&self, template: RuleTemplate, seed: u64) -> Option<Assignment> {
        let shape = template.instantiate(self.signature, self.key)?;
        let mut problem = Problem::new();
        for &var in &self.symbols {
            let domain = match var {
                Var::Attr(_) => self.domain(var),
                _ => Domain::new(1, self.dim_max),
            };
            problem.bind(var, domain);
        }
        problem.require_all(&shape.constraint);
        let mut solver = FiniteDomainSolver::new(AssignmentStrategy::Random, seed).with_node_limit(4_096);
        let model = solver.solve(&problem).ok()?.into_model()?;
        Some(self.symbols.iter().filter_map(|v| model.get(v).map(|&x| (*v, x))).collect())
    }

    /// The first point to try: a template sample, else all ones with
    /// ascending attributes.
    pub fn anchor(&self, template: RuleTemplate, seed: u64) -> Assignment {
        self.template_sample(template, seed)
            .unwrap_or_else(|| self.with_dims(|_| 1, |k, var| self.clamp(var, k as i64)))
    }
}

/// Restrict an instance's environment to the case's symbols.
pub(crate) fn symbol_env(symbols: &[Var], instance: &OpInstance) -> Assignment {
    let env = instance.env();
    symbols.iter().filter_map(|v| env.get(v).map(|&x| (*v, x))).collect()
}
