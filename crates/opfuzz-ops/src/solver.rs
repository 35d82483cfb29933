//! Constraint solving behind a narrow interface.
//!
//! Graph construction and rule inference only ever see [`Solver`]: a problem
//! goes in, a satisfying assignment (or a verdict that none was found) comes
//! out. [`FiniteDomainSolver`] is the in-tree implementation: backtracking
//! over bounded integer domains with unit propagation of equalities.

use crate::expr::{Assignment, Expr, Var};
use crate::formula::{Atom, Clause, Cmp, Formula, Status};
use opfuzz_common::AssignmentStrategy;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::trace;

/// Inclusive integer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub lo: i64,
    pub hi: i64,
}

impl Domain {
    pub const fn new(lo: i64, hi: i64) -> Self {
        Self { lo, hi }
    }

    pub const fn point(value: i64) -> Self {
        Self { lo: value, hi: value }
    }

    pub fn is_empty(&self) -> bool {
        self.lo > self.hi
    }

    pub fn contains(&self, value: i64) -> bool {
        (self.lo..=self.hi).contains(&value)
    }

    pub fn size(&self) -> u64 {
        if self.is_empty() { 0 } else { self.hi.abs_diff(self.lo).saturating_add(1) }
    }

    pub fn intersect(self, other: Domain) -> Domain {
        Domain::new(self.lo.max(other.lo), self.hi.min(other.hi))
    }
}

/// A formula plus a finite domain for every variable it mentions.
#[derive(Debug, Clone, Default)]
pub struct Problem {
    pub formula: Formula,
    pub domains: BTreeMap<Var, Domain>,
}

impl Problem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `var`, intersecting with any existing domain.
    pub fn bind(&mut self, var: Var, domain: Domain) {
        let entry = self.domains.entry(var).or_insert(domain);
        *entry = entry.intersect(domain);
    }

    pub fn fix(&mut self, var: Var, value: i64) {
        self.bind(var, Domain::point(value));
    }

    pub fn require(&mut self, atom: Atom) {
        self.formula.push_atom(atom);
    }

    pub fn require_clause(&mut self, clause: Clause) {
        self.formula.push(clause);
    }

    pub fn require_all(&mut self, formula: &Formula) {
        self.formula.extend(formula);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveOutcome {
    Sat(Assignment),
    Unsat,
    /// The search gave up (node limit, or sampling of a large domain ran out).
    Unknown,
}

impl SolveOutcome {
    pub fn into_model(self) -> Option<Assignment> {
        match self {
            SolveOutcome::Sat(model) => Some(model),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolverError {
    #[error("variable {0} appears in the formula without a domain")]
    Unbounded(Var),
}

/// Pluggable satisfiability oracle.
pub trait Solver {
    fn solve(&mut self, problem: &Problem) -> Result<SolveOutcome, SolverError>;
}

const DEFAULT_NODE_LIMIT: usize = 20_000;
const SHUFFLE_LIMIT: u64 = 128;
const SAMPLES: usize = 48;

/// Backtracking finite-domain solver.
///
/// The value order of each decision follows the configured
/// [`AssignmentStrategy`], which is how callers pick among multiple
/// satisfying assignments.
#[derive(Debug, Clone)]
pub struct FiniteDomainSolver {
    strategy: AssignmentStrategy,
    rng: ChaCha8Rng,
    node_limit: usize,
}

impl FiniteDomainSolver {
    pub fn new(strategy: AssignmentStrategy, seed: u64) -> Self {
        Self { strategy, rng: ChaCha8Rng::seed_from_u64(seed), node_limit: DEFAULT_NODE_LIMIT }
    }

    pub fn with_node_limit(mut self, node_limit: usize) -> Self {
        self.node_limit = node_limit.max(1);
        self
    }

    pub fn strategy(&self) -> AssignmentStrategy {
        self.strategy
    }
}

impl Solver for FiniteDomainSolver {
    fn solve(&mut self, problem: &Problem) -> Result<SolveOutcome, SolverError> {
        let vars = problem.formula.vars();
        if let Some(var) = vars.iter().find(|v| !problem.domains.contains_key(v)) {
            return Err(SolverError::Unbounded(*var));
        }
        if problem.domains.values().any(Domain::is_empty) {
            return Ok(SolveOutcome::Unsat);
        }

        // Defined variables (outputs) go last; the rest smallest domain first.
        let mut order: Vec<Var> = problem.domains.keys().copied().collect();
        order.sort_by_key(|v| (matches!(v, Var::Out { .. }), problem.domains[v].size(), *v));

        let clause_vars = problem
            .formula
            .clauses()
            .iter()
            .map(|c| {
                let mut set = BTreeSet::new();
                c.collect_vars(&mut set);
                set
            })
            .collect();

        let mut search = Search {
            problem,
            clause_vars,
            order,
            strategy: self.strategy,
            rng: &mut self.rng,
            nodes: 0,
            limit: self.node_limit,
            gave_up: false,
            sampled: false,
        };
        let found = search.run(Assignment::new());
        let outcome = match found {
            Some(model) => SolveOutcome::Sat(model),
            None if search.gave_up || search.sampled => SolveOutcome::Unknown,
            None => SolveOutcome::Unsat,
        };
        trace!(
            target: "opfuzz::smt",
            nodes = search.nodes,
            vars = problem.domains.len(),
            clauses = problem.formula.len(),
            sat = matches!(outcome, SolveOutcome::Sat(_)),
            "solve finished"
        );
        Ok(outcome)
    }
}

struct Search<'a> {
    problem: &'a Problem,
    clause_vars: Vec<BTreeSet<Var>>,
    order: Vec<Var>,
    strategy: AssignmentStrategy,
    rng: &'a mut ChaCha8Rng,
    nodes: usize,
    limit: usize,
    gave_up: bool,
    sampled: bool,
}

impl Search<'_> {
    fn run(&mut self, mut env: Assignment) -> Option<Assignment> {
        self.nodes += 1;
        if self.nodes > self.limit {
            self.gave_up = true;
            return None;
        }
        if !self.propagate(&mut env) {
            return None;
        }
        let Some(var) = self.order.iter().copied().find(|v| !env.contains_key(v)) else {
            return self.problem.formula.eval(&env).then_some(env);
        };
        for value in self.values(var) {
            let mut next = env.clone();
            next.insert(var, value);
            if let Some(model) = self.run(next) {
                return Some(model);
            }
            if self.gave_up {
                return None;
            }
        }
        None
    }

    /// Assign variables forced by unit equalities until fixpoint. Returns
    /// `false` on a conflict.
    fn propagate(&self, env: &mut Assignment) -> bool {
        loop {
            let mut changed = false;
            for (clause, vars) in self.problem.formula.clauses().iter().zip(&self.clause_vars) {
                match clause.status(env) {
                    Status::False => return false,
                    Status::True => continue,
                    Status::Open => {}
                }
                let [atom] = clause.atoms() else { continue };
                if atom.cmp != Cmp::Eq {
                    continue;
                }
                let mut unbound = vars.iter().filter(|v| !env.contains_key(v));
                let (Some(&var), None) = (unbound.next(), unbound.next()) else { continue };
                let domain = self.problem.domains[&var];
                match forced_value(atom, var, env, domain) {
                    Forced::Value(value) if domain.contains(value) => {
                        env.insert(var, value);
                        changed = true;
                    }
                    Forced::Value(_) | Forced::Conflict => return false,
                    Forced::Unknown => {}
                }
            }
            if !changed {
                return true;
            }
        }
    }

    fn values(&mut self, var: Var) -> Vec<i64> {
        let domain = self.problem.domains[&var];
        let size = domain.size();
        match self.strategy {
            AssignmentStrategy::Smallest | AssignmentStrategy::Largest if size <= SHUFFLE_LIMIT * 8 => {
                let mut values: Vec<i64> = (domain.lo..=domain.hi).collect();
                if self.strategy == AssignmentStrategy::Largest {
                    values.reverse();
                }
                values
            }
            AssignmentStrategy::Random if size <= SHUFFLE_LIMIT => {
                let mut values: Vec<i64> = (domain.lo..=domain.hi).collect();
                values.shuffle(&mut *self.rng);
                values
            }
            strategy => {
                self.sampled = true;
                let mut values: Vec<i64> = match strategy {
                    AssignmentStrategy::Smallest => (0..SAMPLES as i64).map(|i| domain.lo + i).collect(),
                    AssignmentStrategy::Largest => (0..SAMPLES as i64).map(|i| domain.hi - i).collect(),
                    AssignmentStrategy::Random => {
                        (0..SAMPLES).map(|_| self.rng.random_range(domain.lo..=domain.hi)).collect()
                    }
                };
                values.push(domain.lo);
                values.push(domain.hi);
                values.dedup();
                values
            }
        }
    }
}

enum Forced {
    Value(i64),
    Conflict,
    Unknown,
}

/// Derive the value of `var` from `lhs == rhs` with every other variable
/// bound.
///
/// A bare variable on one side is a definition and yields an exact value.
/// Otherwise the equation is probed at three points; if it behaves linearly
/// there, the root is computed and verified.
fn forced_value(atom: &Atom, var: Var, env: &Assignment, domain: Domain) -> Forced {
    let defined = match (&atom.lhs, &atom.rhs) {
        (Expr::Var(v), other) | (other, Expr::Var(v)) if *v == var && !other.vars().contains(&var) => {
            Some(other)
        }
        _ => None,
    };
    if let Some(expr) = defined {
        return match expr.eval(env) {
            Some(value) => Forced::Value(value),
            None => Forced::Conflict,
        };
    }

    let mut probe = env.clone();
    let mut f = |x: i64| {
        probe.insert(var, x);
        Some(atom.lhs.eval(&probe)?.checked_sub(atom.rhs.eval(&probe)?)?)
    };
    let x0 = domain.lo;
    let (Some(f0), Some(f1), Some(f2)) = (f(x0), f(x0 + 1), f(x0 + 2)) else {
        return Forced::Unknown;
    };
    let slope = f1 - f0;
    if slope == 0 || f2 - f1 != slope || f0 % slope != 0 {
        return Forced::Unknown;
    }
    let root = x0 - f0 / slope;
    if f(root) == Some(0) { Forced::Value(root) } else { Forced::Unknown }
}
