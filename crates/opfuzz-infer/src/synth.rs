//! Rule synthesis from labelled probes.
//!
//! Given the probes of one case, build the tightest [`CaseRule`] the data
//! supports: a dtype table, output shape expressions that reproduce every
//! executed probe, and a conjunctive constraint that holds on every executed
//! probe while excluding every failed one. Failures no conjunctive atom can
//! separate are excluded point by point.

use crate::plan::symbol_env;
use crate::probe::ProbeRecord;
use opfuzz_common::DType;
use opfuzz_ops::{
    Assignment, Atom, BinOp, CaseKey, CaseRule, Clause, DtypeRule, Expr, Formula, RuleTemplate, ShapeRule, Signature,
    Var,
};
use std::collections::HashMap;
use tracing::debug;

const MAX_ATOMS: usize = 16;
const MAX_DEPTH: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Synthesis {
    pub rule: CaseRule,
    /// The hand-written template explained every probe unaided.
    pub from_template: bool,
}

/// Synthesize a rule for `key`, or `None` when nothing executed or the
/// executed probes disagree on output ranks.
///
/// `accepted` lists the dtype tuples seen to execute; failures under other
/// tuples are already excluded by the dtype table.
pub(crate) fn synthesize(
    signature: &Signature,
    key: &CaseKey,
    template: RuleTemplate,
    records: &[ProbeRecord],
    accepted: &[Vec<DType>],
) -> Option<Synthesis> {
    let symbols = signature.symbols(key);
    let table = resolve_conflicts(&symbols, records, accepted.to_vec());

    let successes: Vec<(&ProbeRecord, Assignment)> = records
        .iter()
        .filter(|r| r.label.executed() && table.contains(&r.instance.dtypes()))
        .map(|r| (r, symbol_env(&symbols, &r.instance)))
        .collect();
    let failures: Vec<(&ProbeRecord, Assignment)> = records
        .iter()
        .filter(|r| !r.label.executed() && table.contains(&r.instance.dtypes()))
        .map(|r| (r, symbol_env(&symbols, &r.instance)))
        .collect();
    let (first, _) = successes.first()?;

    let ranks: Vec<usize> = first.outputs.iter().map(|s| s.rank()).collect();
    if successes.iter().any(|(r, _)| r.outputs.iter().map(|s| s.rank()).ne(ranks.iter().copied())) {
        debug!(target: "opfuzz::infer", case = %key, "output ranks disagree across executions");
        return None;
    }
    let dtypes: Vec<DtypeRule> = table
        .iter()
        .filter_map(|tuple| {
            let (record, _) = successes.iter().find(|(r, _)| &r.instance.dtypes() == tuple)?;
            Some(DtypeRule { inputs: tuple.clone(), outputs: record.outputs.iter().map(|s| s.dtype).collect() })
        })
        .collect();

    let success_envs: Vec<Assignment> = successes.iter().map(|(_, env)| env.clone()).collect();
    let observed: Vec<Vec<Vec<i64>>> = (0..ranks.len())
        .map(|output| {
            (0..ranks[output])
                .map(|axis| successes.iter().map(|(r, _)| r.outputs[output].shape[axis] as i64).collect())
                .collect()
        })
        .collect();

    let shape = template.instantiate(signature, key);
    let template_outputs = shape.as_ref().filter(|s| reproduces(&s.outputs, &success_envs, &observed));
    let outputs = match template_outputs {
        Some(shape) => shape.outputs.clone(),
        None => {
            let mut pool = ExprPool::new(&aliases(&symbols, &success_envs), &success_envs);
            let mut outputs = Vec::with_capacity(observed.len());
            for axes in &observed {
                let mut shape = Vec::with_capacity(axes.len());
                for target in axes {
                    let Some(expr) = pool.find(target) else {
                        debug!(target: "opfuzz::infer", case = %key, "no expression reproduces an output dimension");
                        return None;
                    };
                    shape.push(expr);
                }
                outputs.push(shape);
            }
            outputs
        }
    };

    let mut constraint = shape.as_ref().map(|s| seed_constraint(s, &symbols, &success_envs)).unwrap_or_default();
    let mut remaining: Vec<&Assignment> = failures.iter().map(|(_, env)| env).filter(|f| constraint.eval(f)).collect();
    let from_template = template_outputs.is_some() && remaining.is_empty();

    let candidates = candidate_atoms(&symbols, &success_envs);
    let mut added = 0;
    while !remaining.is_empty() && added < MAX_ATOMS {
        let Some(best) = pick(&candidates, &remaining) else { break };
        constraint.push_atom(best.clone());
        remaining.retain(|f| best.eval(f));
        added += 1;
    }
    for failure in remaining {
        constraint.push(Clause::any(
            symbols.iter().filter_map(|s| failure.get(s).map(|&v| Atom::ne(Expr::v(*s), Expr::c(v)))),
        ));
    }

    let rule = CaseRule { key: key.clone(), dtypes, constraint, outputs };
    if let Some((record, _)) = failures.iter().find(|(r, _)| rule.accepts(&r.instance)) {
        debug!(target: "opfuzz::infer", case = %key, instance = ?record.instance, "rule still accepts a failed probe");
        return None;
    }
    Some(Synthesis { rule, from_template })
}

/// Drop dtype tuples whose failures coincide with an executed point: the
/// difference is in the dtype, not the shape.
fn resolve_conflicts(symbols: &[Var], records: &[ProbeRecord], mut table: Vec<Vec<DType>>) -> Vec<Vec<DType>> {
    loop {
        let executed: Vec<Assignment> = records
            .iter()
            .filter(|r| r.label.executed() && table.contains(&r.instance.dtypes()))
            .map(|r| symbol_env(symbols, &r.instance))
            .collect();
        let conflict = records.iter().find(|r| {
            !r.label.executed()
                && table.contains(&r.instance.dtypes())
                && executed.contains(&symbol_env(symbols, &r.instance))
        });
        match conflict {
            Some(record) => {
                let tuple = record.instance.dtypes();
                debug!(target: "opfuzz::infer", ?tuple, "dtype tuple both executed and failed at one point; dropped");
                table.retain(|t| *t != tuple);
            }
            None => return table,
        }
    }
}

fn reproduces(outputs: &[Vec<Expr>], envs: &[Assignment], observed: &[Vec<Vec<i64>>]) -> bool {
    outputs.len() == observed.len()
        && outputs.iter().zip(observed).all(|(shape, axes)| {
            shape.len() == axes.len()
                && shape
                    .iter()
                    .zip(axes)
                    .all(|(expr, values)| envs.iter().zip(values).all(|(env, &v)| expr.eval(env) == Some(v)))
        })
}

/// The template's constraint, with every dimension at least one when the
/// data allows it, if it holds on every execution.
fn seed_constraint(shape: &ShapeRule, symbols: &[Var], successes: &[Assignment]) -> Formula {
    let mut nonempty = shape.constraint.clone();
    for &var in symbols.iter().filter(|v| matches!(v, Var::Dim { .. })) {
        nonempty.push_atom(Atom::ge(Expr::v(var), Expr::c(1)));
    }
    [nonempty, shape.constraint.clone()]
        .into_iter()
        .find(|f| successes.iter().all(|env| f.eval(env)))
        .unwrap_or_default()
}

/// One representative per class of symbols equal on every execution.
fn aliases(symbols: &[Var], envs: &[Assignment]) -> Vec<Var> {
    let mut representatives: Vec<Var> = Vec::new();
    for &var in symbols {
        let same = |rep: &Var| envs.iter().all(|env| env.get(rep) == env.get(&var));
        if !representatives.iter().any(same) {
            representatives.push(var);
        }
    }
    representatives
}

struct Candidate {
    atom: Atom,
    /// Compares two symbols.
    relational: bool,
    /// Sums and offset differences; tried only when nothing simpler helps.
    compound: bool,
}

/// Atoms over single symbols and symbol pairs that hold on every execution.
fn candidate_atoms(symbols: &[Var], successes: &[Assignment]) -> Vec<Candidate> {
    let bounds = |expr: &Expr| -> Option<(i64, i64)> {
        let values = successes.iter().map(|env| expr.eval(env)).collect::<Option<Vec<_>>>()?;
        Some((*values.iter().min()?, *values.iter().max()?))
    };
    let mut out = Vec::new();
    for &s in symbols {
        let e = Expr::v(s);
        let Some((lo, hi)) = bounds(&e) else { continue };
        let single = |atom| Candidate { atom, relational: false, compound: false };
        out.push(single(Atom::ge(e.clone(), Expr::c(lo))));
        if lo == hi {
            out.push(single(Atom::eq(e.clone(), Expr::c(lo))));
        }
        out.push(single(Atom::le(e, Expr::c(hi))));
    }
    for (i, &a) in symbols.iter().enumerate() {
        for &b in &symbols[i + 1..] {
            let (va, vb) = (Expr::v(a), Expr::v(b));
            for (x, y, pair_first) in [(a, b, true), (b, a, false)] {
                let Some((lo, hi)) = bounds(&(Expr::v(x) - Expr::v(y))) else { continue };
                let (ex, ey) = (Expr::v(x), Expr::v(y));
                let relational = |atom| Candidate { atom, relational: true, compound: false };
                let compound = |atom| Candidate { atom, relational: true, compound: true };
                if lo == hi && pair_first {
                    out.push(if lo == 0 {
                        relational(Atom::eq(ex.clone(), ey.clone()))
                    } else {
                        compound(Atom::eq(ex.clone() - ey.clone(), Expr::c(lo)))
                    });
                }
                out.push(match lo {
                    0 => relational(Atom::ge(ex, ey)),
                    1 => relational(Atom::gt(ex, ey)),
                    _ => compound(Atom::ge(ex - ey, Expr::c(lo))),
                });
            }
            let sum = va + vb;
            if let Some((lo, hi)) = bounds(&sum) {
                out.push(Candidate { atom: Atom::ge(sum.clone(), Expr::c(lo)), relational: true, compound: true });
                out.push(Candidate { atom: Atom::le(sum, Expr::c(hi)), relational: true, compound: true });
            }
        }
    }
    out
}

/// The atom refuting the most remaining failures. Simple atoms beat
/// compound ones; among equals, relational atoms and then earlier ones win.
fn pick<'c>(candidates: &'c [Candidate], failures: &[&Assignment]) -> Option<&'c Atom> {
    for compound in [false, true] {
        let best = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.compound == compound)
            .map(|(i, c)| (failures.iter().filter(|f| !c.atom.eval(f)).count(), c.relational, std::cmp::Reverse(i), c))
            .filter(|(refuted, ..)| *refuted > 0)
            .max_by_key(|(refuted, relational, order, _)| (*refuted, *relational, *order));
        if let Some((.., c)) = best {
            return Some(&c.atom);
        }
    }
    None
}

/// Bottom-up enumeration of small expression trees, deduplicated by their
/// values on the executed probes.
struct ExprPool {
    exprs: Vec<Expr>,
    values: Vec<Vec<i64>>,
    index: HashMap<Vec<i64>, usize>,
    leaves: usize,
    levels: Vec<usize>,
}

impl ExprPool {
    fn new(symbols: &[Var], envs: &[Assignment]) -> Self {
        let mut pool = Self { exprs: Vec::new(), values: Vec::new(), index: HashMap::new(), leaves: 0, levels: vec![0] };
        let leaves = symbols.iter().map(|&s| Expr::v(s)).chain([Expr::c(1), Expr::c(2)]);
        for leaf in leaves {
            if let Some(values) = envs.iter().map(|env| leaf.eval(env)).collect::<Option<Vec<_>>>() {
                pool.insert(leaf, values);
            }
        }
        pool.leaves = pool.exprs.len();
        pool
    }

    fn insert(&mut self, expr: Expr, values: Vec<i64>) {
        if !self.index.contains_key(&values) {
            self.index.insert(values.clone(), self.exprs.len());
            self.exprs.push(expr);
            self.values.push(values);
        }
    }

    fn combine(&mut self, op: BinOp, a: usize, b: usize) {
        let values: Option<Vec<i64>> =
            self.values[a].iter().zip(&self.values[b]).map(|(&x, &y)| op.apply(x, y)).collect();
        if let Some(values) = values {
            self.insert(op.build(self.exprs[a].clone(), self.exprs[b].clone()), values);
        }
    }

    /// Add every tree one operator deeper. `false` once the depth cap is hit.
    fn grow(&mut self) -> bool {
        if self.levels.len() > MAX_DEPTH {
            return false;
        }
        let previous = *self.levels.last().unwrap_or(&0);
        let end = self.exprs.len();
        self.levels.push(end);
        let (outer, inner) = if previous == 0 { (0..end, 0..end) } else { (previous..end, 0..self.leaves) };
        for op in BinOp::ALL {
            for a in outer.clone() {
                for b in inner.clone() {
                    if previous == 0 && op.is_commutative() && b < a {
                        continue;
                    }
                    self.combine(op, a, b);
                    if previous != 0 {
                        self.combine(op, b, a);
                    }
                }
            }
        }
        true
    }

    fn find(&mut self, target: &[i64]) -> Option<Expr> {
        loop {
            if let Some(&i) = self.index.get(target) {
                return Some(self.exprs[i].clone());
            }
            if !self.grow() {
                return None;
            }
        }
    }
}
