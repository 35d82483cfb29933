//! Hand-written shape semantics.
//!
//! A template describes how an operator family maps input shapes to output
//! shapes and which relations its inputs must satisfy. The registry uses
//! templates as prior predicates; rule inference tries them before falling
//! back to synthesis and keeps them only when they agree with every probe.

use crate::expr::Expr;
use crate::formula::{Atom, Clause, Formula};
use crate::signature::{CaseKey, Signature};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTemplate {
    /// Output shape equals the single input's shape.
    Elementwise,
    /// Numpy-style right-aligned broadcasting of two inputs.
    Broadcast,
    /// Attributes `[axis, keepdim]`.
    Reduce,
    /// Attribute `[axis]`; shape preserving.
    Softmax,
    /// Equal-rank batched matrix product.
    Matmul,
    /// Attribute `[axis]`; two equal-rank inputs.
    Concat,
    /// Attributes `[dim0, dim1]`.
    Transpose,
    /// Attributes `[axis, start, end]`.
    Slice,
    /// No prior; everything must be learned.
    None,
}

/// Shape semantics of one case.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeRule {
    pub constraint: Formula,
    pub outputs: Vec<Vec<Expr>>,
}

fn axis_of(key: &CaseKey, slot: usize, rank: usize) -> Option<usize> {
    let axis = usize::try_from(*key.structural.get(slot)?).ok()?;
    (axis < rank).then_some(axis)
}

impl RuleTemplate {
    /// Shape rule for `key`, or `None` when the template says the case is
    /// invalid (an out-of-range axis, mismatched ranks).
    pub fn instantiate(self, signature: &Signature, key: &CaseKey) -> Option<ShapeRule> {
        let ranks = &key.ranks;
        let dims = |input: usize| (0..ranks[input]).map(move |axis| Expr::dim(input, axis));
        let mut constraint = Formula::new();
        let outputs = match self {
            RuleTemplate::None => return None,
            RuleTemplate::Elementwise => vec![dims(0).collect()],
            RuleTemplate::Softmax => {
                axis_of(key, 0, ranks[0])?;
                vec![dims(0).collect()]
            }
            RuleTemplate::Broadcast => {
                let (r0, r1) = (ranks[0], ranks[1]);
                let r = r0.max(r1);
                let mut shape = Vec::with_capacity(r);
                for k in 0..r {
                    let a = (k + r0).checked_sub(r).map(|axis| Expr::dim(0, axis));
                    let b = (k + r1).checked_sub(r).map(|axis| Expr::dim(1, axis));
                    match (a, b) {
                        (Some(a), Some(b)) => {
                            constraint.push(Clause::any([
                                Atom::eq(a.clone(), b.clone()),
                                Atom::eq(a.clone(), Expr::c(1)),
                                Atom::eq(b.clone(), Expr::c(1)),
                            ]));
                            shape.push(a.max(b));
                        }
                        (Some(only), None) | (None, Some(only)) => shape.push(only),
                        (None, None) => return None,
                    }
                }
                vec![shape]
            }
            RuleTemplate::Reduce => {
                let axis = axis_of(key, 0, ranks[0])?;
                let keepdim = *key.structural.get(1)? != 0;
                let shape = dims(0)
                    .enumerate()
                    .filter_map(|(k, d)| match (k == axis, keepdim) {
                        (false, _) => Some(d),
                        (true, true) => Some(Expr::c(1)),
                        (true, false) => None,
                    })
                    .collect();
                vec![shape]
            }
            RuleTemplate::Matmul => {
                let r = ranks[0];
                if r < 2 || ranks[1] != r {
                    return None;
                }
                let mut shape = Vec::with_capacity(r);
                for k in 0..r - 2 {
                    constraint.push_atom(Atom::eq(Expr::dim(0, k), Expr::dim(1, k)));
                    shape.push(Expr::dim(0, k));
                }
                constraint.push_atom(Atom::eq(Expr::dim(0, r - 1), Expr::dim(1, r - 2)));
                shape.push(Expr::dim(0, r - 2));
                shape.push(Expr::dim(1, r - 1));
                vec![shape]
            }
            RuleTemplate::Concat => {
                let r = ranks[0];
                if ranks[1] != r {
                    return None;
                }
                let axis = axis_of(key, 0, r)?;
                let mut shape = Vec::with_capacity(r);
                for k in 0..r {
                    if k == axis {
                        shape.push(Expr::dim(0, k) + Expr::dim(1, k));
                    } else {
                        constraint.push_atom(Atom::eq(Expr::dim(0, k), Expr::dim(1, k)));
                        shape.push(Expr::dim(0, k));
                    }
                }
                vec![shape]
            }
            RuleTemplate::Transpose => {
                let r = ranks[0];
                let d0 = axis_of(key, 0, r)?;
                let d1 = axis_of(key, 1, r)?;
                let mut shape: Vec<Expr> = dims(0).collect();
                shape.swap(d0, d1);
                vec![shape]
            }
            RuleTemplate::Slice => {
                let axis = axis_of(key, 0, ranks[0])?;
                let (start, end) = (Expr::attr(1), Expr::attr(2));
                constraint.push_atom(Atom::ge(start.clone(), Expr::c(0)));
                constraint.push_atom(Atom::lt(start.clone(), end.clone()));
                constraint.push_atom(Atom::le(end.clone(), Expr::dim(0, axis)));
                let mut shape: Vec<Expr> = dims(0).collect();
                shape[axis] = end - start;
                vec![shape]
            }
        };
        if outputs.len() != signature.outputs {
            return None;
        }
        Some(ShapeRule { constraint, outputs })
    }
}
