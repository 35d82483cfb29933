//! Validity predicates: per-case dtype tables, constraint formulas and
//! output shape rules.

use crate::expr::{Expr, Var};
use crate::formula::{Atom, Formula};
use crate::signature::{CaseKey, OpInstance, Signature};
use crate::template::RuleTemplate;
use opfuzz_common::{DType, TensorSpec};
use serde::{Deserialize, Serialize};

/// An accepted input dtype tuple and the output dtypes it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtypeRule {
    pub inputs: Vec<DType>,
    pub outputs: Vec<DType>,
}

/// Everything known about one case of an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRule {
    pub key: CaseKey,
    pub dtypes: Vec<DtypeRule>,
    /// Constraint over input dimensions and numeric attributes.
    pub constraint: Formula,
    /// One expression per axis, per output.
    pub outputs: Vec<Vec<Expr>>,
}

impl CaseRule {
    pub fn dtype_rule(&self, inputs: &[DType]) -> Option<&DtypeRule> {
        self.dtypes.iter().find(|r| r.inputs == inputs)
    }

    pub fn output_ranks(&self) -> Vec<usize> {
        self.outputs.iter().map(Vec::len).collect()
    }

    /// Output specs for `instance`, or `None` if the case rejects it.
    pub fn output_specs(&self, instance: &OpInstance) -> Option<Vec<TensorSpec>> {
        let rule = self.dtype_rule(&instance.dtypes())?;
        let env = instance.env();
        if !self.constraint.eval(&env) {
            return None;
        }
        self.outputs
            .iter()
            .zip(&rule.outputs)
            .map(|(shape, &dtype)| {
                let dims = shape
                    .iter()
                    .map(|e| e.eval(&env).and_then(|d| usize::try_from(d).ok()))
                    .collect::<Option<Vec<_>>>()?;
                Some(TensorSpec::new(dims, dtype))
            })
            .collect()
    }

    pub fn accepts(&self, instance: &OpInstance) -> bool {
        self.output_specs(instance).is_some()
    }

    /// `Out(o, k) == expr` for every output axis.
    pub fn output_formula(&self) -> Formula {
        let mut formula = Formula::new();
        for (output, shape) in self.outputs.iter().enumerate() {
            for (axis, expr) in shape.iter().enumerate() {
                formula.push_atom(Atom::eq(Expr::v(Var::out(output, axis)), expr.clone()));
            }
        }
        formula
    }
}

/// Learned approximation of "this instantiation executes and produces
/// finite output". Instances whose case is unknown are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidityPredicate {
    pub cases: Vec<CaseRule>,
}

impl ValidityPredicate {
    /// The predicate that accepts nothing.
    pub fn reject_all() -> Self {
        Self::default()
    }

    /// Hand-written prior: the template's shape semantics for every case it
    /// covers, same-dtype inputs only, every dimension at least 1.
    pub fn from_template(signature: &Signature, template: RuleTemplate) -> Self {
        let dtypes: Vec<DtypeRule> = signature
            .uniform_dtype_tuples()
            .into_iter()
            .map(|inputs| DtypeRule { outputs: vec![inputs[0]; signature.outputs], inputs })
            .collect();
        if dtypes.is_empty() {
            return Self::reject_all();
        }
        let cases = signature
            .case_keys()
            .into_iter()
            .filter_map(|key| {
                let shape = template.instantiate(signature, &key)?;
                let mut constraint = shape.constraint;
                for var in signature.symbols(&key) {
                    if matches!(var, Var::Dim { .. }) {
                        constraint.push_atom(Atom::ge(Expr::v(var), Expr::c(1)));
                    }
                }
                Some(CaseRule { key, dtypes: dtypes.clone(), constraint, outputs: shape.outputs })
            })
            .collect();
        Self { cases }
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn case(&self, key: &CaseKey) -> Option<&CaseRule> {
        self.cases.iter().find(|c| &c.key == key)
    }

    pub fn case_mut(&mut self, key: &CaseKey) -> Option<&mut CaseRule> {
        self.cases.iter_mut().find(|c| &c.key == key)
    }

    /// Insert or replace the rule for `rule.key`, keeping cases sorted.
    pub fn upsert(&mut self, rule: CaseRule) {
        match self.cases.binary_search_by(|c| c.key.cmp(&rule.key)) {
            Ok(i) => self.cases[i] = rule,
            Err(i) => self.cases.insert(i, rule),
        }
    }

    pub fn remove(&mut self, key: &CaseKey) -> Option<CaseRule> {
        let i = self.cases.iter().position(|c| &c.key == key)?;
        Some(self.cases.remove(i))
    }

    pub fn output_specs(&self, signature: &Signature, instance: &OpInstance) -> Option<Vec<TensorSpec>> {
        if !signature.admits(instance) {
            return None;
        }
        self.case(&signature.case_key(instance))?.output_specs(instance)
    }

    pub fn accepts(&self, signature: &Signature, instance: &OpInstance) -> bool {
        self.output_specs(signature, instance).is_some()
    }
}
