//! Operator signature templates and concrete instantiations.

use crate::expr::{Assignment, Var};
use opfuzz_common::{DType, TensorSpec};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One positional input: admissible ranks and dtypes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSlot {
    pub min_rank: usize,
    pub max_rank: usize,
    pub dtypes: Vec<DType>,
}

impl InputSlot {
    pub fn new(min_rank: usize, max_rank: usize, dtypes: &[DType]) -> Self {
        Self { min_rank, max_rank, dtypes: dtypes.to_vec() }
    }

    pub fn admits(&self, spec: &TensorSpec) -> bool {
        (self.min_rank..=self.max_rank).contains(&spec.rank()) && self.dtypes.contains(&spec.dtype)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttrDomain {
    Int { min: i64, max: i64 },
    Bool,
}

impl AttrDomain {
    pub fn bounds(self) -> (i64, i64) {
        match self {
            AttrDomain::Int { min, max } => (min, max),
            AttrDomain::Bool => (0, 1),
        }
    }

    pub fn contains(self, value: i64) -> bool {
        let (lo, hi) = self.bounds();
        (lo..=hi).contains(&value)
    }

    pub fn values(self) -> impl Iterator<Item = i64> {
        let (lo, hi) = self.bounds();
        lo..=hi
    }
}

/// A named attribute.
///
/// Structural attributes have small domains and select a rule case (an
/// `axis`, a `keepdim` flag); numeric ones are solved like dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrSlot {
    pub name: String,
    pub domain: AttrDomain,
    pub structural: bool,
}

impl AttrSlot {
    pub fn structural(name: &str, domain: AttrDomain) -> Self {
        Self { name: name.to_string(), domain, structural: true }
    }

    pub fn numeric(name: &str, domain: AttrDomain) -> Self {
        Self { name: name.to_string(), domain, structural: false }
    }
}

/// Signature template of an operator kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub inputs: Vec<InputSlot>,
    pub attrs: Vec<AttrSlot>,
    pub outputs: usize,
}

/// Selects the rule case an instance falls into: input ranks plus the
/// values of structural attributes, in slot order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CaseKey {
    pub ranks: Vec<usize>,
    pub structural: Vec<i64>,
}

impl fmt::Display for CaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ranks={:?}", self.ranks)?;
        if !self.structural.is_empty() {
            write!(f, " attrs={:?}", self.structural)?;
        }
        Ok(())
    }
}

/// A concrete instantiation of a signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpInstance {
    pub inputs: Vec<TensorSpec>,
    pub attrs: Vec<i64>,
}

impl OpInstance {
    pub fn new(inputs: Vec<TensorSpec>, attrs: Vec<i64>) -> Self {
        Self { inputs, attrs }
    }

    pub fn dtypes(&self) -> Vec<DType> {
        self.inputs.iter().map(|s| s.dtype).collect()
    }

    /// Bind every input dimension and attribute variable.
    pub fn env(&self) -> Assignment {
        let mut env = Assignment::new();
        for (input, spec) in self.inputs.iter().enumerate() {
            for (axis, &d) in spec.shape.iter().enumerate() {
                env.insert(Var::dim(input, axis), d as i64);
            }
        }
        for (index, &value) in self.attrs.iter().enumerate() {
            env.insert(Var::Attr(index), value);
        }
        env
    }
}

impl Signature {
    pub fn structural_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.attrs.iter().enumerate().filter(|(_, a)| a.structural).map(|(i, _)| i)
    }

    pub fn numeric_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.attrs.iter().enumerate().filter(|(_, a)| !a.structural).map(|(i, _)| i)
    }

    /// Arity, slot ranks, slot dtypes and attribute domains all match.
    pub fn admits(&self, instance: &OpInstance) -> bool {
        instance.inputs.len() == self.inputs.len()
            && instance.attrs.len() == self.attrs.len()
            && self.inputs.iter().zip(&instance.inputs).all(|(slot, spec)| slot.admits(spec))
            && self.attrs.iter().zip(&instance.attrs).all(|(slot, &v)| slot.domain.contains(v))
    }

    pub fn case_key(&self, instance: &OpInstance) -> CaseKey {
        CaseKey {
            ranks: instance.inputs.iter().map(TensorSpec::rank).collect(),
            structural: self.structural_indices().filter_map(|i| instance.attrs.get(i).copied()).collect(),
        }
    }

    /// Every case key the signature admits, in lexicographic order.
    pub fn case_keys(&self) -> Vec<CaseKey> {
        let mut rank_choices: Vec<Vec<usize>> = vec![Vec::new()];
        for slot in &self.inputs {
            rank_choices = rank_choices
                .into_iter()
                .flat_map(|prefix| {
                    (slot.min_rank..=slot.max_rank).map(move |r| {
                        let mut next = prefix.clone();
                        next.push(r);
                        next
                    })
                })
                .collect();
        }
        let mut attr_choices: Vec<Vec<i64>> = vec![Vec::new()];
        for index in self.structural_indices() {
            let domain = self.attrs[index].domain;
            attr_choices = attr_choices
                .into_iter()
                .flat_map(|prefix| {
                    domain.values().map(move |v| {
                        let mut next = prefix.clone();
                        next.push(v);
                        next
                    })
                })
                .collect();
        }
        let mut keys = Vec::with_capacity(rank_choices.len() * attr_choices.len());
        for ranks in &rank_choices {
            for structural in &attr_choices {
                keys.push(CaseKey { ranks: ranks.clone(), structural: structural.clone() });
            }
        }
        keys
    }

    /// Dtype tuples the slots admit where every input shares one dtype.
    pub fn uniform_dtype_tuples(&self) -> Vec<Vec<DType>> {
        DType::all()
            .iter()
            .filter(|d| self.inputs.iter().all(|slot| slot.dtypes.contains(d)))
            .map(|&d| vec![d; self.inputs.len()])
            .collect()
    }

    /// Every dtype tuple the slots admit.
    pub fn dtype_tuples(&self) -> Vec<Vec<DType>> {
        let mut tuples: Vec<Vec<DType>> = vec![Vec::new()];
        for slot in &self.inputs {
            tuples = tuples
                .into_iter()
                .flat_map(|prefix| {
                    slot.dtypes.iter().map(move |&d| {
                        let mut next = prefix.clone();
                        next.push(d);
                        next
                    })
                })
                .collect();
        }
        tuples
    }

    /// Symbolic variables an instance of `key` exposes to constraints:
    /// every input dimension and every numeric attribute.
    pub fn symbols(&self, key: &CaseKey) -> Vec<Var> {
        let mut vars = Vec::new();
        for (input, &rank) in key.ranks.iter().enumerate() {
            vars.extend((0..rank).map(|axis| Var::dim(input, axis)));
        }
        vars.extend(self.numeric_indices().map(Var::Attr));
        vars
    }

    /// Full attribute vector for `key` with numeric attributes taken from
    /// `numeric` in slot order.
    pub fn attrs_for(&self, key: &CaseKey, numeric: &[i64]) -> Vec<i64> {
        let mut structural = key.structural.iter();
        let mut numeric = numeric.iter();
        self.attrs
            .iter()
            .map(|slot| {
                let next = if slot.structural { structural.next() } else { numeric.next() };
                next.copied().unwrap_or_else(|| slot.domain.bounds().0)
            })
            .collect()
    }
}
