//! The operator registry: operator-kind name to `{signature, predicate}`.
//!
//! Dispatch is a map lookup. Each entry owns its predicate exclusively;
//! rule inference replaces or refines it through [`OperatorSpecRegistry::predicate_mut`].

use crate::catalog;
use crate::predicate::ValidityPredicate;
use crate::signature::Signature;
use crate::template::RuleTemplate;
use opfuzz_common::{GenerationConfig, ModelConfig, OpSelection};
use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// An operator identifier plus its signature template. Immutable once
/// registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorKind {
    pub name: String,
    pub signature: Signature,
    pub template: RuleTemplate,
}

#[derive(Debug, Clone)]
pub struct OpEntry {
    pub kind: OperatorKind,
    pub predicate: ValidityPredicate,
    pub weight: f64,
}

impl OpEntry {
    pub fn name(&self) -> &str {
        &self.kind.name
    }

    pub fn signature(&self) -> &Signature {
        &self.kind.signature
    }

    /// An entry whose predicate accepts nothing can never be placed.
    pub fn is_usable(&self) -> bool {
        !self.predicate.is_empty() && self.weight > 0.0
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("unknown operator `{name}` (known: {known})")]
    UnknownOperator { name: String, known: String },

    #[error("operator `{0}` is already registered")]
    Duplicate(String),

    #[error("weight for `{name}` must be a finite non-negative number, got {weight}")]
    InvalidWeight { name: String, weight: f64 },
}

#[derive(Debug, Clone, Default)]
pub struct OperatorSpecRegistry {
    entries: BTreeMap<String, OpEntry>,
}

impl OperatorSpecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in catalog, each operator starting from its template prior.
    pub fn builtin(max_rank: usize) -> Self {
        let mut registry = Self::new();
        for kind in catalog::builtin_kinds(max_rank) {
            let predicate = ValidityPredicate::from_template(&kind.signature, kind.template);
            registry.entries.insert(kind.name.clone(), OpEntry { kind, predicate, weight: 1.0 });
        }
        registry
    }

    pub fn register(&mut self, kind: OperatorKind) -> Result<(), RegistryError> {
        let predicate = ValidityPredicate::from_template(&kind.signature, kind.template);
        self.register_with(kind, predicate)
    }

    pub fn register_with(&mut self, kind: OperatorKind, predicate: ValidityPredicate) -> Result<(), RegistryError> {
        if self.entries.contains_key(&kind.name) {
            return Err(RegistryError::Duplicate(kind.name));
        }
        self.entries.insert(kind.name.clone(), OpEntry { kind, predicate, weight: 1.0 });
        Ok(())
    }

    fn unknown(&self, name: &str) -> RegistryError {
        RegistryError::UnknownOperator {
            name: name.to_string(),
            known: self.entries.keys().cloned().collect::<Vec<_>>().join(", "),
        }
    }

    pub fn get(&self, name: &str) -> Option<&OpEntry> {
        self.entries.get(name)
    }

    pub fn lookup(&self, name: &str) -> Result<&OpEntry, RegistryError> {
        self.entries.get(name).ok_or_else(|| self.unknown(name))
    }

    pub fn predicate_mut(&mut self, name: &str) -> Result<&mut ValidityPredicate, RegistryError> {
        if !self.entries.contains_key(name) {
            return Err(self.unknown(name));
        }
        match self.entries.get_mut(name) {
            Some(entry) => Ok(&mut entry.predicate),
            None => Err(RegistryError::UnknownOperator { name: name.to_string(), known: String::new() }),
        }
    }

    pub fn set_predicate(&mut self, name: &str, predicate: ValidityPredicate) -> Result<(), RegistryError> {
        *self.predicate_mut(name)? = predicate;
        Ok(())
    }

    /// Keep only the named operators.
    pub fn restrict<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), RegistryError> {
        for name in names {
            if !self.entries.contains_key(name.as_ref()) {
                return Err(self.unknown(name.as_ref()));
            }
        }
        self.entries.retain(|k, _| names.iter().any(|n| n.as_ref() == k));
        Ok(())
    }

    pub fn set_weights(&mut self, weights: &BTreeMap<String, f64>) -> Result<(), RegistryError> {
        for (name, &weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(RegistryError::InvalidWeight { name: name.clone(), weight });
            }
            match self.entries.get_mut(name) {
                Some(entry) => entry.weight = weight,
                None => return Err(self.unknown(name)),
            }
        }
        Ok(())
    }

    /// Apply `[model].opset` and, for weighted selection, `[generation].op_weights`.
    pub fn configure(&mut self, model: &ModelConfig, generation: &GenerationConfig) -> Result<(), RegistryError> {
        if let Some(opset) = &model.opset {
            self.restrict(opset)?;
        }
        if generation.op_selection == OpSelection::Weighted {
            self.set_weights(&generation.op_weights)?;
        }
        debug!(target: "opfuzz::gen", operators = self.len(), "operator registry configured");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &OpEntry> {
        self.entries.values()
    }

    /// Pick a usable operator for which `allow` holds.
    pub fn choose<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        selection: OpSelection,
        allow: impl Fn(&OpEntry) -> bool,
    ) -> Option<&OpEntry> {
        let candidates: Vec<&OpEntry> = self.entries.values().filter(|e| e.is_usable() && allow(e)).collect();
        if candidates.is_empty() {
            return None;
        }
        match selection {
            OpSelection::Uniform => Some(candidates[rng.random_range(0..candidates.len())]),
            OpSelection::Weighted => {
                let dist = WeightedIndex::new(candidates.iter().map(|e| e.weight)).ok()?;
                Some(candidates[dist.sample(rng)])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn builtin_registers_catalog() {
        let reg = OperatorSpecRegistry::builtin(4);
        assert_eq!(reg.len(), catalog::builtin_names().len());
        assert!(reg.get("matmul").is_some());
        assert!(reg.entries().all(OpEntry::is_usable));
    }

    #[test]
    fn restrict_rejects_unknown_names() {
        let mut reg = OperatorSpecRegistry::builtin(4);
        let err = reg.restrict(&["add", "conv9d"]).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownOperator { ref name, .. } if name == "conv9d"));
        reg.restrict(&["add", "relu"]).unwrap();
        assert_eq!(reg.names().collect::<Vec<_>>(), vec!["add", "relu"]);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut reg = OperatorSpecRegistry::builtin(2);
        let kind = reg.get("relu").unwrap().kind.clone();
        assert_eq!(reg.register(kind), Err(RegistryError::Duplicate("relu".to_string())));
    }

    #[test]
    fn weighted_choice_respects_zero_weight() {
        let mut reg = OperatorSpecRegistry::builtin(2);
        reg.restrict(&["add", "relu"]).unwrap();
        reg.set_weights(&BTreeMap::from([("add".to_string(), 0.0), ("relu".to_string(), 2.0)])).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..20 {
            let entry = reg.choose(&mut rng, OpSelection::Weighted, |_| true).unwrap();
            assert_eq!(entry.name(), "relu");
        }
    }

    #[test]
    fn negative_weight_is_rejected() {
        let mut reg = OperatorSpecRegistry::builtin(2);
        let err = reg.set_weights(&BTreeMap::from([("add".to_string(), -1.0)])).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidWeight { .. }));
    }

    #[test]
    fn predicates_are_replaceable() {
        let mut reg = OperatorSpecRegistry::builtin(2);
        reg.set_predicate("relu", ValidityPredicate::reject_all()).unwrap();
        assert!(!reg.get("relu").unwrap().is_usable());
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let chosen = reg.choose(&mut rng, OpSelection::Uniform, |e| e.name() == "relu");
        assert!(chosen.is_none());
    }
}
