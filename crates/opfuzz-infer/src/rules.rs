//! Versioned rule files.
//!
//! A rule file holds the learned predicate of every inferred operator so a
//! campaign can skip probing. Campaigns load it through
//! `inference.rules_path`; operators missing from the file keep their
//! template prior.

use crate::engine::InferenceReport;
use crate::error::{InferenceError, Result};
use opfuzz_common::fs::write_atomic;
use opfuzz_ops::{OperatorSpecRegistry, ValidityPredicate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

pub const RULE_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorRules {
    pub predicate: ValidityPredicate,
    pub probes: usize,
    pub crashes: usize,
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFile {
    pub version: u32,
    /// The oracle the rules were learned against.
    pub backend: String,
    pub max_rank: usize,
    pub operators: BTreeMap<String, OperatorRules>,
}

impl RuleFile {
    pub fn new(backend: impl Into<String>, max_rank: usize) -> Self {
        Self { version: RULE_FILE_VERSION, backend: backend.into(), max_rank, operators: BTreeMap::new() }
    }

    pub fn insert(&mut self, report: &InferenceReport) {
        self.operators.insert(
            report.op.clone(),
            OperatorRules {
                predicate: report.predicate.clone(),
                probes: report.probes,
                crashes: report.crashes,
                converged: report.converged,
            },
        );
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| InferenceError::Decode { path: path.to_path_buf(), reason: e.to_string() })?;
        write_atomic(path, &json).map_err(|e| InferenceError::io(path, e))?;
        info!(target: "opfuzz::infer", path = %path.display(), operators = self.operators.len(), "rule file saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| InferenceError::io(path, e))?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| InferenceError::Decode { path: path.to_path_buf(), reason: e.to_string() })?;
        let found = value.get("version").and_then(serde_json::Value::as_u64).unwrap_or(0) as u32;
        if found != RULE_FILE_VERSION {
            return Err(InferenceError::Version { path: path.to_path_buf(), found, expected: RULE_FILE_VERSION });
        }
        serde_json::from_value(value)
            .map_err(|e| InferenceError::Decode { path: path.to_path_buf(), reason: e.to_string() })
    }

    /// Install every predicate whose operator the registry knows. Returns
    /// how many were installed.
    pub fn apply(&self, registry: &mut OperatorSpecRegistry) -> usize {
        let mut applied = 0;
        for (name, rules) in &self.operators {
            match registry.set_predicate(name, rules.predicate.clone()) {
                Ok(()) => applied += 1,
                Err(_) => warn!(target: "opfuzz::infer", op = %name, "rule file names an operator the registry lacks"),
            }
        }
        let missing: Vec<&str> = registry.names().filter(|n| !self.operators.contains_key(*n)).collect();
        if !missing.is_empty() {
            warn!(target: "opfuzz::infer", ?missing, "no learned rules; keeping template priors");
        }
        applied
    }
}
