//! Configuration types and utilities
//!
//! A campaign is configured by one TOML document deserialized into
//! [`FuzzConfig`]. Every table rejects unknown keys, and [`FuzzConfig::validate`]
//! checks value ranges and names, so a bad configuration fails before any
//! graph is generated. The struct is built once at startup and passed by
//! reference; nothing reads configuration from ambient state.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Model dialects a backend may be asked to consume.
pub const MODEL_KINDS: &[&str] = &["opfuzz-ir"];

/// Result filters selectable by name.
pub const KNOWN_FILTERS: &[&str] = &["crash", "timeout", "nan", "inf", "divergence", "dup"];

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json"];

/// Main opfuzz configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FuzzConfig {
    pub model: ModelConfig,
    pub backend: BackendConfig,
    pub generation: GenerationConfig,
    pub inference: InferenceConfig,
    pub compare: CompareConfig,
    pub filter: FilterConfig,
    pub campaign: CampaignConfig,
    pub logging: LoggingConfig,
}

/// Target model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Serialized model dialect handed to backends.
    pub kind: String,
    /// Restrict generation to these operator names.
    pub opset: Option<Vec<String>>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { kind: "opfuzz-ir".to_string(), opset: None }
    }
}

/// How a backend execution is isolated from the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// A child worker process per execution; survives aborts and hangs.
    Process,
    /// A watchdog thread per execution; contains panics and detects hangs.
    Thread,
}

/// Backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    pub targets: Vec<String>,
    pub isolation: IsolationMode,
    pub timeout_ms: u64,
    pub grace_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            targets: vec!["reference".to_string(), "reference-f32".to_string()],
            isolation: IsolationMode::Process,
            timeout_ms: 10_000,
            grace_ms: 500,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

/// Graph generation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMethod {
    /// Forward and backward insertion mixed by `forward_prob`.
    Hybrid,
    /// Forward insertion only.
    Forward,
}

/// How the next operator kind is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpSelection {
    Uniform,
    Weighted,
}

/// Tie-break among satisfying assignments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStrategy {
    Random,
    Smallest,
    Largest,
}

/// Graph generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    pub method: GenerationMethod,
    pub max_nodes: usize,
    pub max_elem_per_tensor: usize,
    pub dim_range: [usize; 2],
    pub forward_prob: f64,
    pub op_selection: OpSelection,
    pub assignment: AssignmentStrategy,
    pub max_attempts_per_step: usize,
    pub stall_limit: usize,
    pub timeout_ms: u64,
    pub init_float: bool,
    pub op_weights: BTreeMap<String, f64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            method: GenerationMethod::Hybrid,
            max_nodes: 10,
            max_elem_per_tensor: 1 << 16,
            dim_range: [1, 16],
            forward_prob: 0.5,
            op_selection: OpSelection::Uniform,
            assignment: AssignmentStrategy::Random,
            max_attempts_per_step: 8,
            stall_limit: 3,
            timeout_ms: 2_000,
            init_float: false,
            op_weights: BTreeMap::new(),
        }
    }
}

/// Rule inference configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    /// Load learned rules from here; infer and save when the file is missing.
    pub rules_path: Option<PathBuf>,
    /// Maximum probes per operator kind.
    pub probe_budget: usize,
    /// Maximum refinement rounds per operator kind.
    pub rounds: usize,
    /// Randomized interior probes per case and round.
    pub random_per_round: usize,
    pub max_rank: usize,
    pub dim_max: usize,
    /// Backend used as the probing oracle; defaults to the first target.
    pub backend: Option<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            probe_budget: 2_048,
            rounds: 4,
            random_per_round: 6,
            max_rank: 4,
            dim_max: 8,
            backend: None,
        }
    }
}

/// Numerical comparison thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompareConfig {
    pub atol: f64,
    pub rtol: f64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self { atol: 1e-3, rtol: 1e-2 }
    }
}

/// Result filter selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    pub active: Vec<String>,
    pub suppress: Vec<String>,
    pub patch: Option<PathBuf>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            active: KNOWN_FILTERS.iter().map(|s| s.to_string()).collect(),
            suppress: Vec::new(),
            patch: None,
        }
    }
}

/// Campaign loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CampaignConfig {
    pub root: PathBuf,
    pub name: Option<String>,
    /// Human-readable duration, e.g. `"30s"`, `"10m"`, `"2h"`.
    pub time_budget: String,
    pub max_iterations: Option<u64>,
    pub checkpoint_every: u64,
    pub seed: Option<u64>,
    pub resume: bool,
    pub save_viz: bool,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("opfuzz-out"),
            name: None,
            time_budget: "10m".to_string(),
            max_iterations: None,
            checkpoint_every: 25,
            seed: None,
            resume: false,
            save_viz: true,
        }
    }
}

impl CampaignConfig {
    pub fn time_budget(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.time_budget)
            .map_err(|e| ConfigError::invalid("campaign.time_budget", e.to_string()))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

impl FuzzConfig {
    /// Parse a TOML document. Unknown keys are rejected.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load and parse a TOML file. Does not validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check ranges and names. Call once, before any generation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !MODEL_KINDS.contains(&self.model.kind.as_str()) {
            return Err(ConfigError::unknown("model kind", &self.model.kind, MODEL_KINDS));
        }
        if let Some(opset) = &self.model.opset
            && opset.is_empty()
        {
            return Err(ConfigError::invalid("model.opset", "must name at least one operator"));
        }

        if self.backend.targets.is_empty() {
            return Err(ConfigError::Missing("backend.targets"));
        }
        if self.backend.targets.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::invalid("backend.targets", "backend names must be non-empty"));
        }
        if self.backend.timeout_ms == 0 {
            return Err(ConfigError::invalid("backend.timeout_ms", "must be positive"));
        }

        let generation = &self.generation;
        if generation.max_nodes == 0 {
            return Err(ConfigError::invalid("generation.max_nodes", "must be at least 1"));
        }
        if generation.max_elem_per_tensor == 0 {
            return Err(ConfigError::invalid("generation.max_elem_per_tensor", "must be positive"));
        }
        let [lo, hi] = generation.dim_range;
        if lo == 0 || lo > hi {
            return Err(ConfigError::invalid(
                "generation.dim_range",
                format!("expected 1 <= lo <= hi, got [{lo}, {hi}]"),
            ));
        }
        if !(0.0..=1.0).contains(&generation.forward_prob) {
            return Err(ConfigError::invalid("generation.forward_prob", "must lie in [0, 1]"));
        }
        if generation.max_attempts_per_step == 0 {
            return Err(ConfigError::invalid("generation.max_attempts_per_step", "must be at least 1"));
        }
        if generation.stall_limit == 0 {
            return Err(ConfigError::invalid("generation.stall_limit", "must be at least 1"));
        }
        for (op, weight) in &generation.op_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ConfigError::invalid(
                    "generation.op_weights",
                    format!("weight for `{op}` must be a non-negative number"),
                ));
            }
        }

        let inference = &self.inference;
        if inference.probe_budget == 0 {
            return Err(ConfigError::invalid("inference.probe_budget", "must be positive"));
        }
        if inference.rounds == 0 {
            return Err(ConfigError::invalid("inference.rounds", "must be at least 1"));
        }
        if inference.max_rank > 6 {
            return Err(ConfigError::invalid("inference.max_rank", "ranks above 6 are not probed"));
        }
        if inference.dim_max < 2 {
            return Err(ConfigError::invalid("inference.dim_max", "must be at least 2"));
        }

        for (key, value) in [("compare.atol", self.compare.atol), ("compare.rtol", self.compare.rtol)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(key, "must be a non-negative number"));
            }
        }

        for name in &self.filter.active {
            if !KNOWN_FILTERS.contains(&name.as_str()) {
                return Err(ConfigError::unknown("filter", name, KNOWN_FILTERS));
            }
        }
        for name in &self.filter.suppress {
            if !KNOWN_FILTERS.contains(&name.as_str()) {
                return Err(ConfigError::unknown("suppressed filter", name, KNOWN_FILTERS));
            }
            if name == "dup" {
                return Err(ConfigError::invalid("filter.suppress", "deduplication cannot be suppressed"));
            }
        }

        self.campaign.time_budget()?;
        if self.campaign.checkpoint_every == 0 {
            return Err(ConfigError::invalid("campaign.checkpoint_every", "must be at least 1"));
        }
        if let Some(name) = &self.campaign.name
            && (name.is_empty() || name.contains(['/', '\\']) || name == "." || name == "..")
        {
            return Err(ConfigError::invalid("campaign.name", "must be a plain directory name"));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::unknown("log level", &self.logging.level, LOG_LEVELS));
        }
        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::unknown("log format", &self.logging.format, LOG_FORMATS));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
