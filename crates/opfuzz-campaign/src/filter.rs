//! Classification of differential runs.
//!
//! A [`ResultFilter`] runs the built-in filters named in `[filter].active`
//! in order, then the `report` rules of an optional patch file. Every match
//! is a [`Finding`]. Findings of suppressed classes, or dropped by a patch
//! `ignore` rule, are kept aside in the verdict but do not make a case
//! interesting. Last comes deduplication: a case whose fingerprint the
//! campaign already recorded is benign whatever matched.
//!
//! A patch is a TOML file of `[[filter]]` tables:
//!
//! ```toml
//! [[filter]]
//! name = "slow-softmax"
//! class = "slow"
//! op = "softmax"
//! min_elapsed_ms = 500
//!
//! [[filter]]
//! name = "f32-nan-is-fine"
//! action = "ignore"
//! classes = ["nan"]
//! backend = "reference-f32"
//! ```
//!
//! All conditions of a rule must hold for one backend outcome. `op` looks at
//! the graph and `min_abs_diff` at that backend's divergences.

use crate::error::{CampaignError, Result};
use crate::state::CampaignState;
use opfuzz_common::{FilterConfig, KNOWN_FILTERS};
use opfuzz_graph::{Fingerprint, Graph};
use opfuzz_runner::{Divergence, Mismatch, RunOutcome, RunReport, RunStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// Name of the deduplication stage in `[filter].active`.
pub const DEDUP: &str = "dup";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFilter {
    Crash,
    Timeout,
    Nan,
    Inf,
    Divergence,
}

impl BuiltinFilter {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "crash" => BuiltinFilter::Crash,
            "timeout" => BuiltinFilter::Timeout,
            "nan" => BuiltinFilter::Nan,
            "inf" => BuiltinFilter::Inf,
            "divergence" => BuiltinFilter::Divergence,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinFilter::Crash => "crash",
            BuiltinFilter::Timeout => "timeout",
            BuiltinFilter::Nan => "nan",
            BuiltinFilter::Inf => "inf",
            BuiltinFilter::Divergence => "divergence",
        }
    }

    fn findings(self, report: &RunReport) -> Vec<Finding> {
        let finding = |backend: &str, detail: String| Finding {
            class: self.name().to_string(),
            filter: self.name().to_string(),
            backend: Some(backend.to_string()),
            detail,
        };
        match self {
            BuiltinFilter::Crash => report
                .with_status(RunStatus::Crash)
                .map(|o| finding(&o.backend, o.error.as_ref().map_or_else(|| "crashed".to_string(), ToString::to_string)))
                .collect(),
            BuiltinFilter::Timeout => report
                .with_status(RunStatus::Timeout)
                .map(|o| finding(&o.backend, format!("no result after {}ms", o.elapsed_ms)))
                .collect(),
            BuiltinFilter::Nan => report
                .outcomes
                .iter()
                .filter(|o| o.has_nan())
                .map(|o| finding(&o.backend, non_finite(o, f64::is_nan, "NaN")))
                .collect(),
            BuiltinFilter::Inf => report
                .outcomes
                .iter()
                .filter(|o| o.has_inf())
                .map(|o| finding(&o.backend, non_finite(o, f64::is_infinite, "infinite")))
                .collect(),
            BuiltinFilter::Divergence => report
                .divergences
                .iter()
                .map(|d| finding(&d.backend, format!("against {}: {}", d.against, d.mismatch)))
                .collect(),
        }
    }
}

fn non_finite(outcome: &RunOutcome, test: fn(f64) -> bool, what: &str) -> String {
    let count: usize = outcome.outputs.iter().map(|t| t.values.iter().filter(|v| test(**v)).count()).sum();
    format!("{count} {what} output elements")
}

/// One filter match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub class: String,
    /// The filter that matched: a built-in name or a patch rule name.
    pub filter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Benign,
    Interesting,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Disposition::Benign => "benign",
            Disposition::Interesting => "interesting",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub disposition: Disposition,
    pub fingerprint: Fingerprint,
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed: Vec<Finding>,
    /// Findings matched but the fingerprint was already recorded.
    pub duplicate: bool,
}

impl Verdict {
    pub fn is_interesting(&self) -> bool {
        self.disposition == Disposition::Interesting
    }

    /// Class of the first finding, which names the report bundle.
    pub fn primary_class(&self) -> Option<&str> {
        self.findings.first().map(|f| f.class.as_str())
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.findings.iter().any(|f| f.class == class)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchAction {
    #[default]
    Report,
    Ignore,
}

/// A user rule loaded from a patch file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchFilter {
    pub name: String,
    #[serde(default)]
    pub action: PatchAction,
    /// Class reported on a match; defaults to `name`.
    pub class: Option<String>,
    /// Classes an `ignore` rule drops; empty drops all.
    #[serde(default)]
    pub classes: Vec<String>,
    pub status: Option<RunStatus>,
    pub backend: Option<String>,
    pub op: Option<String>,
    pub error_contains: Option<String>,
    pub min_elapsed_ms: Option<u64>,
    pub min_abs_diff: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatchFile {
    #[serde(default, rename = "filter")]
    filters: Vec<PatchFilter>,
}

impl PatchFilter {
    fn class(&self) -> &str {
        self.class.as_deref().unwrap_or(&self.name)
    }

    fn check(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("a filter needs a name".to_string());
        }
        match self.action {
            PatchAction::Report => {
                if !self.classes.is_empty() {
                    return Err(format!("`{}`: `classes` only applies to ignore rules", self.name));
                }
                if self.class() == DEDUP || self.class().trim().is_empty() {
                    return Err(format!("`{}`: invalid class `{}`", self.name, self.class()));
                }
            }
            PatchAction::Ignore => {
                if self.class.is_some() {
                    return Err(format!("`{}`: ignore rules report no class", self.name));
                }
            }
        }
        if let Some(diff) = self.min_abs_diff
            && (!diff.is_finite() || diff < 0.0)
        {
            return Err(format!("`{}`: min_abs_diff must be a non-negative number", self.name));
        }
        Ok(())
    }

    /// The first outcome every condition holds for.
    fn matching<'r>(&self, graph: &Graph, report: &'r RunReport) -> Option<&'r RunOutcome> {
        if let Some(op) = &self.op
            && !graph.op_sequence().contains(&op.as_str())
        {
            return None;
        }
        report.outcomes.iter().find(|outcome| {
            self.backend.as_ref().is_none_or(|b| *b == outcome.backend)
                && self.status.is_none_or(|s| s == outcome.status)
                && self.min_elapsed_ms.is_none_or(|ms| outcome.elapsed_ms >= ms)
                && self.error_contains.as_ref().is_none_or(|needle| {
                    outcome.error.as_ref().is_some_and(|e| e.to_string().contains(needle.as_str()))
                })
                && self.min_abs_diff.is_none_or(|min| {
                    report.divergences.iter().any(|d| d.backend == outcome.backend && magnitude(d) >= min)
                })
        })
    }
}

fn magnitude(divergence: &Divergence) -> f64 {
    match divergence.mismatch {
        Mismatch::Value { max_abs_diff, .. } => max_abs_diff,
        Mismatch::OutputCount { .. } | Mismatch::Spec { .. } => f64::INFINITY,
    }
}

#[derive(Debug, Clone)]
pub struct ResultFilter {
    builtins: Vec<BuiltinFilter>,
    patches: Vec<PatchFilter>,
    suppress: BTreeSet<String>,
}

impl ResultFilter {
    pub fn new(builtins: Vec<BuiltinFilter>, patches: Vec<PatchFilter>, suppress: &[&str]) -> Self {
        Self { builtins, patches, suppress: suppress.iter().map(|s| s.to_string()).collect() }
    }

    /// Build from `[filter]`, reading the patch file if one is named.
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        let mut builtins = Vec::new();
        for name in &config.active {
            match BuiltinFilter::parse(name) {
                Some(filter) => builtins.push(filter),
                None if name == DEDUP => {}
                None => {
                    return Err(opfuzz_common::ConfigError::unknown("filter", name.as_str(), KNOWN_FILTERS).into());
                }
            }
        }
        if !config.active.iter().any(|n| n == DEDUP) {
            warn!(target: "opfuzz::fuzz", "`dup` is not listed in filter.active; deduplication stays on");
        }
        let patches = match &config.patch {
            Some(path) => Self::load_patch(path)?,
            None => Vec::new(),
        };
        let suppress: Vec<&str> = config.suppress.iter().map(String::as_str).collect();
        Ok(Self::new(builtins, patches, &suppress))
    }

    pub fn load_patch(path: &Path) -> Result<Vec<PatchFilter>> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| CampaignError::Patch { path: path.to_path_buf(), reason: e.to_string() })?;
        Self::parse_patch(&source).map_err(|reason| CampaignError::Patch { path: path.to_path_buf(), reason })
    }

    pub fn parse_patch(source: &str) -> std::result::Result<Vec<PatchFilter>, String> {
        let file: PatchFile = toml::from_str(source).map_err(|e| e.to_string())?;
        let mut names = BTreeSet::new();
        for filter in &file.filters {
            filter.check()?;
            if !names.insert(filter.name.as_str()) {
                return Err(format!("filter `{}` is defined twice", filter.name));
            }
        }
        Ok(file.filters)
    }

    pub fn patches(&self) -> &[PatchFilter] {
        &self.patches
    }

    pub fn classify(&self, graph: &Graph, report: &RunReport, state: &CampaignState) -> Verdict {
        let mut findings: Vec<Finding> = self.builtins.iter().flat_map(|f| f.findings(report)).collect();
        for patch in self.patches.iter().filter(|p| p.action == PatchAction::Report) {
            if let Some(outcome) = patch.matching(graph, report) {
                findings.push(Finding {
                    class: patch.class().to_string(),
                    filter: patch.name.clone(),
                    backend: Some(outcome.backend.clone()),
                    detail: outcome.describe(),
                });
            }
        }

        let mut suppressed = Vec::new();
        let ignores: Vec<&PatchFilter> = self
            .patches
            .iter()
            .filter(|p| p.action == PatchAction::Ignore && p.matching(graph, report).is_some())
            .collect();
        findings.retain(|finding| {
            let dropped = self.suppress.contains(&finding.class)
                || ignores.iter().any(|p| p.classes.is_empty() || p.classes.contains(&finding.class));
            if dropped {
                suppressed.push(finding.clone());
            }
            !dropped
        });

        let fingerprint = Fingerprint::of(graph);
        let duplicate = !findings.is_empty() && state.is_seen(&fingerprint);
        let disposition =
            if findings.is_empty() || duplicate { Disposition::Benign } else { Disposition::Interesting };
        debug!(
            target: "opfuzz::fuzz",
            graph_id = %report.graph_id,
            fingerprint = %fingerprint.short(),
            %disposition,
            findings = findings.len(),
            suppressed = suppressed.len(),
            duplicate,
            "classified"
        );
        Verdict { disposition, fingerprint, findings, suppressed, duplicate }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opfuzz_backends::ExecutionError;
    use opfuzz_common::{DType, TensorData, TensorSpec};
    use opfuzz_graph::{GRAPH_FORMAT_VERSION, GraphNode, NodeKind, TensorRef};

    fn graph(op: &str) -> Graph {
        let spec = TensorSpec::new(vec![3], DType::Float32);
        Graph {
            version: GRAPH_FORMAT_VERSION,
            seed: 1,
            nodes: vec![
                GraphNode { id: 0, kind: NodeKind::Input, inputs: vec![], outputs: vec![spec.clone()] },
                GraphNode {
                    id: 1,
                    kind: NodeKind::Op { op: op.to_string(), attrs: vec![] },
                    inputs: vec![TensorRef::new(0, 0)],
                    outputs: vec![spec],
                },
            ],
            inputs: vec![0],
            outputs: vec![TensorRef::new(1, 0)],
        }
    }

    fn ok(backend: &str, values: Vec<f64>) -> RunOutcome {
        let spec = TensorSpec::new(vec![values.len()], DType::Float32);
        RunOutcome {
            backend: backend.to_string(),
            graph_id: "g".to_string(),
            status: RunStatus::Ok,
            outputs: vec![TensorData::new(spec, values).unwrap()],
            error: None,
            elapsed_ms: 2,
        }
    }

    fn crash(backend: &str, reason: &str) -> RunOutcome {
        RunOutcome {
            backend: backend.to_string(),
            graph_id: "g".to_string(),
            status: RunStatus::Crash,
            outputs: vec![],
            error: Some(ExecutionError::rejected(reason)),
            elapsed_ms: 1,
        }
    }

    fn report(outcomes: Vec<RunOutcome>) -> RunReport {
        RunReport { graph_id: "g".to_string(), outcomes, divergences: vec![] }
    }

    fn all() -> ResultFilter {
        ResultFilter::from_config(&FilterConfig::default()).unwrap()
    }

    #[test]
    fn finite_agreeing_outcomes_are_benign() {
        let state = CampaignState::new("t", 0);
        let report = report(vec![ok("a", vec![0.5, 1.0, 2.0]), ok("b", vec![0.5, 1.0, 2.0])]);
        let verdict = all().classify(&graph("relu"), &report, &state);
        assert_eq!(verdict.disposition, Disposition::Benign);
        assert!(verdict.findings.is_empty() && !verdict.duplicate);
    }

    #[test]
    fn findings_follow_active_order() {
        let state = CampaignState::new("t", 0);
        let report = report(vec![ok("a", vec![f64::NAN, 1.0, 2.0]), crash("b", "bad shape")]);
        let verdict = all().classify(&graph("relu"), &report, &state);
        assert!(verdict.is_interesting());
        assert_eq!(verdict.primary_class(), Some("crash"));
        assert!(verdict.has_class("nan"));
        assert!(verdict.findings[0].detail.contains("bad shape"));
    }

    #[test]
    fn suppressed_classes_do_not_count() {
        let state = CampaignState::new("t", 0);
        let config = FilterConfig { suppress: vec!["nan".to_string()], ..FilterConfig::default() };
        let filter = ResultFilter::from_config(&config).unwrap();
        let report = report(vec![ok("a", vec![f64::NAN, 1.0, 2.0])]);
        let verdict = filter.classify(&graph("log"), &report, &state);
        assert_eq!(verdict.disposition, Disposition::Benign);
        assert_eq!(verdict.suppressed.len(), 1);
        assert_eq!(verdict.suppressed[0].class, "nan");
    }

    #[test]
    fn timeout_is_interesting() {
        let state = CampaignState::new("t", 0);
        let hung = RunOutcome { status: RunStatus::Timeout, error: None, elapsed_ms: 5_000, ..crash("slow", "") };
        let verdict = all().classify(&graph("exp"), &report(vec![ok("a", vec![1.0, 2.0, 3.0]), hung]), &state);
        assert!(verdict.is_interesting());
        assert!(verdict.has_class("timeout"));
        assert_eq!(verdict.findings[0].backend.as_deref(), Some("slow"));
        assert!(verdict.findings[0].detail.contains("5000ms"), "{}", verdict.findings[0].detail);
    }

    #[test]
    fn infinite_output_is_interesting_unless_suppressed() {
        let state = CampaignState::new("t", 0);
        let report = report(vec![ok("a", vec![f64::INFINITY, 1.0, f64::NEG_INFINITY])]);
        let verdict = all().classify(&graph("exp"), &report, &state);
        assert!(verdict.is_interesting());
        assert!(verdict.has_class("inf") && !verdict.has_class("nan"));
        assert!(verdict.findings[0].detail.starts_with("2 infinite"), "{}", verdict.findings[0].detail);

        let config = FilterConfig { suppress: vec!["inf".to_string()], ..FilterConfig::default() };
        let quiet = ResultFilter::from_config(&config).unwrap().classify(&graph("exp"), &report, &state);
        assert_eq!(quiet.disposition, Disposition::Benign);
        assert_eq!(quiet.suppressed[0].class, "inf");
    }

    #[test]
    fn seen_fingerprint_is_downgraded() {
        let mut state = CampaignState::new("t", 0);
        let g = graph("abs");
        let report = report(vec![crash("a", "boom")]);
        let first = all().classify(&g, &report, &state);
        assert!(first.is_interesting());
        state.record(first.fingerprint.clone(), "crash");
        let again = all().classify(&g, &report, &state);
        assert!(again.duplicate);
        assert_eq!(again.disposition, Disposition::Benign);
        assert_eq!(again.findings, first.findings);
    }

    #[test]
    fn patch_rules_report_and_ignore() {
        let source = r#"
            [[filter]]
            name = "abs-errors"
            class = "abs-bug"
            op = "abs"
            status = "crash"
            error_contains = "boom"

            [[filter]]
            name = "quiet-b"
            action = "ignore"
            classes = ["crash"]
            backend = "b"
        "#;
        let patches = ResultFilter::parse_patch(source).unwrap();
        let filter = ResultFilter::new(vec![BuiltinFilter::Crash], patches, &[]);
        let state = CampaignState::new("t", 0);

        let verdict = filter.classify(&graph("abs"), &report(vec![crash("a", "boom")]), &state);
        assert_eq!(verdict.findings.iter().map(|f| f.class.as_str()).collect::<Vec<_>>(), ["crash", "abs-bug"]);

        let verdict = filter.classify(&graph("relu"), &report(vec![crash("a", "boom")]), &state);
        assert!(!verdict.has_class("abs-bug"));

        let verdict = filter.classify(&graph("abs"), &report(vec![crash("b", "other")]), &state);
        assert_eq!(verdict.disposition, Disposition::Benign);
        assert_eq!(verdict.suppressed.len(), 1);
    }

    #[test]
    fn divergence_threshold_uses_max_abs_diff() {
        let patches = ResultFilter::parse_patch("[[filter]]\nname = \"big\"\nmin_abs_diff = 0.5\n").unwrap();
        let filter = ResultFilter::new(vec![], patches, &[]);
        let state = CampaignState::new("t", 0);
        let mut run = report(vec![ok("a", vec![1.0]), ok("b", vec![1.2])]);
        let diverge = |diff: f64| Divergence {
            backend: "b".to_string(),
            against: "a".to_string(),
            mismatch: Mismatch::Value { output: 0, index: 0, expected: 1.0, actual: 1.0 + diff, max_abs_diff: diff },
        };
        run.divergences = vec![diverge(0.2)];
        assert!(!filter.classify(&graph("relu"), &run, &state).is_interesting());
        run.divergences = vec![diverge(0.7)];
        assert!(filter.classify(&graph("relu"), &run, &state).has_class("big"));
    }

    #[test]
    fn malformed_patches_are_rejected() {
        assert!(ResultFilter::parse_patch("[[filter]]\nname = \"x\"\nwhen = \"always\"\n").is_err());
        assert!(ResultFilter::parse_patch("[[filter]]\nname = \"x\"\n[[filter]]\nname = \"x\"\n").is_err());
        assert!(ResultFilter::parse_patch("[[filter]]\nname = \"x\"\nclass = \"dup\"\n").is_err());
        assert!(ResultFilter::parse_patch("[[filter]]\nname = \"x\"\naction = \"ignore\"\nclass = \"c\"\n").is_err());
        assert!(ResultFilter::parse_patch("[[filter]]\nname = \"x\"\nmin_abs_diff = -1.0\n").is_err());
        assert_eq!(ResultFilter::parse_patch("").unwrap(), vec![]);
    }

    #[test]
    fn missing_patch_file_is_reported() {
        let config = FilterConfig { patch: Some("/nonexistent/patch.toml".into()), ..FilterConfig::default() };
        let err = ResultFilter::from_config(&config).unwrap_err();
        assert!(matches!(err, CampaignError::Patch { .. }));
        assert!(err.is_config());
    }
}
