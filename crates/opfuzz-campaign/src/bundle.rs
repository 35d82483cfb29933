//! Report bundles for interesting cases.
//!
//! Each bundle is a directory `bugs/<fingerprint>-<class>/` under the
//! campaign directory holding everything needed to replay the case:
//!
//! | file | contents |
//! |------|----------|
//! | `graph.json` | the graph, including its seed |
//! | `inputs.json` | concrete values of every input and constant |
//! | `outcomes.json` | per-backend status, error and output digest, plus divergences |
//! | `verdict.json` | the classification |
//! | `build.json` | construction counters; `timed_out` marks a graph the seed may not rebuild |
//! | `graph.dot` | rendering, when `save_viz` is on |
//!
//! The directory name depends only on the case, so recording it twice
//! overwrites instead of duplicating.

use crate::error::{CampaignError, Result};
use crate::filter::Verdict;
use opfuzz_backends::ExecutionError;
use opfuzz_common::TensorData;
use opfuzz_common::fs::write_atomic;
use opfuzz_graph::{BuildStats, Graph, to_dot};
use opfuzz_runner::{Divergence, OutputSummary, RunReport, RunStatus};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

pub const BUGS_DIR: &str = "bugs";

#[derive(Debug, Serialize)]
struct OutcomeDigest<'a> {
    backend: &'a str,
    status: RunStatus,
    elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ExecutionError>,
    outputs: Vec<OutputSummary>,
}

#[derive(Debug, Serialize)]
struct OutcomeFile<'a> {
    graph_id: &'a str,
    outcomes: Vec<OutcomeDigest<'a>>,
    divergences: &'a [Divergence],
}

pub struct Bundle<'a> {
    pub graph: &'a Graph,
    pub inputs: &'a [TensorData],
    pub report: &'a RunReport,
    pub verdict: &'a Verdict,
    pub stats: &'a BuildStats,
}

impl Bundle<'_> {
    pub fn dir_name(&self) -> String {
        let class = self.verdict.primary_class().unwrap_or("case");
        let class: String =
            class.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect();
        format!("{}-{class}", self.verdict.fingerprint.short())
    }

    /// Write the bundle under `<campaign_dir>/bugs/` and return its path.
    pub fn write(&self, campaign_dir: &Path, save_viz: bool) -> Result<PathBuf> {
        let dir = campaign_dir.join(BUGS_DIR).join(self.dir_name());
        std::fs::create_dir_all(&dir).map_err(|e| CampaignError::io("create", &dir, e))?;

        let outcomes = OutcomeFile {
            graph_id: &self.report.graph_id,
            outcomes: self
                .report
                .outcomes
                .iter()
                .map(|o| OutcomeDigest {
                    backend: &o.backend,
                    status: o.status,
                    elapsed_ms: o.elapsed_ms,
                    error: o.error.as_ref(),
                    outputs: o.summaries(),
                })
                .collect(),
            divergences: &self.report.divergences,
        };
        put_json(&dir.join("graph.json"), self.graph)?;
        put_json(&dir.join("inputs.json"), &self.inputs)?;
        put_json(&dir.join("outcomes.json"), &outcomes)?;
        put_json(&dir.join("verdict.json"), self.verdict)?;
        put_json(&dir.join("build.json"), self.stats)?;
        if save_viz {
            let path = dir.join("graph.dot");
            write_atomic(&path, to_dot(self.graph).as_bytes()).map_err(|e| CampaignError::io("write", &path, e))?;
        }
        info!(
            target: "opfuzz::fuzz",
            graph_id = %self.report.graph_id,
            fingerprint = %self.verdict.fingerprint.short(),
            class = self.verdict.primary_class().unwrap_or("case"),
            path = %dir.display(),
            "recorded"
        );
        Ok(dir)
    }
}

fn put_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| CampaignError::io("encode", path, e.into()))?;
    write_atomic(path, &json).map_err(|e| CampaignError::io("write", path, e))
}
