//! `opfuzz generate`: build one graph, optionally run it.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use opfuzz_backends::materialize;
use opfuzz_campaign::{CampaignState, ResultFilter, Verdict, prepare_registry};
use opfuzz_common::{FuzzConfig, TensorSpec, fs::write_atomic};
use opfuzz_graph::{BuildStats, Fingerprint, Graph, GraphBuilder, to_dot};
use opfuzz_runner::{DifferentialRunner, RunReport};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

/// Generate a single graph from the configured operator set
#[derive(Debug, Args)]
pub struct GenerateCommand {
    /// Generation seed (default: campaign seed, else random)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Operator budget, overriding `generation.max_nodes`
    #[arg(long, value_name = "N")]
    pub max_nodes: Option<usize>,

    /// Declared graph input, e.g. `float32[1,3,8,8]` (repeatable)
    #[arg(long = "input", value_name = "SPEC")]
    pub inputs: Vec<TensorSpec>,

    /// Run the graph on every configured backend and classify the result
    #[arg(long)]
    pub execute: bool,

    /// Write graph.json and graph.dot into this directory
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Print a JSON document instead of text
    #[arg(long)]
    pub json: bool,
}

impl GenerateCommand {
    pub fn execute(self, mut config: FuzzConfig) -> Result<()> {
        if let Some(max_nodes) = self.max_nodes {
            config.generation.max_nodes = max_nodes;
        }
        let config = crate::settings::validated(config)?;
        let seed = self.seed.or(config.campaign.seed).unwrap_or_else(rand::random);

        let registry = prepare_registry(&config, Some(super::self_worker()?))?;
        let builder = GraphBuilder::new(&registry, &config.generation).with_inputs(self.inputs.clone());
        let (graph, stats) = builder
            .build_with_stats(config.generation.max_nodes, seed)
            .with_context(|| format!("generation failed for seed {seed}"))?;
        let fingerprint = Fingerprint::of(&graph);
        info!(target: "opfuzz::gen", seed, fingerprint = fingerprint.short(), nodes = graph.operator_count(), "generated");

        let run = if self.execute { Some(run_once(&config, &graph)?) } else { None };

        if let Some(dir) = &self.output {
            save(dir, &graph)?;
        }

        if self.json {
            let mut doc = json!({
                "seed": seed,
                "fingerprint": fingerprint,
                "stats": stats,
                "graph": graph,
            });
            if let Some((report, verdict)) = &run {
                doc["report"] = serde_json::to_value(report)?;
                doc["verdict"] = serde_json::to_value(verdict)?;
            }
            println!("{}", serde_json::to_string_pretty(&doc)?);
        } else {
            print_text(seed, &fingerprint, &graph, &stats, run.as_ref());
            if let Some(dir) = &self.output {
                println!("saved to {}", dir.display());
            }
        }
        Ok(())
    }
}

fn run_once(config: &FuzzConfig, graph: &Graph) -> Result<(RunReport, Verdict)> {
    let runner = DifferentialRunner::from_config(config, Some(super::self_worker()?))?;
    let filter = ResultFilter::from_config(&config.filter)?;
    let inputs = materialize(graph);
    let report = runner.run(graph, &inputs);
    let verdict = filter.classify(graph, &report, &CampaignState::new("generate", graph.seed));
    Ok((report, verdict))
}

fn save(dir: &Path, graph: &Graph) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    write_atomic(&dir.join("graph.json"), graph.to_json()?.as_bytes())?;
    write_atomic(&dir.join("graph.dot"), to_dot(graph).as_bytes())?;
    Ok(())
}

fn print_text(seed: u64, fingerprint: &Fingerprint, graph: &Graph, stats: &BuildStats, run: Option<&(RunReport, Verdict)>) {
    println!("{} {}", style("graph").bold(), style(fingerprint.short()).cyan());
    println!("  seed:      {seed}");
    println!("  operators: {} ({} forward, {} backward)", graph.operator_count(), stats.forward, stats.backward);
    println!("  ops:       {}", graph.op_sequence().join(" -> "));
    let specs = |specs: Vec<&TensorSpec>| specs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
    println!("  inputs:    {}", specs(graph.input_specs()));
    println!("  outputs:   {}", specs(graph.output_specs()));

    let Some((report, verdict)) = run else {
        return;
    };
    println!();
    for outcome in &report.outcomes {
        let status = style(format!("{:<8}", outcome.status.to_string()));
        let status = if outcome.is_ok() { status.green() } else { status.red() };
        println!("  {:<24} {status} {} ms", outcome.backend, outcome.elapsed_ms);
        if let Some(err) = &outcome.error {
            println!("    {err}");
        }
    }
    for divergence in &report.divergences {
        println!("  {} vs {}: {}", divergence.backend, divergence.against, divergence.mismatch);
    }
    let disposition = if verdict.is_interesting() {
        style(verdict.disposition.to_string()).yellow().bold()
    } else {
        style(verdict.disposition.to_string()).dim()
    };
    println!("  verdict:   {disposition}");
    for finding in &verdict.findings {
        println!("    [{}] {}", finding.class, finding.detail);
    }
}
