//! The campaign loop.
//!
//! One thread drives every stage:
//!
//! ```text
//! Init -> Generating -> Executing -> Filtering -> Recording -> Generating ...
//!                                                     |
//!                                               Checkpointing
//! ```
//!
//! and the loop reaches `Terminated` when the time budget runs out, the
//! iteration limit is hit, or a [`StopHandle`] fires. Stop conditions are
//! checked only at the top of an iteration; an execution in flight finishes
//! or times out first.
//!
//! State is checkpointed right after every new recording and otherwise every
//! `checkpoint_every` iterations. A restarted campaign resumes from the last
//! checkpoint. Iterations replayed after a crash rebuild the same graphs from
//! the same seeds, find their fingerprints already recorded, and write
//! nothing new. The one exception is a build cut short by the generation
//! time cap; such builds are logged and flagged in the bundle's `build.json`.

use crate::bundle::{BUGS_DIR, Bundle};
use crate::error::{CampaignError, Result};
use crate::filter::ResultFilter;
use crate::setup::prepare_registry;
use crate::state::{CampaignState, Counters, STATE_FILE};
use opfuzz_backends::materialize;
use opfuzz_common::FuzzConfig;
use opfuzz_graph::GraphBuilder;
use opfuzz_ops::OperatorSpecRegistry;
use opfuzz_runner::{DifferentialRunner, WorkerCommand};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Generating,
    Executing,
    Filtering,
    Recording,
    Checkpointing,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Init => "init",
            Phase::Generating => "generating",
            Phase::Executing => "executing",
            Phase::Filtering => "filtering",
            Phase::Recording => "recording",
            Phase::Checkpointing => "checkpointing",
            Phase::Terminated => "terminated",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TimeBudget,
    MaxIterations,
    Stopped,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::TimeBudget => "time budget exhausted",
            StopReason::MaxIterations => "iteration limit reached",
            StopReason::Stopped => "stopped",
        })
    }
}

/// Asks a running campaign to stop before its next iteration.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// What one run of the loop did, plus the campaign's cumulative counters.
#[derive(Debug, Clone)]
pub struct CampaignSummary {
    pub name: String,
    pub dir: PathBuf,
    pub reason: StopReason,
    /// Iterations run by this process.
    pub iterations: u64,
    pub elapsed: Duration,
    pub counters: Counters,
    /// Bundles written by this process.
    pub recorded: Vec<PathBuf>,
}

impl fmt::Display for CampaignSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        writeln!(
            f,
            "campaign {} {} after {} iterations ({:.1}s)",
            self.name,
            self.reason,
            self.iterations,
            self.elapsed.as_secs_f64()
        )?;
        writeln!(f, "  graphs:     {} ({} failed to build)", c.graphs, c.generation_failures)?;
        writeln!(f, "  bugs:       {} ({} new this run)", c.bugs, self.recorded.len())?;
        writeln!(f, "  duplicates: {}", c.duplicates)?;
        writeln!(f, "  benign:     {}", c.benign)?;
        for (class, count) in &c.by_class {
            writeln!(f, "    {class:<12}{count}")?;
        }
        write!(f, "  reports:    {}", self.dir.join(BUGS_DIR).display())
    }
}

pub struct CampaignOrchestrator<'c> {
    config: &'c FuzzConfig,
    registry: OperatorSpecRegistry,
    runner: DifferentialRunner,
    filter: ResultFilter,
    dir: PathBuf,
    state: CampaignState,
    phase: Phase,
    stop: StopHandle,
    since_checkpoint: u64,
}

impl<'c> CampaignOrchestrator<'c> {
    /// Validate the configuration, prepare the registry (inferring rules if
    /// configured) and open the campaign.
    pub fn from_config(config: &'c FuzzConfig, worker: Option<WorkerCommand>) -> Result<Self> {
        config.validate()?;
        let registry = prepare_registry(config, worker.clone())?;
        let runner = DifferentialRunner::from_config(config, worker)?;
        Self::new(config, registry, runner)
    }

    /// Open the campaign directory: resume its state when `campaign.resume`
    /// is set, otherwise create fresh state. An existing state file without
    /// `resume` is an error.
    pub fn new(config: &'c FuzzConfig, registry: OperatorSpecRegistry, runner: DifferentialRunner) -> Result<Self> {
        config.validate()?;
        let filter = ResultFilter::from_config(&config.filter)?;
        let base_seed = config.campaign.seed.unwrap_or_else(rand::random);
        let name = config.campaign.name.clone().unwrap_or_else(|| format!("campaign-{base_seed}"));
        let dir = config.campaign.root.join(&name);
        let state_path = dir.join(STATE_FILE);

        let state = if state_path.exists() {
            if !config.campaign.resume {
                return Err(CampaignError::AlreadyExists { path: dir });
            }
            let state = CampaignState::load(&state_path)?;
            if config.campaign.seed.is_some_and(|seed| seed != state.base_seed) {
                warn!(
                    target: "opfuzz::fuzz",
                    recorded = state.base_seed,
                    "campaign.seed differs from the resumed campaign; keeping the recorded seed"
                );
            }
            info!(
                target: "opfuzz::fuzz",
                phase = %Phase::Init,
                campaign = %name,
                cursor = state.cursor,
                seen = state.seen_len(),
                "resuming"
            );
            state
        } else {
            if config.campaign.resume {
                info!(target: "opfuzz::fuzz", campaign = %name, "nothing to resume; starting fresh");
            }
            let state = CampaignState::new(&name, base_seed);
            state.save(&state_path)?;
            info!(target: "opfuzz::fuzz", phase = %Phase::Init, campaign = %name, seed = base_seed, "starting");
            state
        };

        Ok(Self {
            config,
            registry,
            runner,
            filter,
            dir,
            state,
            phase: Phase::Init,
            stop: StopHandle::new(),
            since_checkpoint: 0,
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &CampaignState {
        &self.state
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn run(&mut self) -> Result<CampaignSummary> {
        let budget = self.config.campaign.time_budget()?;
        let started = Instant::now();
        let first = self.state.cursor;
        let mut recorded = Vec::new();

        let reason = loop {
            self.phase = Phase::Generating;
            if self.stop.is_stopped() {
                break StopReason::Stopped;
            }
            if started.elapsed() >= budget {
                break StopReason::TimeBudget;
            }
            if self.config.campaign.max_iterations.is_some_and(|max| self.state.cursor >= max) {
                break StopReason::MaxIterations;
            }
            if let Some(path) = self.iterate()? {
                recorded.push(path);
            }
        };

        self.checkpoint()?;
        self.phase = Phase::Terminated;
        let summary = CampaignSummary {
            name: self.state.name.clone(),
            dir: self.dir.clone(),
            reason,
            iterations: self.state.cursor - first,
            elapsed: started.elapsed(),
            counters: self.state.counters.clone(),
            recorded,
        };
        info!(
            target: "opfuzz::fuzz",
            phase = %self.phase,
            %reason,
            iterations = summary.iterations,
            bugs = summary.counters.bugs,
            duplicates = summary.counters.duplicates,
            "campaign finished"
        );
        Ok(summary)
    }

    /// One pass through generation, execution, filtering and recording.
    /// Returns the bundle written, if any.
    fn iterate(&mut self) -> Result<Option<PathBuf>> {
        let iteration = self.state.cursor;
        let seed = self.state.next_seed();

        let builder = GraphBuilder::new(&self.registry, &self.config.generation);
        let (graph, stats) = match builder.build_with_stats(self.config.generation.max_nodes, seed) {
            Ok(built) => built,
            Err(err) => {
                warn!(target: "opfuzz::gen", iteration, seed, "generation failed: {err}");
                self.state.counters.generation_failures += 1;
                self.advance(false)?;
                return Ok(None);
            }
        };
        self.state.counters.graphs += 1;
        if stats.timed_out {
            warn!(target: "opfuzz::gen", iteration, seed, nodes = graph.nodes.len(), "generation time cap hit; graph may not replay from its seed");
        }

        self.phase = Phase::Executing;
        let inputs = materialize(&graph);
        let report = self.runner.run(&graph, &inputs);

        self.phase = Phase::Filtering;
        let verdict = self.filter.classify(&graph, &report, &self.state);

        self.phase = Phase::Recording;
        let mut written = None;
        if verdict.is_interesting() {
            let bundle = Bundle { graph: &graph, inputs: &inputs, report: &report, verdict: &verdict, stats: &stats };
            let path = bundle.write(&self.dir, self.config.campaign.save_viz)?;
            self.state.record(verdict.fingerprint.clone(), verdict.primary_class().unwrap_or("case"));
            written = Some(path);
        } else if verdict.duplicate {
            self.state.counters.duplicates += 1;
            debug!(
                target: "opfuzz::fuzz",
                graph_id = %report.graph_id,
                fingerprint = %verdict.fingerprint.short(),
                "already recorded"
            );
        } else {
            self.state.counters.benign += 1;
        }
        debug!(target: "opfuzz::fuzz", iteration, seed, graph_id = %report.graph_id, disposition = %verdict.disposition, "iteration done");

        self.advance(written.is_some())?;
        Ok(written)
    }

    fn advance(&mut self, force_checkpoint: bool) -> Result<()> {
        self.state.cursor += 1;
        self.since_checkpoint += 1;
        if force_checkpoint || self.since_checkpoint >= self.config.campaign.checkpoint_every {
            self.checkpoint()?;
        }
        Ok(())
    }

    fn checkpoint(&mut self) -> Result<()> {
        let resume_phase = self.phase;
        self.phase = Phase::Checkpointing;
        self.state.save(&self.dir.join(STATE_FILE))?;
        self.since_checkpoint = 0;
        let c = &self.state.counters;
        info!(
            target: "opfuzz::fuzz",
            phase = %self.phase,
            cursor = self.state.cursor,
            graphs = c.graphs,
            bugs = c.bugs,
            duplicates = c.duplicates,
            "checkpoint"
        );
        self.phase = resume_phase;
        Ok(())
    }
}
