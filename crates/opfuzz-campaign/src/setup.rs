//! Operator registry preparation shared by campaigns and `opfuzz infer`.

use crate::error::Result;
use opfuzz_backends::{Backend, create_backend};
use opfuzz_common::{ConfigError, FuzzConfig};
use opfuzz_infer::{BackendOracle, InferenceReport, RuleFile, RuleInferenceEngine};
use opfuzz_ops::OperatorSpecRegistry;
use opfuzz_runner::{Isolation, Limits, WorkerCommand};
use std::sync::Arc;
use tracing::{info, warn};

/// The built-in catalog restricted to `[model].opset`, weighted when
/// selection is weighted.
pub fn base_registry(config: &FuzzConfig) -> Result<OperatorSpecRegistry> {
    let mut registry = OperatorSpecRegistry::builtin(config.inference.max_rank);
    registry.configure(&config.model, &config.generation)?;
    Ok(registry)
}

/// Registry a campaign generates from. With `inference.rules_path` set,
/// learned rules are loaded from it, or inferred and saved there when the
/// file does not exist yet. Without it the template priors are used.
pub fn prepare_registry(config: &FuzzConfig, worker: Option<WorkerCommand>) -> Result<OperatorSpecRegistry> {
    let mut registry = base_registry(config)?;
    let Some(path) = &config.inference.rules_path else {
        return Ok(registry);
    };
    if path.exists() {
        let rules = RuleFile::load(path)?;
        if rules.max_rank < config.inference.max_rank {
            warn!(
                target: "opfuzz::infer",
                learned = rules.max_rank,
                configured = config.inference.max_rank,
                "rule file was learned for lower ranks"
            );
        }
        let applied = rules.apply(&mut registry);
        info!(target: "opfuzz::infer", path = %path.display(), backend = %rules.backend, applied, "loaded learned rules");
    } else {
        info!(target: "opfuzz::infer", path = %path.display(), "no rule file yet; inferring");
        let (rules, _) = infer_rules(config, &mut registry, worker)?;
        rules.save(path)?;
    }
    Ok(registry)
}

/// Probe every operator in `registry` against the inference backend and
/// install the learned predicates.
pub fn infer_rules(
    config: &FuzzConfig,
    registry: &mut OperatorSpecRegistry,
    worker: Option<WorkerCommand>,
) -> Result<(RuleFile, Vec<InferenceReport>)> {
    let name = config
        .inference
        .backend
        .as_ref()
        .or_else(|| config.backend.targets.first())
        .ok_or(ConfigError::Missing("backend.targets"))?;
    let backend: Arc<dyn Backend> = Arc::from(create_backend(name)?);
    let isolation = Isolation::from_mode(config.backend.isolation, worker)?;
    let seed = config.campaign.seed.unwrap_or_default();
    let mut oracle = BackendOracle::new(backend, isolation, Limits::from(&config.backend), seed);
    let mut engine = RuleInferenceEngine::new(&config.inference, seed);
    Ok(engine.infer_registry(registry, &mut oracle)?)
}
