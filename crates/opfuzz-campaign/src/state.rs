//! Persistent campaign state.
//!
//! [`CampaignState`] is the only state a campaign carries between
//! iterations and across restarts: counters, the fingerprints already
//! recorded, and the cursor of the next iteration. It is loaded once at
//! start and written whole on every checkpoint. The report directory is
//! never consulted for deduplication.

use crate::error::{CampaignError, Result};
use opfuzz_common::fs::write_atomic;
use opfuzz_graph::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

pub const STATE_FILE: &str = "state.json";
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Counters {
    /// Iterations that produced a graph.
    pub graphs: u64,
    /// Iterations whose construction failed outright.
    pub generation_failures: u64,
    pub benign: u64,
    /// Distinct interesting cases recorded.
    pub bugs: u64,
    /// Interesting cases whose fingerprint was already recorded.
    pub duplicates: u64,
    /// Recorded cases per primary class.
    pub by_class: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignState {
    pub version: u32,
    pub name: String,
    pub base_seed: u64,
    /// Next iteration to run. Iteration `i` builds its graph from seed
    /// `base_seed + i`.
    pub cursor: u64,
    pub counters: Counters,
    seen: BTreeSet<Fingerprint>,
}

impl CampaignState {
    pub fn new(name: impl Into<String>, base_seed: u64) -> Self {
        Self {
            version: STATE_VERSION,
            name: name.into(),
            base_seed,
            cursor: 0,
            counters: Counters::default(),
            seen: BTreeSet::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| CampaignError::io("read", path, e))?;
        let state: CampaignState = serde_json::from_slice(&bytes)
            .map_err(|e| CampaignError::CorruptState { path: path.to_path_buf(), reason: e.to_string() })?;
        if state.version != STATE_VERSION {
            return Err(CampaignError::CorruptState {
                path: path.to_path_buf(),
                reason: format!("format version {}, expected {STATE_VERSION}", state.version),
            });
        }
        Ok(state)
    }

    /// Replace the file at `path` in one step, so a crash mid-save leaves
    /// the previous checkpoint intact.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| CampaignError::CorruptState { path: path.to_path_buf(), reason: e.to_string() })?;
        write_atomic(path, &json).map_err(|e| CampaignError::io("write", path, e))?;
        debug!(target: "opfuzz::fuzz", cursor = self.cursor, seen = self.seen.len(), "state saved");
        Ok(())
    }

    pub fn next_seed(&self) -> u64 {
        self.seed_at(self.cursor)
    }

    pub fn seed_at(&self, iteration: u64) -> u64 {
        self.base_seed.wrapping_add(iteration)
    }

    pub fn is_seen(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    pub fn seen(&self) -> impl Iterator<Item = &Fingerprint> {
        self.seen.iter()
    }

    /// Count a recorded case. Returns `false` if the fingerprint was already
    /// present, in which case nothing changes.
    pub fn record(&mut self, fingerprint: Fingerprint, class: &str) -> bool {
        if !self.seen.insert(fingerprint) {
            return false;
        }
        self.counters.bugs += 1;
        *self.counters.by_class.entry(class.to_string()).or_default() += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c").join(STATE_FILE);
        let mut state = CampaignState::new("c", 40);
        state.cursor = 3;
        assert!(state.record(Fingerprint::from("ab".repeat(32)), "crash"));
        state.save(&path).unwrap();
        let loaded = CampaignState::load(&path).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.next_seed(), 43);
    }

    #[test]
    fn record_is_idempotent() {
        let mut state = CampaignState::new("c", 0);
        let fp = Fingerprint::from("cd".repeat(32));
        assert!(state.record(fp.clone(), "nan"));
        assert!(!state.record(fp.clone(), "crash"));
        assert!(state.is_seen(&fp));
        assert_eq!(state.counters.bugs, 1);
        assert_eq!(state.counters.by_class.get("nan"), Some(&1));
        assert_eq!(state.counters.by_class.get("crash"), None);
    }

    #[test]
    fn seed_cursor_wraps() {
        let mut state = CampaignState::new("c", u64::MAX);
        state.cursor = 2;
        assert_eq!(state.next_seed(), 1);
    }

    #[test]
    fn truncated_state_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STATE_FILE);
        std::fs::write(&path, b"{\"version\": 1, \"name\"").unwrap();
        assert!(matches!(CampaignState::load(&path), Err(CampaignError::CorruptState { .. })));
    }
}
