//! Process-scoped ledger state: the participant registry, the topology store
//! and the admission paths that validate transactions against them.
//!
//! Two admission paths exist:
//!
//! * [`LedgerState::finalize`] validates against a snapshot and commits
//!   nothing. Two same-prefix announcements validated against the same
//!   snapshot can each pass, and their combined commit was never checked as
//!   a whole. [`TopologyStore::commit`] still refuses a fold that closes a
//!   cycle, but provenance drift between the two is not detected.
//! * [`LedgerState::admit`] holds a per-prefix lock across validation and
//!   commit, so admissions for one prefix are linearized. Different prefixes
//!   never contend. A prefix's lock is dropped from the table once no
//!   admission holds or awaits it.
//!
//! The global instance starts empty and is populated by whoever bootstraps
//! the process (see [`LedgerState::load_into`]); it is never torn down.

use crate::config::LedgerConfig;
use crate::registry::{ParticipantRegistry, RegistryError};
use crate::topology::{TopologyError, TopologyStore};
use crate::transaction::{LedgerRecord, Rejection, Transaction};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

static GLOBAL: Lazy<LedgerState> = Lazy::new(LedgerState::new);

/// Returns the process-wide ledger state.
pub fn global() -> &'static LedgerState {
    &GLOBAL
}

/// Errors raised while loading or persisting ledger state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    /// Registry load/save failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Topology load/save failure.
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// Registry, topology store and per-prefix admission locks.
#[derive(Debug, Default)]
pub struct LedgerState {
    registry: ParticipantRegistry,
    topologies: TopologyStore,
    admission: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LedgerState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a state from pre-built parts.
    pub fn with_parts(registry: ParticipantRegistry, topologies: TopologyStore) -> Self {
        Self {
            registry,
            topologies,
            admission: Mutex::new(HashMap::new()),
        }
    }

    /// Loads registry and topologies from the paths in `config`.
    pub fn from_config(config: &LedgerConfig) -> Result<Self, StateError> {
        let registry = ParticipantRegistry::load(&config.registry_path)?;
        let topologies = TopologyStore::load(&config.topology_path)?;
        info!(
            participants = registry.len(),
            prefixes = topologies.prefixes().len(),
            "ledger state loaded"
        );
        Ok(Self::with_parts(registry, topologies))
    }

    /// Replaces the contents of an existing state (typically [`global`])
    /// with what `config` points at. Prefixes missing from the topology file
    /// are dropped.
    pub fn load_into(&self, config: &LedgerConfig) -> Result<(), StateError> {
        let loaded = Self::from_config(config)?;
        self.registry.replace(loaded.registry.snapshot());
        self.topologies
            .replace_all(loaded.topologies.into_topologies());
        Ok(())
    }

    /// Writes the topology store back to `config.topology_path`.
    pub fn persist_topologies(&self, config: &LedgerConfig) -> Result<(), StateError> {
        self.topologies.save(&config.topology_path)?;
        Ok(())
    }

    /// Participant registry.
    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    /// Committed topologies.
    pub fn topologies(&self) -> &TopologyStore {
        &self.topologies
    }

    /// Validates against the current snapshot and returns the ledger record.
    ///
    /// Nothing is committed; see the module docs for the race this leaves
    /// open when callers commit later.
    pub fn finalize(&self, tx: Transaction) -> Result<LedgerRecord, Rejection> {
        tx.finalize(self)
    }

    /// Validates and commits under the prefix's admission lock.
    pub fn admit(&self, tx: Transaction) -> Result<LedgerRecord, Rejection> {
        let prefix = tx.header().prefix.clone();
        let lock = self.prefix_lock(&prefix);
        let outcome = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            debug!(%prefix, "admission lock held");
            tx.finalize(self).and_then(|record| {
                self.topologies.commit(&record)?;
                Ok(record)
            })
        };
        self.release_prefix_lock(&prefix, lock);
        outcome
    }

    /// Validates independent transactions in parallel; nothing is committed.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn validate_batch(&self, txs: Vec<Transaction>) -> Vec<Result<LedgerRecord, Rejection>> {
        use rayon::prelude::*;
        txs.into_par_iter().map(|tx| tx.finalize(self)).collect()
    }

    /// Validates independent transactions; nothing is committed.
    #[cfg(target_arch = "wasm32")]
    pub fn validate_batch(&self, txs: Vec<Transaction>) -> Vec<Result<LedgerRecord, Rejection>> {
        txs.into_iter().map(|tx| tx.finalize(self)).collect()
    }

    fn prefix_lock(&self, prefix: &str) -> Arc<Mutex<()>> {
        let mut locks = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(prefix.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // Clones are only handed out under the table lock, so a count of two
    // (table + caller) means nobody else holds or awaits this prefix.
    fn release_prefix_lock(&self, prefix: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(prefix);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{append_record, read_records};
    use crate::sign::signing_key_from_seed;
    use crate::topology::Topology;
    use crate::transaction::RejectionKind;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::thread;
    use std::time::{SystemTime, UNIX_EPOCH};

    const P: &str = "139.91.0.0/16";

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn seeded(participants: &[&str], edges: &[[&str; 2]]) -> LedgerState {
        let state = LedgerState::new();
        for asn in participants {
            state
                .registry()
                .register(asn, signing_key_from_seed(asn).verifying_key())
                .unwrap();
        }
        state
            .topologies()
            .replace(P, Topology::from_edges(P, edges.iter().copied()));
        state
    }

    fn announce(asn: &str, sources: &[&str], dests: &[&str], time: u64) -> Transaction {
        let mut tx = Transaction::announce(P, None, asn, strings(sources), strings(dests), time);
        tx.sign_with(&signing_key_from_seed(asn));
        tx
    }

    #[test]
    fn finalize_leaves_topology_untouched() {
        let state = seeded(&["A", "B"], &[["A", P]]);
        let before = state.topologies().snapshot(P);
        state.finalize(announce("A", &["0"], &["B"], 1)).unwrap();
        assert_eq!(state.topologies().snapshot(P), before);
    }

    #[test]
    fn admit_commits_announcement_edges() {
        let state = seeded(&["A", "B"], &[["A", P]]);
        let record = state.admit(announce("A", &["0"], &["B"], 1)).unwrap();
        assert_eq!(record.output.len(), 1);
        let topo = state.topologies().snapshot(P);
        assert!(topo.has_edge("A", P));
        assert!(topo.has_edge("B", "A"));
        // Announcing back to its own upstream closes a loop.
        assert!(state.admit(announce("B", &["A"], &["A"], 2)).is_err());
    }

    #[test]
    fn snapshot_race_is_caught_at_commit() {
        // Both announcements pass against the same snapshot, but together
        // they would form A -> C -> A.
        let state = seeded(&["A", "B", "C"], &[["A", P], ["C", P]]);
        let first = state.finalize(announce("A", &["0"], &["C"], 1)).unwrap();
        let second = state.finalize(announce("C", &["0"], &["A"], 2)).unwrap();
        state.topologies().commit(&first).unwrap();
        let err = state.topologies().commit(&second).unwrap_err();
        assert!(matches!(err, TopologyError::WouldCycle { .. }));
        assert!(state.topologies().snapshot(P).find_cycle_from("A").is_none());
    }

    #[test]
    fn serialized_admission_rejects_the_second_racer() {
        let state = seeded(&["A", "C"], &[["A", P], ["C", P]]);
        state.admit(announce("A", &["0"], &["C"], 1)).unwrap();
        let err = state.admit(announce("C", &["0"], &["A"], 2)).unwrap_err();
        assert_eq!(err.kind(), RejectionKind::Structural);
    }

    #[test]
    fn concurrent_admissions_keep_topology_acyclic() {
        let state = Arc::new(seeded(&["A", "C"], &[["A", P], ["C", P]]));
        let handles: Vec<_> = [("A", "C"), ("C", "A")]
            .into_iter()
            .enumerate()
            .map(|(idx, (claimant, dest))| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    state
                        .admit(announce(claimant, &["0"], &[dest], idx as u64))
                        .is_ok()
                })
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);
        let topo = state.topologies().snapshot(P);
        assert!(topo.find_cycle_from("A").is_none());
        assert!(topo.find_cycle_from("C").is_none());
    }

    #[test]
    fn batch_validation_runs_across_prefixes() {
        let state = seeded(&["A", "B"], &[["A", P]]);
        state
            .topologies()
            .replace("10.0.0.0/8", Topology::from_edges("10.0.0.0/8", [["B", "10.0.0.0/8"]]));
        let mut other = Transaction::withdraw("10.0.0.0/8", "B", 3, None);
        other.sign_with(&signing_key_from_seed("B"));
        let results = state.validate_batch(vec![
            announce("A", &["0"], &["B"], 1),
            other,
            announce("B", &["0"], &["A"], 2),
        ]);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(results[2].is_err());
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("route_ledger_{tag}_{unique}"))
    }

    fn write_config(dir: &Path) -> LedgerConfig {
        let config = LedgerConfig {
            registry_path: dir.join("registry.json"),
            topology_path: dir.join("topology.json"),
            ledger_path: dir.join("ledger.jsonl"),
            serialize_commits: true,
        };
        fs::create_dir_all(dir).unwrap();
        let config_path = dir.join("config.json");
        fs::write(&config_path, serde_json::to_vec(&config).unwrap()).unwrap();
        LedgerConfig::from_file(&config_path).unwrap()
    }

    #[test]
    fn admission_locks_are_released() {
        let state = seeded(&["A", "B"], &[["A", P]]);
        state.admit(announce("A", &["0"], &["B"], 1)).unwrap();
        assert!(state.admit(announce("B", &["A"], &["A"], 2)).is_err());
        assert!(state.admission.lock().unwrap().is_empty());
    }

    #[test]
    fn config_to_ledger_round_trip() {
        let dir = temp_dir("state");
        let config = write_config(&dir);
        let seed = seeded(&["A", "B"], &[["A", P]]);
        seed.registry().save(&config.registry_path).unwrap();
        seed.persist_topologies(&config).unwrap();

        let state = LedgerState::from_config(&config).unwrap();
        assert_eq!(state.registry().len(), 2);
        let record = state.admit(announce("A", &["0"], &["B"], 1)).unwrap();
        append_record(&config.ledger_path, &record).unwrap();
        state.persist_topologies(&config).unwrap();

        let reloaded = LedgerState::from_config(&config).unwrap();
        let topo = reloaded.topologies().snapshot(P);
        assert!(topo.has_edge("B", "A"));
        assert!(topo.has_edge("A", P));
        assert_eq!(read_records(&config.ledger_path).unwrap(), vec![record]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn load_into_replaces_existing_prefixes() {
        let dir = temp_dir("load_into");
        let config = write_config(&dir);
        let on_disk = LedgerState::new();
        on_disk
            .topologies()
            .replace("10.0.0.0/8", Topology::from_edges("10.0.0.0/8", [["B", "10.0.0.0/8"]]));
        on_disk
            .registry()
            .register("B", signing_key_from_seed("B").verifying_key())
            .unwrap();
        on_disk.registry().save(&config.registry_path).unwrap();
        on_disk.persist_topologies(&config).unwrap();

        let live = seeded(&["A"], &[["A", P]]);
        live.topologies()
            .replace("stale/24", Topology::from_edges("stale/24", [["A", "stale/24"]]));
        live.load_into(&config).unwrap();
        assert_eq!(live.topologies().prefixes(), vec!["10.0.0.0/8".to_string()]);
        assert!(live.registry().contains("B"));
        assert!(!live.registry().contains("A"));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn global_state_is_shared() {
        let a = global() as *const LedgerState;
        let b = global() as *const LedgerState;
        assert_eq!(a, b);
    }
}
