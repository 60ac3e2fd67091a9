//! Per-prefix forwarding topologies and the lock-guarded store holding them.
//!
//! A [`Topology`] is a directed graph whose nodes are AS identifiers plus the
//! prefix itself. An edge `u -> v` records that `u` learned the route from
//! `v`; the prefix node is the ultimate sink. Committed topologies are kept
//! acyclic.

use crate::registry::SENTINEL_AS;
use crate::transaction::{LedgerRecord, OutputEntry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by topology persistence and commits.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// Underlying filesystem failure.
    #[error("topology I/O error: {0}")]
    Io(String),
    /// JSON decoding failure.
    #[error("topology decode error: {0}")]
    Decode(String),
    /// Folding the record would leave a cycle in the committed topology.
    #[error("commit for prefix {prefix} would close a cycle through {node}")]
    WouldCycle {
        /// Prefix whose topology was being updated.
        prefix: String,
        /// Node from which the cycle is reachable.
        node: String,
    },
}

/// Directed graph of forwarding relations for one prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    adjacency: BTreeMap<String, BTreeSet<String>>,
}

impl Topology {
    /// Creates a topology containing only the prefix sink node.
    pub fn new(prefix: &str) -> Self {
        let mut topology = Self::default();
        topology.add_node(prefix);
        topology
    }

    /// Builds a topology for `prefix` from `[source, destination]` pairs.
    pub fn from_edges<I, S>(prefix: &str, edges: I) -> Self
    where
        I: IntoIterator<Item = [S; 2]>,
        S: AsRef<str>,
    {
        let mut topology = Self::new(prefix);
        for [src, dst] in edges {
            topology.add_edge(src.as_ref(), dst.as_ref());
        }
        topology
    }

    /// Adds a node if it is not already present.
    pub fn add_node(&mut self, node: &str) {
        self.adjacency.entry(node.to_string()).or_default();
    }

    /// Adds the edge `from -> to`, creating either endpoint as needed.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_node(to);
        self.adjacency
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    /// Returns true if `node` is part of the graph.
    pub fn has_node(&self, node: &str) -> bool {
        self.adjacency.contains_key(node)
    }

    /// Returns true if the edge `from -> to` exists.
    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.adjacency
            .get(from)
            .map_or(false, |succ| succ.contains(to))
    }

    /// Sorted successor list of `node`; empty when the node is absent.
    pub fn successors(&self, node: &str) -> Vec<String> {
        self.adjacency
            .get(node)
            .map(|succ| succ.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).sum()
    }

    /// Ordered `[source, destination]` pairs, the form auditors compare.
    pub fn edge_pairs(&self) -> Vec<[String; 2]> {
        self.adjacency
            .iter()
            .flat_map(|(src, succ)| succ.iter().map(move |dst| [src.clone(), dst.clone()]))
            .collect()
    }

    /// Searches for a directed cycle reachable from `source`.
    ///
    /// Returns the nodes of the first cycle found, in traversal order, or
    /// `None` when the reachable subgraph is acyclic or `source` is absent.
    pub fn find_cycle_from(&self, source: &str) -> Option<Vec<String>> {
        if !self.has_node(source) {
            return None;
        }
        let mut finished: BTreeSet<&str> = BTreeSet::new();
        let mut path: Vec<&str> = Vec::new();
        let mut on_path: BTreeSet<&str> = BTreeSet::new();
        let mut stack: Vec<(&str, Vec<&str>)> = Vec::new();

        let root = self.adjacency.get_key_value(source)?.0.as_str();
        stack.push((root, self.successor_refs(root)));
        path.push(root);
        on_path.insert(root);

        while let Some((node, pending)) = stack.last_mut() {
            match pending.pop() {
                Some(next) if on_path.contains(next) => {
                    let start = path.iter().position(|n| *n == next).unwrap_or(0);
                    return Some(path[start..].iter().map(|n| n.to_string()).collect());
                }
                Some(next) if finished.contains(next) => {}
                Some(next) => {
                    let children = self.successor_refs(next);
                    stack.push((next, children));
                    path.push(next);
                    on_path.insert(next);
                }
                None => {
                    let done = *node;
                    stack.pop();
                    path.pop();
                    on_path.remove(done);
                    finished.insert(done);
                }
            }
        }
        None
    }

    /// Returns true if at least one simple path leads from `from` to `to`.
    ///
    /// A missing `from` node yields `false`, as does `from == to` (a simple
    /// path needs at least one edge).
    pub fn has_simple_path(&self, from: &str, to: &str) -> bool {
        if from == to || !self.has_node(from) || !self.has_node(to) {
            return false;
        }
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut stack = self.successor_refs(from);
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if node == from || !seen.insert(node) {
                continue;
            }
            stack.extend(self.successor_refs(node));
        }
        false
    }

    fn successor_refs(&self, node: &str) -> Vec<&str> {
        self.adjacency
            .get(node)
            .map(|succ| succ.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct TopologyFile {
    prefixes: BTreeMap<String, Vec<[String; 2]>>,
}

/// Lock-guarded map from prefix to its committed topology.
///
/// Reads hand out private copies; writes replace a prefix's topology
/// wholesale.
#[derive(Debug, Default)]
pub struct TopologyStore {
    inner: Mutex<BTreeMap<String, Topology>>,
}

impl TopologyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, BTreeMap<String, Topology>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads a store from a JSON map of `prefix -> [[src, dst], ...]`.
    ///
    /// A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, TopologyError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).map_err(|err| TopologyError::Io(err.to_string()))?;
        let file: TopologyFile =
            serde_json::from_slice(&bytes).map_err(|err| TopologyError::Decode(err.to_string()))?;
        let map = file
            .prefixes
            .into_iter()
            .map(|(prefix, edges)| {
                let topology = Topology::from_edges(&prefix, edges);
                (prefix, topology)
            })
            .collect();
        Ok(Self {
            inner: Mutex::new(map),
        })
    }

    /// Persists the store as JSON, writing through a temporary file.
    pub fn save(&self, path: &Path) -> Result<(), TopologyError> {
        let file = TopologyFile {
            prefixes: self.export(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| TopologyError::Io(err.to_string()))?;
        }
        let data = serde_json::to_vec_pretty(&file)
            .map_err(|err| TopologyError::Decode(err.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(|err| TopologyError::Io(err.to_string()))?;
        fs::rename(&tmp, path).map_err(|err| TopologyError::Io(err.to_string()))
    }

    /// Copies the topology of `prefix` out of the store.
    ///
    /// An unknown prefix reads as a topology holding only the prefix node.
    pub fn snapshot(&self, prefix: &str) -> Topology {
        self.guard()
            .get(prefix)
            .cloned()
            .unwrap_or_else(|| Topology::new(prefix))
    }

    /// Replaces the topology of `prefix`.
    pub fn replace(&self, prefix: &str, topology: Topology) {
        self.guard().insert(prefix.to_string(), topology);
    }

    /// Swaps the whole prefix map for `topologies`; prefixes absent from it
    /// are dropped.
    pub fn replace_all(&self, topologies: BTreeMap<String, Topology>) {
        *self.guard() = topologies;
    }

    /// Consumes the store and returns its prefix map.
    pub fn into_topologies(self) -> BTreeMap<String, Topology> {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sorted list of prefixes with a recorded topology.
    pub fn prefixes(&self) -> Vec<String> {
        self.guard().keys().cloned().collect()
    }

    /// Ordered `[source, destination]` edge pairs recorded for `prefix`.
    pub fn edge_pairs(&self, prefix: &str) -> Vec<[String; 2]> {
        self.guard()
            .get(prefix)
            .map(Topology::edge_pairs)
            .unwrap_or_default()
    }

    /// Edge pairs for every prefix, keyed by prefix.
    pub fn export(&self) -> BTreeMap<String, Vec<[String; 2]>> {
        self.guard()
            .iter()
            .map(|(prefix, topology)| (prefix.clone(), topology.edge_pairs()))
            .collect()
    }

    /// Folds an accepted record into the committed topology.
    ///
    /// Each announce segment `(P, src, as, dst)` contributes `as -> src` (or
    /// `as -> P` when `src` is the sentinel) and `dst -> as`. Withdraw records
    /// leave the topology unchanged. Returns the number of edges added.
    pub fn commit(&self, record: &LedgerRecord) -> Result<usize, TopologyError> {
        let mut guard = self.guard();
        let mut staged: BTreeMap<String, Topology> = BTreeMap::new();
        let mut touched: BTreeSet<(String, String)> = BTreeSet::new();
        let mut added = 0usize;

        for entry in &record.output {
            let OutputEntry::Announce(prefix, src, claimant, dst) = entry else {
                continue;
            };
            let topology = staged.entry(prefix.clone()).or_insert_with(|| {
                guard
                    .get(prefix)
                    .cloned()
                    .unwrap_or_else(|| Topology::new(prefix))
            });
            let upstream = if src == SENTINEL_AS { prefix } else { src };
            for (from, to) in [(claimant, upstream), (dst, claimant)] {
                if !topology.has_edge(from, to) {
                    topology.add_edge(from, to);
                    added += 1;
                }
            }
            touched.insert((prefix.clone(), claimant.clone()));
        }

        for (prefix, claimant) in &touched {
            if let Some(topology) = staged.get(prefix) {
                if topology.find_cycle_from(claimant).is_some() {
                    return Err(TopologyError::WouldCycle {
                        prefix: prefix.clone(),
                        node: claimant.clone(),
                    });
                }
            }
        }

        for (prefix, topology) in staged {
            debug!(%prefix, edges = topology.edge_count(), "replacing committed topology");
            guard.insert(prefix, topology);
        }
        if added > 0 {
            info!(txid = %record.txid, added, "committed announcement edges");
        }
        Ok(added)
    }
}
