//! Offline topology audit.
//!
//! Rebuilds per-prefix topologies from raw route-collector update dumps
//! (pipe-delimited, one update per line) and compares them edge for edge
//! with the ledger's view. The rebuilt topologies can also seed a fresh
//! [`TopologyStore`](crate::TopologyStore).

use crate::topology::Topology;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Number of `|`-separated fields in an update row.
pub const UPDATE_FIELDS: usize = 8;

/// Errors raised while reading update dumps.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuditError {
    /// Underlying filesystem failure.
    #[error("audit I/O error: {0}")]
    Io(String),
    /// A row did not carry the expected number of fields.
    #[error("line {line}: expected 8 fields, found {found}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// Number of fields present.
        found: usize,
    },
}

/// One parsed update row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRow {
    /// Affected prefix.
    pub prefix: String,
    /// Origin AS list (more than one for MOAS).
    pub origins: Vec<String>,
    /// AS path elements.
    pub path: Vec<String>,
    /// Collector project.
    pub project: String,
    /// Collector name.
    pub collector: String,
    /// `A` for announcements, `W` for withdrawals.
    pub kind: String,
    /// Collector timestamp.
    pub timestamp: String,
    /// Peer AS the update was received from.
    pub peer_asn: String,
}

impl UpdateRow {
    /// Returns true for announcement rows.
    pub fn is_announcement(&self) -> bool {
        self.kind == "A"
    }
}

/// Parses a single update row. Returns `Ok(None)` for a row whose prefix,
/// origin or path is empty, which terminates the dump.
pub fn parse_row(line_no: usize, line: &str) -> Result<Option<UpdateRow>, AuditError> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() != UPDATE_FIELDS {
        return Err(AuditError::Malformed {
            line: line_no,
            found: fields.len(),
        });
    }
    let [prefix, origin, path, project, collector, kind, timestamp, peer] = [
        fields[0], fields[1], fields[2], fields[3], fields[4], fields[5], fields[6], fields[7],
    ];
    if prefix.is_empty() || origin.is_empty() || path.is_empty() {
        return Ok(None);
    }
    let split = |value: &str| value.split(',').map(str::to_string).collect::<Vec<_>>();
    Ok(Some(UpdateRow {
        prefix: prefix.to_string(),
        origins: split(origin),
        path: split(path),
        project: project.to_string(),
        collector: collector.to_string(),
        kind: kind.to_string(),
        timestamp: timestamp.to_string(),
        peer_asn: peer.to_string(),
    }))
}

/// Rebuilds topologies from an update dump.
///
/// For every announcement and every origin `o`: `o -> prefix`, and `a -> o`
/// for each path element `a != o`.
pub fn rebuild_topologies<R: BufRead>(reader: R) -> Result<BTreeMap<String, Topology>, AuditError> {
    let mut topologies: BTreeMap<String, Topology> = BTreeMap::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| AuditError::Io(err.to_string()))?;
        let Some(row) = parse_row(idx + 1, line.trim_end_matches('\r'))? else {
            debug!(line = idx + 1, "update dump terminated by empty row");
            break;
        };
        if !row.is_announcement() {
            continue;
        }
        let topology = topologies
            .entry(row.prefix.clone())
            .or_insert_with(|| Topology::new(&row.prefix));
        for origin in &row.origins {
            topology.add_edge(origin, &row.prefix);
            for hop in row.path.iter().filter(|hop| *hop != origin) {
                topology.add_edge(hop, origin);
            }
        }
    }
    Ok(topologies)
}

/// Reads and rebuilds topologies from a dump file.
pub fn rebuild_from_file(path: &Path) -> Result<BTreeMap<String, Topology>, AuditError> {
    let file = File::open(path)
        .map_err(|err| AuditError::Io(format!("failed to read {}: {err}", path.display())))?;
    rebuild_topologies(BufReader::new(file))
}

/// Per-prefix discrepancy between the rebuilt and the ledger topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixMismatch {
    /// The ledger has no topology for the prefix.
    MissingInLedger(String),
    /// Edge counts differ.
    EdgeCount {
        /// Prefix compared.
        prefix: String,
        /// Edges rebuilt locally.
        local: usize,
        /// Edges recorded in the ledger.
        ledger: usize,
    },
    /// Ledger edges absent from the local rebuild.
    UnknownEdges {
        /// Prefix compared.
        prefix: String,
        /// Offending ledger edges.
        edges: Vec<[String; 2]>,
    },
}

/// Outcome of comparing rebuilt topologies with the ledger view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Number of prefixes compared.
    pub prefixes: usize,
    /// Discrepancies found.
    pub mismatches: Vec<PrefixMismatch>,
}

impl AuditReport {
    /// True when every compared prefix matched.
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Compares each locally rebuilt prefix against the ledger's edge pairs:
/// same edge count and every ledger edge present locally.
pub fn compare(
    local: &BTreeMap<String, Topology>,
    ledger: &BTreeMap<String, Vec<[String; 2]>>,
) -> AuditReport {
    let mut report = AuditReport {
        prefixes: local.len(),
        mismatches: Vec::new(),
    };
    for (prefix, topology) in local {
        let Some(ledger_edges) = ledger.get(prefix) else {
            report
                .mismatches
                .push(PrefixMismatch::MissingInLedger(prefix.clone()));
            continue;
        };
        let local_edges: BTreeSet<[String; 2]> = topology.edge_pairs().into_iter().collect();
        if local_edges.len() != ledger_edges.len() {
            report.mismatches.push(PrefixMismatch::EdgeCount {
                prefix: prefix.clone(),
                local: local_edges.len(),
                ledger: ledger_edges.len(),
            });
            continue;
        }
        let unknown: Vec<[String; 2]> = ledger_edges
            .iter()
            .filter(|edge| !local_edges.contains(*edge))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            report.mismatches.push(PrefixMismatch::UnknownEdges {
                prefix: prefix.clone(),
                edges: unknown,
            });
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: &str = "139.91.0.0/16";

    fn dump() -> String {
        [
            format!("{P}|8522|3333,1299,8522|ris|rrc00|A|1532509200|3333"),
            format!("{P}|8522|6939,8522|ris|rrc01|A|1532509201|6939"),
            format!("{P}|8522|6939|ris|rrc01|W|1532509202|6939"),
            "10.0.0.0/8|64500,64501|174|routeviews|rv2|A|1532509203|174".to_string(),
        ]
        .join("\n")
    }

    fn edges(items: &[[&str; 2]]) -> Vec<[String; 2]> {
        items
            .iter()
            .map(|[a, b]| [a.to_string(), b.to_string()])
            .collect()
    }

    #[test]
    fn rebuild_follows_origin_and_path() {
        let topologies = rebuild_topologies(dump().as_bytes()).unwrap();
        let topo = &topologies[P];
        assert!(topo.has_edge("8522", P));
        assert!(topo.has_edge("3333", "8522"));
        assert!(topo.has_edge("1299", "8522"));
        assert!(topo.has_edge("6939", "8522"));
        assert!(!topo.has_edge("8522", "8522"));
        assert_eq!(topo.edge_count(), 4);

        let moas = &topologies["10.0.0.0/8"];
        assert!(moas.has_edge("64500", "10.0.0.0/8"));
        assert!(moas.has_edge("64501", "10.0.0.0/8"));
        assert!(moas.has_edge("174", "64500"));
        assert!(moas.has_edge("174", "64501"));
    }

    #[test]
    fn empty_row_stops_parsing() {
        let text = format!("{P}|1|2,1|p|c|A|0|2\n|||p|c|A|0|0\n10.0.0.0/8|5|6,5|p|c|A|0|6");
        let topologies = rebuild_topologies(text.as_bytes()).unwrap();
        assert_eq!(topologies.len(), 1);
    }

    #[test]
    fn rebuild_reads_dump_files() {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("route_ledger_updates_{nanos}.txt"));
        std::fs::write(&path, dump()).unwrap();
        let from_file = rebuild_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(from_file, rebuild_topologies(dump().as_bytes()).unwrap());
        assert!(matches!(rebuild_from_file(&path), Err(AuditError::Io(_))));
    }

    #[test]
    fn malformed_row_is_reported() {
        let err = rebuild_topologies("a|b|c".as_bytes()).unwrap_err();
        assert_eq!(err, AuditError::Malformed { line: 1, found: 3 });
    }

    #[test]
    fn compare_requires_equal_counts_and_known_edges() {
        let local = rebuild_topologies(dump().as_bytes()).unwrap();
        let mut ledger = BTreeMap::new();
        ledger.insert(
            P.to_string(),
            edges(&[["1299", "8522"], ["3333", "8522"], ["6939", "8522"], ["8522", P]]),
        );
        ledger.insert(
            "10.0.0.0/8".to_string(),
            edges(&[
                ["174", "64500"],
                ["174", "64501"],
                ["64500", "10.0.0.0/8"],
                ["64501", "10.0.0.0/8"],
            ]),
        );
        assert!(compare(&local, &ledger).is_consistent());

        ledger.insert(P.to_string(), edges(&[["8522", P]]));
        let report = compare(&local, &ledger);
        assert!(matches!(
            report.mismatches.as_slice(),
            [PrefixMismatch::EdgeCount { local: 4, ledger: 1, .. }]
        ));

        ledger.insert(
            P.to_string(),
            edges(&[["1299", "8522"], ["3333", "8522"], ["7018", "8522"], ["8522", P]]),
        );
        let report = compare(&local, &ledger);
        assert_eq!(
            report.mismatches,
            vec![PrefixMismatch::UnknownEdges {
                prefix: P.to_string(),
                edges: edges(&[["7018", "8522"]]),
            }]
        );

        ledger.remove("10.0.0.0/8");
        let report = compare(&local, &ledger);
        assert!(report
            .mismatches
            .contains(&PrefixMismatch::MissingInLedger("10.0.0.0/8".into())));
    }
}
