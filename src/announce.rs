//! Announce validation: participant membership, provenance against the
//! recorded topology, and loop freedom of the hypothetical result.

use crate::registry::SENTINEL_AS;
use crate::state::LedgerState;
use crate::topology::Topology;
use crate::transaction::{
    ClaimValidator, Effects, InputEntry, OutputEntry, Rejection, TransactionType, TxHeader,
};
use std::collections::BTreeSet;
use tracing::debug;

/// Announcement payload: claimed upstream sources and the destinations the
/// route is sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announce {
    /// Claimed upstream AS identifiers; may contain the sentinel `"0"`.
    pub sources: Vec<String>,
    /// AS identifiers the announcement is sent to.
    pub destinations: Vec<String>,
}

impl Announce {
    /// Creates an announcement payload.
    pub fn new(sources: Vec<String>, destinations: Vec<String>) -> Self {
        Self {
            sources,
            destinations,
        }
    }

    /// Rejects any destination, or any non-sentinel source, missing from
    /// `known`. The sentinel only means "origin" as a source; as a
    /// destination it is an unregistered participant.
    pub fn check_participants(&self, known: &BTreeSet<String>) -> Result<(), Rejection> {
        self.destinations
            .iter()
            .chain(
                self.sources
                    .iter()
                    .filter(|asn| asn.as_str() != SENTINEL_AS),
            )
            .find(|asn| !known.contains(asn.as_str()))
            .map_or(Ok(()), |asn| {
                Err(Rejection::UnregisteredParticipant(asn.clone()))
            })
    }

    /// Checks the claimed sources against the claimant's recorded history.
    ///
    /// * `["0"]`: the claimant must already hold an edge to the prefix.
    /// * `["0", rest..]`: the origin edge is required and `rest + [prefix]`
    ///   must equal the claimant's successors exactly.
    /// * otherwise the sources must equal the successors exactly.
    pub fn verify_origin(&self, header: &TxHeader, topology: &Topology) -> Result<(), Rejection> {
        let (first, rest) = self
            .sources
            .split_first()
            .ok_or(Rejection::EmptySourceList)?;
        let claimant = header.as_source.as_str();
        let prefix = header.prefix.as_str();

        if first == SENTINEL_AS {
            if !topology.has_edge(claimant, prefix) {
                return Err(Rejection::MissingOriginEdge {
                    as_source: claimant.to_string(),
                    prefix: prefix.to_string(),
                });
            }
            if rest.is_empty() {
                return Ok(());
            }
            let mut claimed = rest.to_vec();
            claimed.push(prefix.to_string());
            return exact_successors(claimant, claimed, topology);
        }
        exact_successors(claimant, self.sources.clone(), topology)
    }

    /// Applies every (source, destination) relation to a copy of `topology`.
    ///
    /// The sentinel is never added as a node; an origin claim links the
    /// claimant straight to the prefix.
    pub fn hypothetical_topology(&self, header: &TxHeader, topology: &Topology) -> Topology {
        let claimant = header.as_source.as_str();
        let mut working = topology.clone();
        for src in &self.sources {
            let upstream = if src == SENTINEL_AS {
                header.prefix.as_str()
            } else {
                src.as_str()
            };
            for dst in &self.destinations {
                working.add_edge(claimant, upstream);
                working.add_edge(dst, claimant);
            }
        }
        working
    }

    /// Rejects the announcement if its hypothetical topology has a cycle
    /// reachable from the claimant.
    pub fn check_loops(&self, header: &TxHeader, topology: &Topology) -> Result<(), Rejection> {
        let working = self.hypothetical_topology(header, topology);
        match working.find_cycle_from(&header.as_source) {
            Some(cycle) => Err(Rejection::ForwardingLoop { cycle }),
            None => Ok(()),
        }
    }

    /// Cross product of sources and destinations as output segments.
    pub fn segments(&self, header: &TxHeader) -> Vec<OutputEntry> {
        self.sources
            .iter()
            .flat_map(|src| {
                self.destinations.iter().map(move |dst| {
                    OutputEntry::Announce(
                        header.prefix.clone(),
                        src.clone(),
                        header.as_source.clone(),
                        dst.clone(),
                    )
                })
            })
            .collect()
    }
}

fn exact_successors(
    claimant: &str,
    mut claimed: Vec<String>,
    topology: &Topology,
) -> Result<(), Rejection> {
    let recorded = topology.successors(claimant);
    claimed.sort();
    if claimed == recorded {
        Ok(())
    } else {
        Err(Rejection::ProvenanceMismatch {
            as_source: claimant.to_string(),
            claimed,
            recorded,
        })
    }
}

impl ClaimValidator for Announce {
    fn transaction_type(&self) -> TransactionType {
        TransactionType::Announce
    }

    fn check(&self, header: &TxHeader, state: &LedgerState) -> Result<Effects, Rejection> {
        let known = state.registry().identifiers();
        self.check_participants(&known)?;
        debug!(as_source = %header.as_source, "participants registered");

        let topology = state.topologies().snapshot(&header.prefix);
        self.verify_origin(header, &topology)?;
        debug!(as_source = %header.as_source, "provenance verified");

        self.check_loops(header, &topology)?;
        debug!(as_source = %header.as_source, "no forwarding loop");

        Ok(Effects {
            input: InputEntry::Announce(
                header.prefix.clone(),
                header.as_source.clone(),
                self.sources.clone(),
                self.destinations.clone(),
                header.bgp_timestamp,
            ),
            output: self.segments(header),
        })
    }
}
