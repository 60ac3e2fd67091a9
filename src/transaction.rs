//! Route transactions: the shared record, its state machine and the ledger
//! record emitted on acceptance.
//!
//! A [`Transaction`] moves `Created -> Validating -> {Accepted, Rejected}`.
//! Input and output entries are written once, only when validation succeeds,
//! and a rejected record carries none. Validation never commits topology
//! state; folding an accepted record is the caller's job (see
//! [`TopologyStore::commit`](crate::TopologyStore::commit)).

use crate::announce::Announce;
use crate::sign::{encode_signature_base64, sign_digest, verify_digest};
use crate::state::LedgerState;
use crate::withdraw::Withdraw;
use crate::{ParticipantRegistry, TopologyError};
use ed25519_dalek::{Signature, SigningKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Transaction type tag as written into ledger records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    /// Route announcement.
    #[serde(rename = "BGP Announce")]
    Announce,
    /// Route withdrawal.
    #[serde(rename = "BGP Withdraw")]
    Withdraw,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Announce => f.write_str("BGP Announce"),
            Self::Withdraw => f.write_str("BGP Withdraw"),
        }
    }
}

/// Lifecycle of a transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Constructed, not yet validated.
    Created,
    /// Validation in progress.
    Validating,
    /// Validation succeeded; the record is immutable.
    Accepted,
    /// Validation failed; the record should be discarded.
    Rejected,
}

/// Input entry captured on acceptance. Serialized as a JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputEntry {
    /// `(prefix, claiming AS, sources, destinations, external timestamp)`.
    Announce(String, String, Vec<String>, Vec<String>, Option<u64>),
    /// `(prefix, claiming AS, external timestamp)`.
    Withdraw(String, String, Option<u64>),
}

/// Output entry captured on acceptance. Serialized as a JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputEntry {
    /// Path segment `(prefix, source, claiming AS, destination)`.
    Announce(String, String, String, String),
    /// `(prefix, claiming AS)`.
    Withdraw(String, String),
}

/// Ledger-ready record produced by a successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// `"BGP Announce"` or `"BGP Withdraw"`.
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// Input entries.
    pub input: Vec<InputEntry>,
    /// Output entries.
    pub output: Vec<OutputEntry>,
    /// Logical time of the transaction.
    pub timestamp: u64,
    /// Hex SHA-256 transaction id.
    pub txid: String,
    /// Base64 ed25519 signature over the txid.
    pub signature: String,
}

/// Coarse classification of a [`Rejection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Signature absent, unverifiable, or signer unregistered.
    Authentication,
    /// Claimed provenance disagrees with the recorded topology.
    Provenance,
    /// The change would introduce a forwarding loop.
    Structural,
    /// A source or destination is not a registered participant.
    Unregistered,
    /// No advertised path exists to withdraw.
    Unreachable,
    /// The record already left the `Created` state.
    NotPending,
}

/// Reason a transaction was not admitted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejection {
    /// Signature missing, invalid, or the signer has no registered key.
    #[error("signature for AS {as_source} missing or unverifiable")]
    Authentication {
        /// Claiming AS.
        as_source: String,
    },
    /// A listed source or destination is not registered.
    #[error("unregistered participant {0}")]
    UnregisteredParticipant(String),
    /// The announcement carried no sources.
    #[error("announcement carries an empty source list")]
    EmptySourceList,
    /// Origin claim without a recorded `AS -> prefix` edge.
    #[error("AS {as_source} has no recorded origin edge to {prefix}")]
    MissingOriginEdge {
        /// Claiming AS.
        as_source: String,
        /// Announced prefix.
        prefix: String,
    },
    /// Claimed sources differ from the recorded successor set.
    #[error("AS {as_source} claims sources {claimed:?} but recorded {recorded:?}")]
    ProvenanceMismatch {
        /// Claiming AS.
        as_source: String,
        /// Claimed set, sorted.
        claimed: Vec<String>,
        /// Recorded successor set, sorted.
        recorded: Vec<String>,
    },
    /// The hypothetical topology contains a cycle reachable from the claimant.
    #[error("would introduce forwarding loop {cycle:?}")]
    ForwardingLoop {
        /// Nodes on the detected cycle.
        cycle: Vec<String>,
    },
    /// No path from the withdrawing AS to the prefix.
    #[error("no advertised path from AS {as_source} to {prefix} to withdraw")]
    NoAdvertisedPath {
        /// Withdrawing AS.
        as_source: String,
        /// Withdrawn prefix.
        prefix: String,
    },
    /// Folding the record into the committed topology failed.
    #[error("commit failed: {0}")]
    Commit(#[from] TopologyError),
    /// `validate`/`finalize` was invoked on a record not in `Created`.
    #[error("transaction is {0:?}, not pending")]
    NotPending(TxState),
}

impl Rejection {
    /// Returns the taxonomy bucket of this rejection.
    pub fn kind(&self) -> RejectionKind {
        match self {
            Self::Authentication { .. } => RejectionKind::Authentication,
            Self::UnregisteredParticipant(_) => RejectionKind::Unregistered,
            Self::EmptySourceList
            | Self::MissingOriginEdge { .. }
            | Self::ProvenanceMismatch { .. } => RejectionKind::Provenance,
            Self::ForwardingLoop { .. } | Self::Commit(_) => RejectionKind::Structural,
            Self::NoAdvertisedPath { .. } => RejectionKind::Unreachable,
            Self::NotPending(_) => RejectionKind::NotPending,
        }
    }
}

/// Fields common to every transaction variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHeader {
    /// Announced or withdrawn prefix.
    pub prefix: String,
    /// Claiming AS.
    pub as_source: String,
    /// Logical time.
    pub time: u64,
    /// Optional timestamp supplied by the route collector.
    pub bgp_timestamp: Option<u64>,
}

impl TxHeader {
    /// SHA-256 over `as_source || prefix || time`, hex encoded.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.as_source.as_bytes());
        hasher.update(self.prefix.as_bytes());
        hasher.update(self.time.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Entries a validator produces on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Effects {
    /// The single input entry.
    pub input: InputEntry,
    /// Output entries, in emission order.
    pub output: Vec<OutputEntry>,
}

/// Variant-specific validation capability.
///
/// Implementations read snapshots from `state` and must not mutate it.
pub trait ClaimValidator {
    /// Type tag of the transactions this validator handles.
    fn transaction_type(&self) -> TransactionType;

    /// Runs the variant's gates after the signature has been verified.
    fn check(&self, header: &TxHeader, state: &LedgerState) -> Result<Effects, Rejection>;
}

/// Variant payload of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Announcement payload.
    Announce(Announce),
    /// Withdrawal payload.
    Withdraw(Withdraw),
}

impl ClaimValidator for Claim {
    fn transaction_type(&self) -> TransactionType {
        match self {
            Self::Announce(claim) => claim.transaction_type(),
            Self::Withdraw(claim) => claim.transaction_type(),
        }
    }

    fn check(&self, header: &TxHeader, state: &LedgerState) -> Result<Effects, Rejection> {
        match self {
            Self::Announce(claim) => claim.check(header, state),
            Self::Withdraw(claim) => claim.check(header, state),
        }
    }
}

/// A route transaction awaiting or past validation.
#[derive(Debug, Clone)]
pub struct Transaction {
    header: TxHeader,
    claim: Claim,
    signature: Option<Signature>,
    input: Vec<InputEntry>,
    output: Vec<OutputEntry>,
    state: TxState,
}

impl Transaction {
    /// Builds an announcement claimed by `as_source`.
    pub fn announce(
        prefix: impl Into<String>,
        bgp_timestamp: Option<u64>,
        as_source: impl Into<String>,
        sources: Vec<String>,
        destinations: Vec<String>,
        time: u64,
    ) -> Self {
        Self::new(
            TxHeader {
                prefix: prefix.into(),
                as_source: as_source.into(),
                time,
                bgp_timestamp,
            },
            Claim::Announce(Announce::new(sources, destinations)),
        )
    }

    /// Builds a withdrawal claimed by `as_source`.
    pub fn withdraw(
        prefix: impl Into<String>,
        as_source: impl Into<String>,
        time: u64,
        bgp_timestamp: Option<u64>,
    ) -> Self {
        Self::new(
            TxHeader {
                prefix: prefix.into(),
                as_source: as_source.into(),
                time,
                bgp_timestamp,
            },
            Claim::Withdraw(Withdraw),
        )
    }

    /// Builds a transaction from a header and claim payload.
    pub fn new(header: TxHeader, claim: Claim) -> Self {
        Self {
            header,
            claim,
            signature: None,
            input: Vec::new(),
            output: Vec::new(),
            state: TxState::Created,
        }
    }

    /// Common fields.
    pub fn header(&self) -> &TxHeader {
        &self.header
    }

    /// Variant payload.
    pub fn claim(&self) -> &Claim {
        &self.claim
    }

    /// Type tag.
    pub fn transaction_type(&self) -> TransactionType {
        self.claim.transaction_type()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Input entries (empty unless accepted).
    pub fn input(&self) -> &[InputEntry] {
        &self.input
    }

    /// Output entries (empty unless accepted).
    pub fn output(&self) -> &[OutputEntry] {
        &self.output
    }

    /// Stored signature, if any.
    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// Deterministic transaction digest, also the ledger txid.
    pub fn hash(&self) -> String {
        self.header.hash()
    }

    /// Stores an externally produced signature without checking it.
    pub fn sign(&mut self, signature: Signature) {
        self.signature = Some(signature);
    }

    /// Signs the transaction digest with `key` and stores the signature.
    pub fn sign_with(&mut self, key: &SigningKey) {
        let signature = sign_digest(key, &self.hash());
        self.sign(signature);
    }

    /// Verifies the stored signature against the claimant's registered key.
    ///
    /// Fails closed: a missing signature or unregistered claimant yields
    /// `false`.
    pub fn verify_signature(&self, registry: &ParticipantRegistry) -> bool {
        let Some(signature) = self.signature.as_ref() else {
            return false;
        };
        match registry.public_key(&self.header.as_source) {
            Some(key) => verify_digest(&key, &self.hash(), signature),
            None => false,
        }
    }

    /// Runs the signature gate and the variant's validation.
    ///
    /// On success the input/output entries are populated and the record
    /// becomes `Accepted`; on failure it becomes `Rejected` with no entries.
    pub fn validate(&mut self, state: &LedgerState) -> Result<(), Rejection> {
        if self.state != TxState::Created {
            return Err(Rejection::NotPending(self.state));
        }
        self.state = TxState::Validating;
        match self.run_gates(state) {
            Ok(effects) => {
                self.input.push(effects.input);
                self.output.extend(effects.output);
                self.state = TxState::Accepted;
                info!(
                    txid = %self.hash(),
                    kind = %self.transaction_type(),
                    prefix = %self.header.prefix,
                    as_source = %self.header.as_source,
                    outputs = self.output.len(),
                    "transaction accepted"
                );
                Ok(())
            }
            Err(rejection) => {
                self.state = TxState::Rejected;
                warn!(
                    txid = %self.hash(),
                    kind = %self.transaction_type(),
                    prefix = %self.header.prefix,
                    as_source = %self.header.as_source,
                    reason = %rejection,
                    "transaction rejected"
                );
                Err(rejection)
            }
        }
    }

    /// Boolean form of [`Transaction::validate`].
    pub fn is_valid(&mut self, state: &LedgerState) -> bool {
        self.validate(state).is_ok()
    }

    fn run_gates(&self, state: &LedgerState) -> Result<Effects, Rejection> {
        if !self.verify_signature(state.registry()) {
            return Err(Rejection::Authentication {
                as_source: self.header.as_source.clone(),
            });
        }
        debug!(as_source = %self.header.as_source, "signature verified");
        self.claim.check(&self.header, state)
    }

    /// Validates and, on success, assembles the ledger record.
    ///
    /// The record is consumed either way; a rejected record is dropped.
    pub fn finalize(mut self, state: &LedgerState) -> Result<LedgerRecord, Rejection> {
        self.validate(state)?;
        self.into_record()
    }

    /// Converts an accepted transaction into its ledger record.
    pub fn into_record(self) -> Result<LedgerRecord, Rejection> {
        if self.state != TxState::Accepted {
            return Err(Rejection::NotPending(self.state));
        }
        let txid = self.hash();
        let signature = self
            .signature
            .as_ref()
            .map(encode_signature_base64)
            .unwrap_or_default();
        Ok(LedgerRecord {
            kind: self.claim.transaction_type(),
            input: self.input,
            output: self.output,
            timestamp: self.header.time,
            txid,
            signature,
        })
    }
}
