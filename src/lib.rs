#![deny(missing_docs)]

//! # route_ledger
//!
//! **route_ledger** admits BGP route announcements and withdrawals into a
//! shared ledger only after checking them against the ledger's own record of
//! who forwards traffic for each prefix.
//!
//! Every claim must be
//!
//! * signed (ed25519 over the SHA-256 txid) by a registered AS,
//! * consistent with the claimant's recorded provenance in the per-prefix
//!   topology, and
//! * structurally sound: no unregistered participants, no forwarding loops.
//!
//! ## Components
//!
//! * [`ParticipantRegistry`]: AS identifier to verification key.
//! * [`TopologyStore`]: prefix to [`Topology`], a directed "learned from"
//!   graph with the prefix as sink.
//! * [`Transaction`]: the shared record, carrying an [`Announce`] or
//!   [`Withdraw`] claim. [`Transaction::finalize`] yields a [`LedgerRecord`]
//!   or a [`Rejection`].
//! * [`LedgerState`]: registry + topologies, with a snapshot path
//!   ([`LedgerState::finalize`]) and a serialized validate-and-commit path
//!   ([`LedgerState::admit`]).
//! * [`audit`]: rebuilds topologies from collector dumps and compares them
//!   with the ledger view.
//!
//! ## Usage
//!
//! ```rust
//! use route_ledger::{sign::signing_key_from_seed, LedgerState, Topology, Transaction};
//!
//! let state = LedgerState::new();
//! for asn in ["700", "800"] {
//!     let key = signing_key_from_seed(asn).verifying_key();
//!     state.registry().register(asn, key).unwrap();
//! }
//! let prefix = "139.91.0.0/16";
//! state
//!     .topologies()
//!     .replace(prefix, Topology::from_edges(prefix, [["700", prefix]]));
//!
//! let mut tx = Transaction::announce(
//!     prefix,
//!     None,
//!     "700",
//!     vec!["0".into()],
//!     vec!["800".into()],
//!     1,
//! );
//! tx.sign_with(&signing_key_from_seed("700"));
//! let record = state.admit(tx).unwrap();
//! assert_eq!(record.output.len(), 1);
//! assert!(state.topologies().snapshot(prefix).has_edge("800", "700"));
//! ```

mod announce;
pub mod audit;
pub mod config;
mod io;
pub mod registry;
pub mod sign;
pub mod state;
pub mod topology;
pub mod transaction;
mod withdraw;

pub use announce::Announce;
pub use audit::{compare as compare_topologies, rebuild_topologies, AuditError, AuditReport};
pub use config::{ConfigError, LedgerConfig};
pub use io::{append_record, read_records};
pub use registry::{ParticipantRegistry, RegistryError, SENTINEL_AS};
pub use state::{global, LedgerState, StateError};
pub use topology::{Topology, TopologyError, TopologyStore};
pub use transaction::{
    Claim, ClaimValidator, Effects, InputEntry, LedgerRecord, OutputEntry, Rejection,
    RejectionKind, Transaction, TransactionType, TxHeader, TxState,
};
pub use withdraw::Withdraw;
