//! Withdraw validation: the claimant must currently hold a path to the prefix.

use crate::state::LedgerState;
use crate::transaction::{
    ClaimValidator, Effects, InputEntry, OutputEntry, Rejection, TransactionType, TxHeader,
};
use tracing::debug;

/// Withdrawal payload. Carries nothing beyond the common header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Withdraw;

impl ClaimValidator for Withdraw {
    fn transaction_type(&self) -> TransactionType {
        TransactionType::Withdraw
    }

    fn check(&self, header: &TxHeader, state: &LedgerState) -> Result<Effects, Rejection> {
        let topology = state.topologies().snapshot(&header.prefix);
        if !topology.has_simple_path(&header.as_source, &header.prefix) {
            return Err(Rejection::NoAdvertisedPath {
                as_source: header.as_source.clone(),
                prefix: header.prefix.clone(),
            });
        }
        debug!(as_source = %header.as_source, prefix = %header.prefix, "advertised path found");
        Ok(Effects {
            input: InputEntry::Withdraw(
                header.prefix.clone(),
                header.as_source.clone(),
                header.bgp_timestamp,
            ),
            output: vec![OutputEntry::Withdraw(
                header.prefix.clone(),
                header.as_source.clone(),
            )],
        })
    }
}
