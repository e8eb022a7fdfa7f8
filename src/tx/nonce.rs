//! Nonce sequencing for sequential per-wallet submission
//!
//! The pending transaction count is re-queried before every attempt. A failed
//! broadcast may or may not have reached the network, so a cached nonce could
//! collide with a transaction that did land.

use crate::chain::ChainClient;
use crate::error::{RelayerError, RelayerResult};

use dashmap::DashMap;
use ethers::types::Address;
use tracing::{debug, warn};

/// Assigns nonces from the chain's pending count
#[derive(Default)]
pub struct NonceSequencer {
    /// Highest nonce per wallet whose broadcast was accepted
    last_accepted: DashMap<Address, u64>,
}

impl NonceSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nonce for the next attempt of `address`.
    ///
    /// Normally the pending count itself. If a lagging node reports a count
    /// that does not cover an already accepted transaction, the nonce after
    /// that transaction is used so nonces stay strictly increasing.
    pub async fn next_nonce(&self, client: &dyn ChainClient, address: Address) -> RelayerResult<u64> {
        let pending = client.get_pending_transaction_count(address).await?;
        let pending = u64::try_from(pending).map_err(|_| RelayerError::Nonce {
            address: format!("{:?}", address),
            message: format!("Pending count {} out of range", pending),
        })?;

        let nonce = match self.last_accepted(address) {
            Some(last) if pending <= last => {
                warn!(
                    "Pending count {} for {:?} lags accepted nonce {}, using {}",
                    pending,
                    address,
                    last,
                    last + 1
                );
                last + 1
            }
            _ => pending,
        };

        debug!("Allocated nonce {} for {:?}", nonce, address);
        Ok(nonce)
    }

    /// Record that a transaction with `nonce` was accepted by the network
    pub fn mark_accepted(&self, address: Address, nonce: u64) {
        let mut entry = self.last_accepted.entry(address).or_insert(nonce);
        if nonce > *entry {
            *entry = nonce;
        }
    }

    pub fn last_accepted(&self, address: Address) -> Option<u64> {
        self.last_accepted.get(&address).map(|n| *n)
    }
}
