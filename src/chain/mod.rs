//! Chain module - the chain capabilities the deposit pipeline consumes
//!
//! This module provides:
//! - The `ChainClient` seam (gas price, pending nonce, estimation, broadcast)
//! - A multi-RPC `ethers` provider with automatic failover implementing it

pub mod provider;

pub use provider::ChainProvider;

use crate::error::RelayerResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256, U256};

/// Chain operations used by fee gating, nonce sequencing and submission
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain ID transactions are signed for
    fn chain_id(&self) -> u64;

    /// Current legacy gas price in wei
    async fn get_gas_price(&self) -> RelayerResult<U256>;

    /// Transaction count of `address` including pending transactions
    async fn get_pending_transaction_count(&self, address: Address) -> RelayerResult<U256>;

    /// Gas limit estimate for an unsigned transaction
    async fn estimate_gas(&self, tx: &TypedTransaction) -> RelayerResult<U256>;

    /// Broadcast a signed transaction and return its hash once accepted
    async fn send_raw_transaction(&self, raw: Bytes) -> RelayerResult<H256>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory chain for pipeline tests

    use super::*;
    use crate::error::RelayerError;

    use ethers::types::Transaction;
    use ethers::utils::keccak256;
    use ethers::utils::rlp::{Decodable, Rlp};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// What the next broadcast does
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Broadcast {
        Accept,
        /// Rejected before reaching the mempool
        Reject,
        /// Applied by the network but reported as failed
        FailAfterApplying,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentTx {
        pub from: Address,
        pub nonce: u64,
        pub gas_price: U256,
        pub accepted: bool,
    }

    #[derive(Default)]
    struct Inner {
        gas_prices: VecDeque<RelayerResult<U256>>,
        last_gas_price: U256,
        gas_price_calls: usize,
        estimate_failures: u32,
        broadcasts: VecDeque<Broadcast>,
        pending_counts: HashMap<Address, u64>,
        observed_counts: Vec<(Address, u64)>,
        sent: Vec<SentTx>,
    }

    pub struct ScriptedChain {
        chain_id: u64,
        gas_limit: U256,
        inner: Mutex<Inner>,
    }

    impl ScriptedChain {
        pub fn new(gas_limit: u64, gas_price: u64) -> Self {
            Self {
                chain_id: 10,
                gas_limit: U256::from(gas_limit),
                inner: Mutex::new(Inner {
                    last_gas_price: U256::from(gas_price),
                    ..Default::default()
                }),
            }
        }

        /// Gas prices returned by successive polls before falling back to the last one
        pub fn with_gas_prices(self, prices: &[u64]) -> Self {
            {
                let mut inner = self.inner.lock().unwrap();
                inner.gas_prices = prices.iter().map(|p| Ok(U256::from(*p))).collect();
            }
            self
        }

        pub fn push_gas_price_error(&self) {
            self.inner
                .lock()
                .unwrap()
                .gas_prices
                .push_back(Err(RelayerError::GasEstimation("rpc unavailable".into())));
        }

        pub fn fail_next_estimates(&self, count: u32) {
            self.inner.lock().unwrap().estimate_failures = count;
        }

        pub fn script_broadcasts(&self, script: &[Broadcast]) {
            self.inner.lock().unwrap().broadcasts = script.iter().copied().collect();
        }

        pub fn set_pending_count(&self, address: Address, count: u64) {
            self.inner.lock().unwrap().pending_counts.insert(address, count);
        }

        pub fn gas_price_calls(&self) -> usize {
            self.inner.lock().unwrap().gas_price_calls
        }

        pub fn sent(&self) -> Vec<SentTx> {
            self.inner.lock().unwrap().sent.clone()
        }

        pub fn observed_counts(&self) -> Vec<(Address, u64)> {
            self.inner.lock().unwrap().observed_counts.clone()
        }
    }

    #[async_trait]
    impl ChainClient for ScriptedChain {
        fn chain_id(&self) -> u64 {
            self.chain_id
        }

        async fn get_gas_price(&self) -> RelayerResult<U256> {
            let mut inner = self.inner.lock().unwrap();
            inner.gas_price_calls += 1;
            match inner.gas_prices.pop_front() {
                Some(Ok(price)) => {
                    inner.last_gas_price = price;
                    Ok(price)
                }
                Some(Err(e)) => Err(e),
                None => Ok(inner.last_gas_price),
            }
        }

        async fn get_pending_transaction_count(&self, address: Address) -> RelayerResult<U256> {
            let mut inner = self.inner.lock().unwrap();
            let count = *inner.pending_counts.entry(address).or_insert(0);
            inner.observed_counts.push((address, count));
            Ok(U256::from(count))
        }

        async fn estimate_gas(&self, _tx: &TypedTransaction) -> RelayerResult<U256> {
            let mut inner = self.inner.lock().unwrap();
            if inner.estimate_failures > 0 {
                inner.estimate_failures -= 1;
                return Err(RelayerError::GasEstimation("execution reverted".into()));
            }
            Ok(self.gas_limit)
        }

        async fn send_raw_transaction(&self, raw: Bytes) -> RelayerResult<H256> {
            let mut inner = self.inner.lock().unwrap();
            let behavior = inner.broadcasts.pop_front().unwrap_or(Broadcast::Accept);

            // read back what was actually signed
            let signed = Transaction::decode(&Rlp::new(raw.as_ref()))
                .map_err(|e| RelayerError::Transaction(format!("undecodable raw tx: {}", e)))?;
            let from = signed
                .recover_from()
                .map_err(|e| RelayerError::Transaction(format!("bad signature: {}", e)))?;
            let nonce = signed.nonce.as_u64();
            let gas_price = signed.gas_price.unwrap_or_default();

            let applied = behavior != Broadcast::Reject;
            if applied {
                inner.pending_counts.insert(from, nonce + 1);
            }
            inner.sent.push(SentTx {
                from,
                nonce,
                gas_price,
                accepted: behavior == Broadcast::Accept,
            });

            match behavior {
                Broadcast::Accept => Ok(H256::from(keccak256(raw.as_ref()))),
                Broadcast::Reject => Err(RelayerError::Transaction("insufficient funds".into())),
                Broadcast::FailAfterApplying => {
                    Err(RelayerError::Transaction("connection reset".into()))
                }
            }
        }
    }
}
