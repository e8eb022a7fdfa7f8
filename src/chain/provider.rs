//! Chain provider with multi-RPC support and automatic failover

use super::ChainClient;
use crate::config::ChainConfig;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Confirmations awaited after broadcast
    confirmations: usize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: ChainConfig, confirmations: usize) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(1000));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            confirmations,
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!(
            "Chain {} failover to provider {}",
            self.config.chain_id, next
        );
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> RelayerResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(RelayerError::ChainConnection {
            chain_id: self.config.chain_id,
            message: "All providers failed".to_string(),
        })
    }

    /// Verify the RPC endpoints serve the configured chain
    pub async fn verify_chain(&self) -> RelayerResult<()> {
        let remote = self.http().get_chainid().await.map_err(|e| {
            RelayerError::ChainConnection {
                chain_id: self.config.chain_id,
                message: e.to_string(),
            }
        })?;

        if remote.as_u64() != self.config.chain_id {
            return Err(RelayerError::Config(format!(
                "RPC serves chain {} but {} is configured",
                remote, self.config.chain_id
            )));
        }

        let block = self.get_block_number().await?;
        info!(
            "Connected to {} (chain {}) at block {}",
            self.config.name, self.config.chain_id, block
        );
        Ok(())
    }
}

#[async_trait]
impl ChainClient for ChainProvider {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn get_gas_price(&self) -> RelayerResult<U256> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_gas_price().await {
                Ok(price) => return Ok(price),
                Err(e) => {
                    warn!(
                        "Failed to get gas price from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(RelayerError::GasEstimation(format!(
            "All providers failed to return a gas price for chain {}",
            self.config.chain_id
        )))
    }

    async fn get_pending_transaction_count(&self, address: Address) -> RelayerResult<U256> {
        let block = Some(BlockId::from(BlockNumber::Pending));
        for _ in 0..self.http_providers.len() {
            match self.http().get_transaction_count(address, block).await {
                Ok(count) => return Ok(count),
                Err(e) => {
                    warn!(
                        "Failed to get pending nonce for {:?} on chain {}: {}",
                        address, self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(RelayerError::Nonce {
            address: format!("{:?}", address),
            message: "All providers failed".to_string(),
        })
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> RelayerResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| RelayerError::GasEstimation(e.to_string()))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> RelayerResult<H256> {
        let pending = match self.http().send_raw_transaction(raw).await {
            Ok(pending) => pending,
            Err(e) => {
                self.failover();
                return Err(RelayerError::Transaction(e.to_string()));
            }
        };

        let tx_hash = pending.tx_hash();
        debug!("Broadcast {:?}, awaiting {} confirmation(s)", tx_hash, self.confirmations);

        let receipt = pending
            .confirmations(self.confirmations)
            .await
            .map_err(|e| RelayerError::Transaction(format!("{:?}: {}", tx_hash, e)))?
            .ok_or_else(|| {
                RelayerError::Transaction(format!("Transaction {:?} dropped from mempool", tx_hash))
            })?;

        if receipt.status == Some(U64::zero()) {
            return Err(RelayerError::Transaction(format!(
                "Transaction {:?} reverted",
                tx_hash
            )));
        }

        Ok(receipt.transaction_hash)
    }
}
