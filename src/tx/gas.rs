//! Fee gating: hold a transaction until the network fee drops under a ceiling

use crate::chain::ChainClient;
use crate::error::RelayerResult;

use ethers::types::U256;
use ethers::utils::format_ether;
use std::time::Duration;
use tracing::{debug, info};

/// Polls the gas price until `gas_price * gas_limit` fits under the threshold.
///
/// There is no upper bound on the wait. A failed gas price query is returned
/// to the caller rather than retried here.
#[derive(Debug, Clone)]
pub struct FeeGate {
    /// Ceiling per transaction, in wei
    threshold_wei: U256,
    poll_interval: Duration,
}

impl FeeGate {
    pub fn new(threshold_wei: U256, poll_interval: Duration) -> Self {
        Self {
            threshold_wei,
            poll_interval,
        }
    }

    pub fn threshold_wei(&self) -> U256 {
        self.threshold_wei
    }

    /// Calculate total cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: U256) -> U256 {
        gas_limit.saturating_mul(gas_price)
    }

    /// Block until the fee for `gas_limit` is acceptable and return the gas price used
    pub async fn await_acceptable_fee(
        &self,
        client: &dyn ChainClient,
        gas_limit: U256,
    ) -> RelayerResult<U256> {
        loop {
            let gas_price = client.get_gas_price().await?;
            crate::metrics::record_gas_price(client.chain_id(), gas_price);

            let fee = Self::calculate_cost(gas_limit, gas_price);
            if fee <= self.threshold_wei {
                info!("Acceptable transaction fee detected: {} ETH", format_ether(fee));
                return Ok(gas_price);
            }

            info!(
                "Current transaction fee: {} ETH (limit {} ETH), waiting...",
                format_ether(fee),
                format_ether(self.threshold_wei)
            );
            debug!("gas_price={} gas_limit={}", gas_price, gas_limit);
            crate::metrics::record_fee_wait(client.chain_id());

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
