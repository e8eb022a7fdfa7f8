//! Transaction submitter: estimate, gate on fee, sequence, sign, broadcast

use super::gas::FeeGate;
use super::intent::TransactionIntent;
use super::nonce::NonceSequencer;
use crate::backend::SyncOutcome;
use crate::chain::ChainClient;
use crate::error::RelayerResult;
use crate::wallet::WalletHandle;

use chrono::{DateTime, Utc};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, H256, U256};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// A transaction the network accepted. Only the sync status changes afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRecord {
    pub wallet: Address,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub hash: H256,
    pub submitted_at: DateTime<Utc>,
    pub sync: Option<SyncOutcome>,
}

/// Builds, signs and broadcasts one transaction per call.
///
/// No retry happens here; every failure is returned as retryable and the caller
/// re-invokes `submit` for the same logical slot.
pub struct TransactionSubmitter {
    client: Arc<dyn ChainClient>,
    fee_gate: FeeGate,
    nonces: NonceSequencer,
}

impl TransactionSubmitter {
    pub fn new(client: Arc<dyn ChainClient>, fee_gate: FeeGate) -> Self {
        Self {
            client,
            fee_gate,
            nonces: NonceSequencer::new(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.client.chain_id()
    }

    #[cfg(test)]
    pub fn nonces(&self) -> &NonceSequencer {
        &self.nonces
    }

    /// Submit one transaction for `intent` from `wallet`
    pub async fn submit(
        &self,
        wallet: &WalletHandle,
        intent: &TransactionIntent,
    ) -> RelayerResult<TransactionRecord> {
        let from = wallet.address();
        let chain_id = self.client.chain_id();

        let estimate: TypedTransaction = intent.estimate_request(from).into();
        let gas_limit = self.client.estimate_gas(&estimate).await?;
        debug!("Estimated gas limit {} for {:?}", gas_limit, from);

        let gas_price = self
            .fee_gate
            .await_acceptable_fee(self.client.as_ref(), gas_limit)
            .await?;

        // Queried after the fee wait so the nonce reflects the latest pending pool
        let nonce = self.nonces.next_nonce(self.client.as_ref(), from).await?;

        let tx = build_tx(intent, from, nonce, gas_limit, gas_price, chain_id);
        let raw = wallet.sign(&tx)?;
        debug!("Signed raw transaction 0x{}", hex::encode(&raw));

        let hash = self.client.send_raw_transaction(raw).await?;
        self.nonces.mark_accepted(from, nonce);
        crate::metrics::record_tx_submitted(chain_id);

        info!(
            "Transaction accepted: {:?} (wallet {:?}, nonce {})",
            hash, from, nonce
        );

        Ok(TransactionRecord {
            wallet: from,
            nonce,
            gas_price,
            gas_limit,
            hash,
            submitted_at: Utc::now(),
            sync: None,
        })
    }
}

/// Legacy transaction carrying every field explicitly
fn build_tx(
    intent: &TransactionIntent,
    from: Address,
    nonce: u64,
    gas_limit: U256,
    gas_price: U256,
    chain_id: u64,
) -> TypedTransaction {
    TransactionRequest::new()
        .from(from)
        .to(intent.destination)
        .value(intent.value)
        .data(intent.data.clone())
        .gas(gas_limit)
        .gas_price(gas_price)
        .nonce(nonce)
        .chain_id(chain_id)
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::{Broadcast, ScriptedChain, SentTx};
    use crate::wallet::tests::KEY_A;
    use ethers::utils::parse_ether;
    use std::time::Duration;

    const GAS_LIMIT: u64 = 30_000;
    const GAS_PRICE: u64 = 1_000_000;

    fn setup() -> (Arc<ScriptedChain>, TransactionSubmitter, WalletHandle, TransactionIntent) {
        let chain = Arc::new(ScriptedChain::new(GAS_LIMIT, GAS_PRICE));
        let gate = FeeGate::new(parse_ether(0.0000003).unwrap(), Duration::from_secs(5));
        let submitter = TransactionSubmitter::new(chain.clone(), gate);
        let wallet = WalletHandle::from_private_key(KEY_A, 10).unwrap();
        let intent = TransactionIntent::deposit(Address::repeat_byte(0xc5), U256::from(100_000u64));
        (chain, submitter, wallet, intent)
    }

    #[tokio::test]
    async fn test_accepted_submission_produces_record() {
        let (chain, submitter, wallet, intent) = setup();
        chain.set_pending_count(wallet.address(), 12);

        let record = submitter.submit(&wallet, &intent).await.unwrap();

        assert_eq!(record.wallet, wallet.address());
        assert_eq!(record.nonce, 12);
        assert_eq!(record.gas_limit, U256::from(GAS_LIMIT));
        assert_eq!(record.gas_price, U256::from(GAS_PRICE));
        assert!(record.sync.is_none());
        assert_eq!(submitter.nonces().last_accepted(wallet.address()), Some(12));

        // the broadcast bytes carry the sequenced nonce and gated price
        assert_eq!(
            chain.sent(),
            vec![SentTx {
                from: wallet.address(),
                nonce: 12,
                gas_price: U256::from(GAS_PRICE),
                accepted: true,
            }]
        );
    }

    #[tokio::test]
    async fn test_rejected_broadcast_creates_no_record() {
        let (chain, submitter, wallet, intent) = setup();
        chain.script_broadcasts(&[Broadcast::Reject]);

        let err = submitter.submit(&wallet, &intent).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(submitter.nonces().last_accepted(wallet.address()), None);
        assert_eq!(chain.sent().len(), 1);
        assert!(!chain.sent()[0].accepted);
    }

    #[tokio::test]
    async fn test_estimation_failure_stops_before_broadcast() {
        let (chain, submitter, wallet, intent) = setup();
        chain.fail_next_estimates(1);

        let err = submitter.submit(&wallet, &intent).await.unwrap_err();

        assert!(err.is_retryable());
        assert!(chain.sent().is_empty());
        assert_eq!(chain.gas_price_calls(), 0);
    }

    #[tokio::test]
    async fn test_retried_attempts_use_fresh_strictly_increasing_nonces() {
        let (chain, submitter, wallet, intent) = setup();
        chain.script_broadcasts(&[
            Broadcast::Accept,
            Broadcast::Reject,
            Broadcast::Accept,
            Broadcast::FailAfterApplying,
            Broadcast::Reject,
            Broadcast::Accept,
        ]);

        let mut accepted = Vec::new();
        for _ in 0..6 {
            if let Ok(record) = submitter.submit(&wallet, &intent).await {
                accepted.push(record);
            }
        }

        let nonces: Vec<u64> = accepted.iter().map(|r| r.nonce).collect();
        assert_eq!(nonces, vec![0, 1, 3]);
        assert!(nonces.windows(2).all(|w| w[0] < w[1]));

        // each accepted nonce equals the pending count observed right before it
        let observed = chain.observed_counts();
        let sent = chain.sent();
        for (i, tx) in sent.iter().enumerate() {
            assert_eq!(tx.nonce, observed[i].1);
        }
        let accepted_sent: Vec<u64> = sent.iter().filter(|t| t.accepted).map(|t| t.nonce).collect();
        assert_eq!(accepted_sent, nonces);
    }
}
