//! Sequential multi-wallet deposit batches

use crate::auth::AuthSession;
use crate::backend::BackendSyncClient;
use crate::tx::{TransactionIntent, TransactionRecord, TransactionSubmitter};
use crate::wallet::WalletHandle;

use ethers::types::{Address, U256};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Result of one transaction slot
#[derive(Debug, Clone, Serialize)]
pub struct SlotReport {
    pub wallet: Address,
    /// 1-based slot index within the wallet
    pub slot: u32,
    /// Submission attempts the slot needed
    pub attempts: u32,
    pub record: TransactionRecord,
}

/// Drives `count` deposits for each wallet, one network call at a time
pub struct WalletBatchOrchestrator {
    submitter: TransactionSubmitter,
    sync_client: BackendSyncClient,
    contract: Address,
    retry_delay: Duration,
}

impl WalletBatchOrchestrator {
    pub fn new(
        submitter: TransactionSubmitter,
        sync_client: BackendSyncClient,
        contract: Address,
        retry_delay: Duration,
    ) -> Self {
        Self {
            submitter,
            sync_client,
            contract,
            retry_delay,
        }
    }

    /// Run every slot of every wallet; reports come back in traversal order
    pub async fn run(
        &self,
        wallets: &[WalletHandle],
        session: &mut AuthSession,
        count_per_wallet: u32,
        amount: U256,
    ) -> Vec<SlotReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("deposit_run", %run_id, wallets = wallets.len());

        async {
            // grows as slots finish; the requested count is unbounded
            let mut reports = Vec::new();

            for wallet in wallets {
                let span = info_span!("wallet", address = ?wallet.address());
                self.run_wallet(wallet, session, count_per_wallet, amount, &mut reports)
                    .instrument(span)
                    .await;
            }

            info!("All wallets processed ({} transactions)", reports.len());
            reports
        }
        .instrument(span)
        .await
    }

    async fn run_wallet(
        &self,
        wallet: &WalletHandle,
        session: &mut AuthSession,
        count: u32,
        amount: U256,
        reports: &mut Vec<SlotReport>,
    ) {
        info!("Processing transactions for wallet: {:?}", wallet.address());

        for slot in 1..=count {
            let (mut record, attempts) = self.submit_slot(wallet, slot, count, amount).await;
            info!(
                "Transaction {}/{} successful with hash: {:?}",
                slot, count, record.hash
            );

            let outcome = self
                .sync_client
                .sync(session, self.submitter.chain_id(), record.hash)
                .await;
            record.sync = Some(outcome);

            reports.push(SlotReport {
                wallet: wallet.address(),
                slot,
                attempts,
                record,
            });
        }

        info!("Transactions for wallet {:?} completed", wallet.address());
    }

    /// Resubmit until accepted; the slot keeps its position across retries
    async fn submit_slot(
        &self,
        wallet: &WalletHandle,
        slot: u32,
        count: u32,
        amount: U256,
    ) -> (TransactionRecord, u32) {
        let mut attempts = 0;

        loop {
            attempts += 1;
            let intent = TransactionIntent::deposit(self.contract, amount);

            match self.submitter.submit(wallet, &intent).await {
                Ok(record) => return (record, attempts),
                Err(e) => {
                    if e.is_retryable() {
                        warn!(
                            "Error in transaction {}/{} (attempt {}): {}",
                            slot, count, attempts, e
                        );
                    } else {
                        error!(
                            "Error in transaction {}/{} (attempt {}): {}",
                            slot, count, attempts, e
                        );
                    }
                    crate::metrics::record_submission_failure(self.submitter.chain_id());
                    info!(
                        "Retrying transaction {} in {}s...",
                        slot,
                        self.retry_delay.as_secs()
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}
