//! Backend reconciliation of accepted transaction hashes
//!
//! Sync is a best-effort notification: the on-chain transaction is the
//! authoritative effect, so a failed sync is reported, never raised.
//!
//! Per hash the client walks a small state machine:
//!
//! ```text
//! Attempting(1) -> Attempting(2) -> ... -> Attempting(max)
//!                                               |
//!                                        RefreshAndRetry -- refresh ok --> Attempting(max) (once)
//!                                               |
//!                                         refresh failed --> Abandoned
//! ```
//!
//! Any successful attempt goes to `Synced`. A post-refresh failure is `Abandoned`;
//! running out of attempts without a refresh credential is `Exhausted`.

use super::client::BackendApi;
use crate::auth::{AuthSession, SessionStore, TokenRefresher};

use ethers::types::H256;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Final result of reconciling one transaction hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Synced,
    /// Attempts ran out and the session had no refresh credential
    Exhausted,
    /// The refresh failed, or the attempt after it did
    Abandoned,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Synced => "synced",
            SyncOutcome::Exhausted => "exhausted",
            SyncOutcome::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Attempting(u32),
    RefreshAndRetry,
    Synced,
    Exhausted,
    Abandoned,
}

/// Three-strikes-then-refresh transition rules, independent of any I/O
#[derive(Debug, Clone)]
pub struct SyncMachine {
    max_attempts: u32,
    state: SyncState,
    /// Last attempt number before escalation
    attempt: u32,
    escalated: bool,
}

impl SyncMachine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            state: SyncState::Attempting(1),
            attempt: 1,
            escalated: false,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Apply the result of the current attempt
    pub fn attempt_finished(&mut self, succeeded: bool, can_refresh: bool) -> SyncState {
        let SyncState::Attempting(n) = self.state else {
            return self.state;
        };
        self.attempt = n;

        self.state = if succeeded {
            SyncState::Synced
        } else if n < self.max_attempts {
            SyncState::Attempting(n + 1)
        } else if self.escalated {
            SyncState::Abandoned
        } else if can_refresh {
            SyncState::RefreshAndRetry
        } else {
            SyncState::Exhausted
        };
        self.state
    }

    /// Apply the result of the session refresh; a success repeats the same attempt
    pub fn refresh_finished(&mut self, succeeded: bool) -> SyncState {
        if self.state != SyncState::RefreshAndRetry {
            return self.state;
        }
        self.escalated = true;
        self.state = if succeeded {
            SyncState::Attempting(self.attempt)
        } else {
            SyncState::Abandoned
        };
        self.state
    }

    pub fn outcome(&self) -> Option<SyncOutcome> {
        match self.state {
            SyncState::Synced => Some(SyncOutcome::Synced),
            SyncState::Exhausted => Some(SyncOutcome::Exhausted),
            SyncState::Abandoned => Some(SyncOutcome::Abandoned),
            SyncState::Attempting(_) | SyncState::RefreshAndRetry => None,
        }
    }
}

/// Reports transaction hashes to the backend with bounded retries
pub struct BackendSyncClient {
    api: Arc<dyn BackendApi>,
    refresher: Arc<dyn TokenRefresher>,
    store: Arc<dyn SessionStore>,
    max_attempts: u32,
    retry_delay: Duration,
    /// Hashes already synced (cached to avoid re-reporting)
    synced: RwLock<HashSet<H256>>,
}

impl BackendSyncClient {
    pub fn new(
        api: Arc<dyn BackendApi>,
        refresher: Arc<dyn TokenRefresher>,
        store: Arc<dyn SessionStore>,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            api,
            refresher,
            store,
            max_attempts,
            retry_delay,
            synced: RwLock::new(HashSet::new()),
        }
    }

    /// Reconcile `tx_hash` with the backend, refreshing `session` at most once
    pub async fn sync(&self, session: &mut AuthSession, chain_id: u64, tx_hash: H256) -> SyncOutcome {
        if self.synced.read().await.contains(&tx_hash) {
            info!("Transaction {:?} already synced", tx_hash);
            return SyncOutcome::Synced;
        }

        let mut machine = SyncMachine::new(self.max_attempts);

        loop {
            if let Some(outcome) = machine.outcome() {
                self.finish(tx_hash, outcome).await;
                return outcome;
            }

            match machine.state() {
                SyncState::Attempting(n) => {
                    let succeeded = match self.api.sync_ethereum_tx(session, chain_id, tx_hash).await {
                        Ok(true) => true,
                        Ok(false) => {
                            warn!(
                                "Attempt {} - sync response for {:?} is null or unsuccessful",
                                n, tx_hash
                            );
                            false
                        }
                        Err(e) if e.is_session_expired() => {
                            warn!(
                                "Attempt {} - backend rejected session {} while syncing {:?}",
                                n,
                                session.key(),
                                tx_hash
                            );
                            false
                        }
                        Err(e) => {
                            warn!("Attempt {} - error syncing transaction {:?}: {}", n, tx_hash, e);
                            false
                        }
                    };

                    let next = machine.attempt_finished(succeeded, session.can_refresh());
                    if matches!(next, SyncState::Attempting(m) if m > n) {
                        info!("Retrying sync in {}s...", self.retry_delay.as_secs());
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                SyncState::RefreshAndRetry => {
                    warn!(
                        "Sync of {:?} failed {} times, refreshing session {}",
                        tx_hash,
                        self.max_attempts,
                        session.key()
                    );
                    let refreshed = match session
                        .refresh(self.refresher.as_ref(), self.store.as_ref())
                        .await
                    {
                        Ok(()) => {
                            info!("Session refreshed, retrying sync with new token");
                            true
                        }
                        Err(e) => {
                            error!("Token refresh failed, cannot retry further: {}", e);
                            false
                        }
                    };
                    machine.refresh_finished(refreshed);
                }
                SyncState::Synced | SyncState::Exhausted | SyncState::Abandoned => {}
            }
        }
    }

    async fn finish(&self, tx_hash: H256, outcome: SyncOutcome) {
        crate::metrics::record_sync_outcome(outcome);
        match outcome {
            SyncOutcome::Synced => {
                self.synced.write().await.insert(tx_hash);
                info!("Transaction {:?} successfully synced with backend", tx_hash);
            }
            SyncOutcome::Exhausted => {
                error!(
                    "Sync of {:?} exhausted {} attempts with no refresh credential",
                    tx_hash, self.max_attempts
                );
            }
            SyncOutcome::Abandoned => {
                error!("Sync of {:?} abandoned", tx_hash);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::refresh::MockTokenRefresher;
    use crate::auth::store::MockSessionStore;
    use crate::auth::refresh::TokenGrant;
    use crate::backend::client::MockBackendApi;
    use crate::error::RelayerError;

    const CHAIN_ID: u64 = 10;

    fn hash() -> H256 {
        H256::repeat_byte(0x42)
    }

    fn session() -> AuthSession {
        AuthSession::new("acct", "Bearer old-access", "old-refresh")
    }

    fn refresher(succeeds: bool, times: usize) -> MockTokenRefresher {
        let mut refresher = MockTokenRefresher::new();
        refresher.expect_refresh().times(times).returning(move |_| {
            if succeeds {
                Ok(TokenGrant {
                    access_token: "new-access".into(),
                    refresh_token: "new-refresh".into(),
                })
            } else {
                Err(RelayerError::TokenRefresh("INVALID_REFRESH_TOKEN".into()))
            }
        });
        refresher
    }

    fn store() -> MockSessionStore {
        let mut store = MockSessionStore::new();
        store.expect_persist().returning(|_| Ok(()));
        store
    }

    fn client(api: MockBackendApi, refresher: MockTokenRefresher) -> BackendSyncClient {
        BackendSyncClient::new(
            Arc::new(api),
            Arc::new(refresher),
            Arc::new(store()),
            3,
            Duration::from_secs(5),
        )
    }

    fn failing_with_old_token(api: &mut MockBackendApi, times: usize) {
        api.expect_sync_ethereum_tx()
            .withf(|s, _, _| s.access_token() == "old-access")
            .times(times)
            .returning(|_, _, _| Err(RelayerError::backend("SyncEthereumTx", "502")));
    }

    #[test]
    fn test_machine_three_strikes_then_refresh() {
        let mut m = SyncMachine::new(3);
        assert_eq!(m.attempt_finished(false, true), SyncState::Attempting(2));
        assert_eq!(m.attempt_finished(false, true), SyncState::Attempting(3));
        assert_eq!(m.attempt_finished(false, true), SyncState::RefreshAndRetry);
        assert_eq!(m.refresh_finished(true), SyncState::Attempting(3));
        assert_eq!(m.attempt_finished(false, true), SyncState::Abandoned);
        assert_eq!(m.outcome(), Some(SyncOutcome::Abandoned));
    }

    #[test]
    fn test_machine_failed_refresh_abandons() {
        let mut m = SyncMachine::new(3);
        m.attempt_finished(false, true);
        m.attempt_finished(false, true);
        m.attempt_finished(false, true);
        assert_eq!(m.refresh_finished(false), SyncState::Abandoned);
    }

    #[test]
    fn test_machine_without_refresh_credential_is_exhausted() {
        let mut m = SyncMachine::new(3);
        m.attempt_finished(false, false);
        m.attempt_finished(false, false);
        assert_eq!(m.attempt_finished(false, false), SyncState::Exhausted);
        assert_eq!(m.outcome(), Some(SyncOutcome::Exhausted));
    }

    #[test]
    fn test_machine_success_is_terminal() {
        let mut m = SyncMachine::new(3);
        assert_eq!(m.attempt_finished(true, true), SyncState::Synced);
        assert_eq!(m.attempt_finished(false, true), SyncState::Synced);
        assert_eq!(m.refresh_finished(true), SyncState::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let mut api = MockBackendApi::new();
        api.expect_sync_ethereum_tx()
            .withf(|_, chain_id, tx| *chain_id == CHAIN_ID && *tx == H256::repeat_byte(0x42))
            .times(1)
            .returning(|_, _, _| Ok(true));

        let client = client(api, refresher(true, 0));
        let mut session = session();
        assert_eq!(client.sync(&mut session, CHAIN_ID, hash()).await, SyncOutcome::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synced_after_refresh_escalation() {
        let mut api = MockBackendApi::new();
        failing_with_old_token(&mut api, 3);
        api.expect_sync_ethereum_tx()
            .withf(|s, _, _| s.access_token() == "new-access")
            .times(1)
            .returning(|_, _, _| Ok(true));

        let client = client(api, refresher(true, 1));
        let mut session = session();

        let started = tokio::time::Instant::now();
        let outcome = client.sync(&mut session, CHAIN_ID, hash()).await;

        assert_eq!(outcome, SyncOutcome::Synced);
        assert_eq!(session.refresh_token(), "new-refresh");
        // backoff only between attempts 1-2 and 2-3
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_when_refresh_fails() {
        let mut api = MockBackendApi::new();
        failing_with_old_token(&mut api, 3);

        let client = client(api, refresher(false, 1));
        let mut session = session();

        assert_eq!(client.sync(&mut session, CHAIN_ID, hash()).await, SyncOutcome::Abandoned);
        assert_eq!(session.access_token(), "old-access");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_when_post_refresh_attempt_fails() {
        let mut api = MockBackendApi::new();
        failing_with_old_token(&mut api, 3);
        api.expect_sync_ethereum_tx()
            .withf(|s, _, _| s.access_token() == "new-access")
            .times(1)
            .returning(|_, _, _| Ok(false));

        let client = client(api, refresher(true, 1));
        let mut session = session();

        assert_eq!(client.sync(&mut session, CHAIN_ID, hash()).await, SyncOutcome::Abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_without_refresh_token() {
        let mut api = MockBackendApi::new();
        api.expect_sync_ethereum_tx()
            .times(3)
            .returning(|_, _, _| Ok(false));

        let client = client(api, refresher(true, 0));
        let mut session = AuthSession::new("acct", "access-only", "");

        assert_eq!(client.sync(&mut session, CHAIN_ID, hash()).await, SyncOutcome::Exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_of_synced_hash_skips_backend() {
        let mut api = MockBackendApi::new();
        api.expect_sync_ethereum_tx()
            .times(1)
            .returning(|_, _, _| Ok(true));

        let client = client(api, refresher(true, 0));
        let mut session = session();

        assert_eq!(client.sync(&mut session, CHAIN_ID, hash()).await, SyncOutcome::Synced);
        assert_eq!(client.sync(&mut session, CHAIN_ID, hash()).await, SyncOutcome::Synced);
    }
}
