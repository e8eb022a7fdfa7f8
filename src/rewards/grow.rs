//! Grow actions across every stored account, repeated in rounds

use crate::auth::{AuthSession, SessionStore, TokenRefresher};
use crate::backend::BackendApi;
use crate::error::RelayerResult;

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrowSummary {
    pub available: u64,
    pub executed: u64,
    pub failed: u64,
}

pub struct GrowRunner {
    api: Arc<dyn BackendApi>,
    refresher: Arc<dyn TokenRefresher>,
    store: Arc<dyn SessionStore>,
    with_all: bool,
    round_interval: Duration,
}

impl GrowRunner {
    pub fn new(
        api: Arc<dyn BackendApi>,
        refresher: Arc<dyn TokenRefresher>,
        store: Arc<dyn SessionStore>,
        with_all: bool,
        round_interval: Duration,
    ) -> Self {
        Self {
            api,
            refresher,
            store,
            with_all,
            round_interval,
        }
    }

    /// Process every account, then wait for the next round. Runs until the process stops.
    pub async fn run_forever(&self, sessions: &mut [AuthSession]) {
        loop {
            info!("Starting new round of grow actions for {} account(s)", sessions.len());
            self.run_round(sessions).await;

            info!(
                "All accounts processed. Waiting {}s before next round...",
                self.round_interval.as_secs()
            );
            tokio::time::sleep(self.round_interval).await;
        }
    }

    pub async fn run_round(&self, sessions: &mut [AuthSession]) -> Vec<GrowSummary> {
        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions.iter_mut() {
            summaries.push(self.process_account(session).await);
        }
        summaries
    }

    /// Spend the available grow actions of one account; failures are logged only
    pub async fn process_account(&self, session: &mut AuthSession) -> GrowSummary {
        let user = match self.api.current_user_name(session).await {
            Ok(name) => name,
            Err(e) => {
                warn!("{} - error fetching current user: {}", session.key(), e);
                session.key().to_string()
            }
        };

        let available = self.grow_action_count(session, &user).await;
        let mut summary = GrowSummary {
            available,
            ..Default::default()
        };

        if available == 0 {
            info!("{} - no grow actions available, skipping account", user);
            return summary;
        }

        let calls = if self.with_all { 1 } else { available };
        for i in 1..=calls {
            info!("{} - executing grow action {}/{}", user, i, calls);
            match self.api.execute_grow_action(session, self.with_all).await {
                Ok(Some(result)) => {
                    info!(
                        "{} - grow action {} executed: base {} leveraged {} total {} rate {}",
                        user,
                        i,
                        result.base_value,
                        result.leveraged_value,
                        result.total_value,
                        result.multiply_rate
                    );
                    summary.executed += 1;
                    crate::metrics::record_reward_action("grow", true);
                }
                Ok(None) => {
                    error!("{} - failed to execute grow action {}", user, i);
                    summary.failed += 1;
                    crate::metrics::record_reward_action("grow", false);
                }
                Err(e) => {
                    error!("{} - error executing grow action {}: {}", user, i, e);
                    summary.failed += 1;
                    crate::metrics::record_reward_action("grow", false);
                }
            }
        }

        summary
    }

    /// Available grow actions; one refresh-and-retry on failure, zero if that fails too
    async fn grow_action_count(&self, session: &mut AuthSession, user: &str) -> u64 {
        info!("{} - checking grow availability...", user);

        match self.fetch_count(session).await {
            Ok(count) => return count,
            Err(e) => warn!("{} - token expired? {}", user, e),
        }

        if let Err(e) = session
            .refresh(self.refresher.as_ref(), self.store.as_ref())
            .await
        {
            error!("{} - failed to refresh token: {}", user, e);
            return 0;
        }

        match self.fetch_count(session).await {
            Ok(count) => count,
            Err(e) => {
                error!("{} - grow availability unavailable after refresh: {}", user, e);
                0
            }
        }
    }

    async fn fetch_count(&self, session: &AuthSession) -> RelayerResult<u64> {
        let status = self.api.garden_status(session).await?;
        info!("{} grow action(s) available", status.grow_action_count);
        Ok(status.grow_action_count)
    }
}
