//! Per-account bearer session with a single mutation point

use super::refresh::{TokenGrant, TokenRefresher};
use super::store::SessionStore;
use crate::error::{RelayerError, RelayerResult};

use std::fmt;
use tracing::{info, warn};

const BEARER_PREFIX: &str = "Bearer ";

/// Access/refresh credentials for one backend account.
///
/// Both tokens only ever change together through [`AuthSession::refresh`], so a
/// session never pairs an access token with a refresh token from another grant.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSession {
    key: String,
    access_token: String,
    refresh_token: String,
}

impl AuthSession {
    /// Create a session; a stored `Bearer ` prefix on the access token is dropped
    pub fn new(
        key: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        let access_token = access_token.into();
        let access_token = access_token
            .strip_prefix(BEARER_PREFIX)
            .map(str::to_string)
            .unwrap_or(access_token);

        Self {
            key: key.into(),
            access_token,
            refresh_token: refresh_token.into(),
        }
    }

    /// Key of the account in the credential store
    pub fn key(&self) -> &str {
        &self.key
    }

    #[cfg(test)]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// `Authorization` header value
    pub fn authorization(&self) -> String {
        format!("{}{}", BEARER_PREFIX, self.access_token)
    }

    /// Whether a refresh credential is available at all
    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.trim().is_empty()
    }

    fn apply(&mut self, grant: TokenGrant) {
        *self = AuthSession {
            key: std::mem::take(&mut self.key),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
        };
    }

    /// Renew both tokens and persist the new grant.
    ///
    /// On failure the session is left untouched. A persistence failure after a
    /// successful grant is logged; the in-memory session already holds the new tokens.
    pub async fn refresh(
        &mut self,
        refresher: &dyn TokenRefresher,
        store: &dyn SessionStore,
    ) -> RelayerResult<()> {
        if !self.can_refresh() {
            crate::metrics::record_token_refresh(false);
            return Err(RelayerError::TokenRefresh(format!(
                "account {} has no refresh credential",
                self.key
            )));
        }

        info!("Refreshing session for account {}", self.key);

        let grant = match refresher.refresh(&self.refresh_token).await {
            Ok(grant) => grant,
            Err(e) => {
                crate::metrics::record_token_refresh(false);
                return Err(e);
            }
        };

        self.apply(grant);
        crate::metrics::record_token_refresh(true);

        if let Err(e) = store.persist(self) {
            warn!("Refreshed session for {} could not be persisted: {}", self.key, e);
        }

        info!("Session for account {} refreshed", self.key);
        Ok(())
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("key", &self.key)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}
