//! Token renewal against the secure-token endpoint

use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// A fresh access/refresh pair issued by the token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
}

/// Exchanges a refresh credential for a new grant.
///
/// An error means the session is no longer renewable.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> RelayerResult<TokenGrant>;
}

/// `grant_type=refresh_token` client for the secure-token endpoint
pub struct SecureTokenRefresher {
    client: reqwest::Client,
    endpoint: String,
}

impl SecureTokenRefresher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> RelayerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl TokenRefresher for SecureTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> RelayerResult<TokenGrant> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .body("")
            .send()
            .await
            .map_err(|e| RelayerError::TokenRefresh(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayerError::TokenRefresh(format!("{}: {}", status, body)));
        }

        let grant: TokenGrant = response
            .json()
            .await
            .map_err(|e| RelayerError::TokenRefresh(format!("Malformed grant: {}", e)))?;

        if grant.access_token.is_empty() || grant.refresh_token.is_empty() {
            return Err(RelayerError::TokenRefresh("Grant is missing tokens".to_string()));
        }

        debug!("Token endpoint issued a new grant");
        Ok(grant)
    }
}
