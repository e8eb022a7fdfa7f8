//! Error types for the deposit relayer

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Nonce error for {address}: {message}")]
    Nonce { address: String, message: String },

    /// Broadcast failed; the network may or may not have applied it.
    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Backend error during {operation}: {message}")]
    Backend { operation: String, message: String },

    #[error("Session expired for account {account}")]
    SessionExpired { account: String },

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Credential store error: {0}")]
    CredentialStore(String),
}

impl RelayerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::ChainConnection { .. }
                | RelayerError::GasEstimation(_)
                | RelayerError::Nonce { .. }
                | RelayerError::Transaction(_)
                | RelayerError::Signing(_)
                | RelayerError::Backend { .. }
        )
    }

    /// Check if the backend rejected the session credentials
    pub fn is_session_expired(&self) -> bool {
        matches!(self, RelayerError::SessionExpired { .. })
    }

    pub(crate) fn backend(operation: &str, message: impl ToString) -> Self {
        RelayerError::Backend {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
