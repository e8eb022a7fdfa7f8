//! Signing wallets loaded from the configured key source

use crate::config::WalletConfig;
use crate::error::{RelayerError, RelayerResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes};
use std::path::Path;
use tracing::info;

/// One signing identity. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct WalletHandle {
    signer: LocalWallet,
}

impl WalletHandle {
    pub fn from_private_key(key: &str, chain_id: u64) -> RelayerResult<Self> {
        let signer = key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| RelayerError::Wallet(format!("Invalid private key: {}", e)))?
            .with_chain_id(chain_id);

        Ok(Self { signer })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign and RLP-encode a transaction for broadcast
    pub fn sign(&self, tx: &TypedTransaction) -> RelayerResult<Bytes> {
        let signature = self
            .signer
            .sign_transaction_sync(tx)
            .map_err(|e| RelayerError::Signing(format!("Failed to sign transaction: {}", e)))?;

        Ok(tx.rlp_signed(&signature))
    }
}

/// Load every configured wallet, file keys first, then the environment key
pub fn load_wallets(config: &WalletConfig, chain_id: u64) -> RelayerResult<Vec<WalletHandle>> {
    let mut wallets = Vec::new();

    if let Some(path) = &config.private_keys_path {
        if Path::new(path).exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| RelayerError::Wallet(format!("Failed to read {}: {}", path, e)))?;
            wallets.extend(parse_key_list(&raw, chain_id)?);
        }
    }

    if let Some(var) = &config.private_key_env {
        if let Ok(key) = std::env::var(var) {
            wallets.push(WalletHandle::from_private_key(&key, chain_id)?);
        }
    }

    if wallets.is_empty() {
        return Err(RelayerError::Wallet(
            "No wallet configured. Provide a private key file or key environment variable"
                .to_string(),
        ));
    }

    info!("Loaded {} wallet(s)", wallets.len());
    Ok(wallets)
}

/// One key per line; blank lines are skipped
fn parse_key_list(raw: &str, chain_id: u64) -> RelayerResult<Vec<WalletHandle>> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|key| WalletHandle::from_private_key(key, chain_id))
        .collect()
}
