//! Deposit call construction

use ethers::types::{Address, Bytes, TransactionRequest, U256};
use sha3::{Digest, Keccak256};

/// Zero-argument payable deposit entry point
pub const DEPOSIT_SIGNATURE: &str = "depositETH()";

/// What to send: a fixed contract, an amount, and the deposit call payload.
/// Built fresh for every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    pub destination: Address,
    pub value: U256,
    pub data: Bytes,
}

impl TransactionIntent {
    pub fn deposit(contract: Address, value: U256) -> Self {
        Self {
            destination: contract,
            value,
            data: Bytes::from(function_selector(DEPOSIT_SIGNATURE).to_vec()),
        }
    }

    /// Unsigned request used for gas estimation
    pub fn estimate_request(&self, from: Address) -> TransactionRequest {
        TransactionRequest::new()
            .from(from)
            .to(self.destination)
            .value(self.value)
            .data(self.data.clone())
    }
}

/// First four bytes of keccak256 over the canonical function signature
pub fn function_selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&digest[..4]);
    selector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selector() {
        assert_eq!(
            hex::encode(function_selector("transfer(address,uint256)")),
            "a9059cbb"
        );
    }

    #[test]
    fn test_deposit_payload_is_bare_selector() {
        let intent = TransactionIntent::deposit(Address::repeat_byte(0x11), U256::from(100_000u64));
        assert_eq!(intent.data.as_ref(), &ethers::utils::id(DEPOSIT_SIGNATURE)[..]);
        assert_eq!(intent.data.len(), 4);
    }
}
