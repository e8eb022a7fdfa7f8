//! Transaction submission module with fee gating and nonce sequencing

mod gas;
mod intent;
mod nonce;
mod sender;

pub use gas::FeeGate;
pub use intent::TransactionIntent;
pub use sender::{TransactionRecord, TransactionSubmitter};
