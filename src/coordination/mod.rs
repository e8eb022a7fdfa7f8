//! Deposit orchestration across wallets
//!
//! The orchestrator owns the traversal order:
//! 1. Wallets are processed one at a time, in input order
//! 2. Each wallet runs its transaction slots strictly in sequence
//! 3. A slot is resubmitted until the network accepts it, then synced once

pub mod batch;

pub use batch::WalletBatchOrchestrator;
