//! Backend module - the game backend's GraphQL surface and transaction reconciliation
//!
//! This module provides:
//! - An authenticated GraphQL client for sync, profile and reward operations
//! - The bounded-retry reconciliation client with its session refresh escalation

pub mod client;
pub mod sync;

pub use client::{BackendApi, GraphqlBackend};
pub use sync::{BackendSyncClient, SyncOutcome};
