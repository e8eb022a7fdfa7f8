//! Backend account sessions
//!
//! This module provides:
//! - The per-account bearer/refresh credential pair
//! - Token renewal against the secure-token endpoint
//! - The keyed credential file the sessions are loaded from and persisted to

pub mod refresh;
pub mod session;
pub mod store;

pub use refresh::{SecureTokenRefresher, TokenRefresher};
pub use session::AuthSession;
pub use store::{CredentialStore, SessionStore};
