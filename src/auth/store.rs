//! Credential file holding one `{ refreshToken, authToken }` record per account

use super::session::AuthSession;
use crate::error::{RelayerError, RelayerResult};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Key under which a single-object credential file is exposed
pub const DEFAULT_ACCOUNT: &str = "default";

/// Sink for refreshed sessions
#[cfg_attr(test, mockall::automock)]
pub trait SessionStore: Send + Sync {
    fn persist(&self, session: &AuthSession) -> RelayerResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCredential {
    refresh_token: String,
    #[serde(default)]
    auth_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CredentialFile {
    Single(StoredCredential),
    Keyed(BTreeMap<String, StoredCredential>),
}

struct StoreState {
    accounts: BTreeMap<String, StoredCredential>,
    single: bool,
}

/// JSON credential store, written back whole after every change
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl CredentialStore {
    /// Load the credential file; a missing or malformed file is a startup error
    pub fn load(path: impl AsRef<Path>) -> RelayerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            RelayerError::CredentialStore(format!("Failed to read {:?}: {}", path, e))
        })?;

        let parsed: CredentialFile = serde_json::from_str(&raw).map_err(|e| {
            RelayerError::CredentialStore(format!("Malformed credentials in {:?}: {}", path, e))
        })?;

        let (accounts, single) = match parsed {
            CredentialFile::Single(record) => {
                let mut accounts = BTreeMap::new();
                accounts.insert(DEFAULT_ACCOUNT.to_string(), record);
                (accounts, true)
            }
            CredentialFile::Keyed(accounts) => (accounts, false),
        };

        if accounts.is_empty() {
            return Err(RelayerError::CredentialStore(format!(
                "No accounts in {:?}",
                path
            )));
        }

        info!("Loaded {} account(s) from {:?}", accounts.len(), path);

        Ok(Self {
            path,
            state: Mutex::new(StoreState { accounts, single }),
        })
    }

    /// All sessions in key order
    pub fn sessions(&self) -> RelayerResult<Vec<AuthSession>> {
        let state = self.lock()?;
        Ok(state
            .accounts
            .iter()
            .map(|(key, record)| to_session(key, record))
            .collect())
    }

    /// Session for `key`, or the first account when no key is given
    pub fn session(&self, key: Option<&str>) -> RelayerResult<AuthSession> {
        let state = self.lock()?;
        let found = match key {
            Some(key) => state.accounts.get_key_value(key),
            None => state.accounts.iter().next(),
        };

        found
            .map(|(key, record)| to_session(key, record))
            .ok_or_else(|| {
                RelayerError::CredentialStore(format!("Account {:?} not found", key))
            })
    }

    /// Remember the backend display name for an account
    pub fn remember_user_name(&self, key: &str, name: &str) -> RelayerResult<()> {
        let mut state = self.lock()?;
        match state.accounts.get_mut(key) {
            Some(record) if record.user_name.as_deref() != Some(name) => {
                record.user_name = Some(name.to_string());
            }
            _ => return Ok(()),
        }
        self.write(&state)
    }

    pub fn user_name(&self, key: &str) -> Option<String> {
        self.lock()
            .ok()
            .and_then(|state| state.accounts.get(key).and_then(|r| r.user_name.clone()))
    }

    fn lock(&self) -> RelayerResult<std::sync::MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| RelayerError::CredentialStore("Credential store lock poisoned".to_string()))
    }

    fn write(&self, state: &StoreState) -> RelayerResult<()> {
        let rendered = match state.accounts.values().next() {
            Some(record) if state.single && state.accounts.len() == 1 => {
                serde_json::to_string_pretty(record)
            }
            _ => serde_json::to_string_pretty(&state.accounts),
        };
        let rendered = rendered.map_err(|e| RelayerError::CredentialStore(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, rendered)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| {
                RelayerError::CredentialStore(format!("Failed to write {:?}: {}", self.path, e))
            })?;

        debug!("Credentials written to {:?}", self.path);
        Ok(())
    }
}

impl SessionStore for CredentialStore {
    fn persist(&self, session: &AuthSession) -> RelayerResult<()> {
        let mut state = self.lock()?;
        let record = state
            .accounts
            .entry(session.key().to_string())
            .or_insert_with(|| StoredCredential {
                refresh_token: String::new(),
                auth_token: String::new(),
                user_name: None,
            });
        record.auth_token = session.authorization();
        record.refresh_token = session.refresh_token().to_string();

        self.write(&state)?;
        info!("Tokens for account {} saved", session.key());
        Ok(())
    }
}

fn to_session(key: &str, record: &StoredCredential) -> AuthSession {
    AuthSession::new(key, record.auth_token.clone(), record.refresh_token.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_single_object_file_loads_as_default_account() {
        let file = file_with(r#"{ "refreshToken": "r1", "authToken": "Bearer a1" }"#);
        let store = CredentialStore::load(file.path()).unwrap();

        let session = store.session(None).unwrap();
        assert_eq!(session.key(), DEFAULT_ACCOUNT);
        assert_eq!(session.access_token(), "a1");
        assert_eq!(session.refresh_token(), "r1");
    }

    #[test]
    fn test_keyed_file_lists_all_accounts() {
        let file = file_with(
            r#"{
                "alice": { "refreshToken": "ra", "authToken": "Bearer aa", "userName": "Alice" },
                "bob": { "refreshToken": "rb", "authToken": "ab" }
            }"#,
        );
        let store = CredentialStore::load(file.path()).unwrap();

        let sessions = store.sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].key(), "alice");
        assert_eq!(sessions[1].access_token(), "ab");
        assert_eq!(store.user_name("alice").as_deref(), Some("Alice"));
        assert!(store.session(Some("carol")).is_err());
    }

    #[test]
    fn test_persist_rewrites_both_tokens_in_file_shape() {
        let file = file_with(r#"{ "refreshToken": "r1", "authToken": "Bearer a1" }"#);
        let store = CredentialStore::load(file.path()).unwrap();

        let session = AuthSession::new(DEFAULT_ACCOUNT, "a2", "r2");
        store.persist(&session).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(written["authToken"], "Bearer a2");
        assert_eq!(written["refreshToken"], "r2");

        let reloaded = CredentialStore::load(file.path()).unwrap();
        assert_eq!(reloaded.session(None).unwrap(), session);
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        let file = file_with("[1, 2, 3]");
        assert!(CredentialStore::load(file.path()).is_err());

        let empty = file_with("{}");
        assert!(CredentialStore::load(empty.path()).is_err());
    }
}
