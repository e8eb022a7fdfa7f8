//! Authenticated GraphQL client for the game backend

use crate::auth::AuthSession;
use crate::config::BackendConfig;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use ethers::types::H256;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const SYNC_ETHEREUM_TX: &str = r#"
mutation SyncEthereumTx($chainId: Int!, $txHash: String!) {
  syncEthereumTx(chainId: $chainId, txHash: $txHash)
}"#;

const CURRENT_USER: &str = r#"
query CurrentUser {
  currentUser {
    id
    name
  }
}"#;

const GET_GARDEN: &str = r#"
query GetGardenForCurrentUser {
  getGardenForCurrentUser {
    id
    gardenStatus {
      growActionCount
      gardenRewardActionCount
    }
  }
}"#;

const EXECUTE_GROW_ACTION: &str = r#"
mutation ExecuteGrowAction($withAll: Boolean) {
  executeGrowAction(withAll: $withAll) {
    baseValue
    leveragedValue
    totalValue
    multiplyRate
  }
}"#;

const EXECUTE_GARDEN_REWARD_ACTION: &str = r#"
mutation executeGardenRewardAction($limit: Int!) {
  executeGardenRewardAction(limit: $limit) {
    data {
      cardId
      group
    }
    isNew
  }
}"#;

/// Action counters of the current user's garden
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GardenStatus {
    pub grow_action_count: u64,
    pub garden_reward_action_count: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowResult {
    pub base_value: f64,
    pub leveraged_value: f64,
    pub total_value: f64,
    pub multiply_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawnCard {
    pub data: CardData,
    #[serde(default)]
    pub is_new: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardData {
    pub card_id: Value,
    pub group: String,
}

/// Backend operations, each authenticated with the given session
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Report a transaction hash; `true` when the backend credited it
    async fn sync_ethereum_tx(
        &self,
        session: &AuthSession,
        chain_id: u64,
        tx_hash: H256,
    ) -> RelayerResult<bool>;

    /// Display name of the session's user
    async fn current_user_name(&self, session: &AuthSession) -> RelayerResult<String>;

    async fn garden_status(&self, session: &AuthSession) -> RelayerResult<GardenStatus>;

    /// `None` when the backend returned no result for the action
    async fn execute_grow_action(
        &self,
        session: &AuthSession,
        with_all: bool,
    ) -> RelayerResult<Option<GrowResult>>;

    async fn execute_draw(&self, session: &AuthSession, limit: u32) -> RelayerResult<Vec<DrawnCard>>;
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

/// reqwest-backed GraphQL client
pub struct GraphqlBackend {
    client: reqwest::Client,
    url: String,
    user_agent: String,
}

impl GraphqlBackend {
    pub fn new(config: &BackendConfig) -> RelayerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RelayerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.graphql_url.clone(),
            user_agent: config.user_agent.clone(),
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        session: &AuthSession,
        operation: &str,
        query: &str,
        variables: Value,
    ) -> RelayerResult<T> {
        let response = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, session.authorization())
            .header(USER_AGENT, &self.user_agent)
            .json(&json!({
                "query": query,
                "variables": variables,
                "operationName": operation,
            }))
            .send()
            .await
            .map_err(|e| RelayerError::backend(operation, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RelayerError::backend(operation, e))?;

        debug!("{} responded with {}", operation, status);
        decode(status, &body, operation, session.key())
    }
}

/// Unwrap a GraphQL envelope, classifying auth rejections as expired sessions
fn decode<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
    operation: &str,
    account: &str,
) -> RelayerResult<T> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RelayerError::SessionExpired {
            account: account.to_string(),
        });
    }
    if !status.is_success() {
        return Err(RelayerError::backend(operation, format!("HTTP {}", status)));
    }

    let envelope: GraphqlResponse<T> =
        serde_json::from_str(body).map_err(|e| RelayerError::backend(operation, e))?;

    if let Some(first) = envelope.errors.first() {
        if envelope.errors.iter().any(|e| is_auth_message(&e.message)) {
            return Err(RelayerError::SessionExpired {
                account: account.to_string(),
            });
        }
        return Err(RelayerError::backend(operation, &first.message));
    }

    envelope
        .data
        .ok_or_else(|| RelayerError::backend(operation, "response carried no data"))
}

fn is_auth_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "unauthorized",
        "unauthenticated",
        "not authenticated",
        "invalid token",
        "token expired",
        "token has expired",
        "expired token",
        "jwt expired",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn field<'a>(value: &'a Value, path: &[&str]) -> &'a Value {
    path.iter().fold(value, |v, key| &v[*key])
}

#[async_trait]
impl BackendApi for GraphqlBackend {
    async fn sync_ethereum_tx(
        &self,
        session: &AuthSession,
        chain_id: u64,
        tx_hash: H256,
    ) -> RelayerResult<bool> {
        let data: Value = self
            .execute(
                session,
                "SyncEthereumTx",
                SYNC_ETHEREUM_TX,
                json!({ "chainId": chain_id, "txHash": format!("{:?}", tx_hash) }),
            )
            .await?;

        Ok(is_truthy(&data["syncEthereumTx"]))
    }

    async fn current_user_name(&self, session: &AuthSession) -> RelayerResult<String> {
        let data: Value = self
            .execute(session, "CurrentUser", CURRENT_USER, json!({}))
            .await?;

        field(&data, &["currentUser", "name"])
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RelayerError::backend("CurrentUser", "user name not found in response"))
    }

    async fn garden_status(&self, session: &AuthSession) -> RelayerResult<GardenStatus> {
        let data: Value = self
            .execute(session, "GetGardenForCurrentUser", GET_GARDEN, json!({}))
            .await?;

        let status = field(&data, &["getGardenForCurrentUser", "gardenStatus"]);
        let count = |name: &str| -> RelayerResult<u64> {
            status[name]
                .as_f64()
                .map(|n| n.max(0.0).floor() as u64)
                .ok_or_else(|| {
                    RelayerError::backend(
                        "GetGardenForCurrentUser",
                        format!("{} not found in response", name),
                    )
                })
        };

        Ok(GardenStatus {
            grow_action_count: count("growActionCount")?,
            garden_reward_action_count: count("gardenRewardActionCount")?,
        })
    }

    async fn execute_grow_action(
        &self,
        session: &AuthSession,
        with_all: bool,
    ) -> RelayerResult<Option<GrowResult>> {
        let data: Value = self
            .execute(
                session,
                "ExecuteGrowAction",
                EXECUTE_GROW_ACTION,
                json!({ "withAll": with_all }),
            )
            .await?;

        match &data["executeGrowAction"] {
            Value::Null => Ok(None),
            result => serde_json::from_value(result.clone())
                .map(Some)
                .map_err(|e| RelayerError::backend("ExecuteGrowAction", e)),
        }
    }

    async fn execute_draw(&self, session: &AuthSession, limit: u32) -> RelayerResult<Vec<DrawnCard>> {
        let data: Value = self
            .execute(
                session,
                "executeGardenRewardAction",
                EXECUTE_GARDEN_REWARD_ACTION,
                json!({ "limit": limit }),
            )
            .await?;

        match &data["executeGardenRewardAction"] {
            Value::Null => Ok(Vec::new()),
            cards => serde_json::from_value(cards.clone())
                .map_err(|e| RelayerError::backend("executeGardenRewardAction", e)),
        }
    }
}
