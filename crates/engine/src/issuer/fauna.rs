//! Fauna key issuer over HTTP
//!
//! Queries are posted as FQL wire-format JSON to the configured endpoint with
//! the issuing secret as a bearer token. Deleting by correlation hash needs an
//! index over the `keys` collection with `data.correlation_hash` as its term;
//! its name is [`FaunaConnectorConfig::correlation_index`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;
use url::Url;

use super::{ClientSettings, CreateKeyRequest, IssuedKey, IssuerConnector, IssuerError, KeyIssuer, KeyRole};
use crate::config::ConfigError;
use crate::secret::SecretValue;

/// Production Fauna endpoint
pub const DEFAULT_ENDPOINT: &str = "https://db.fauna.com";

/// Configuration for [`FaunaConnector`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaunaConnectorConfig {
    /// Per-request timeout (must be between 1-60 seconds)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Index over keys by `data.correlation_hash`
    pub correlation_index: String,

    /// User-Agent header sent with every query
    pub user_agent: String,
}

impl Default for FaunaConnectorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            correlation_index: "keys_by_correlation_hash".into(),
            user_agent: concat!("faunakeys/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl FaunaConnectorConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeout_secs = self.timeout.as_secs();
        if !(1..=60).contains(&timeout_secs) {
            return Err(ConfigError::InvalidValue {
                field: "timeout".into(),
                reason: format!("must be between 1 and 60 seconds, got {timeout_secs} seconds"),
            });
        }

        if self.correlation_index.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "correlation_index".into(),
            });
        }

        Ok(())
    }
}

/// Builds [`FaunaClient`]s sharing one HTTP connection pool.
#[derive(Debug, Clone)]
pub struct FaunaConnector {
    config: FaunaConnectorConfig,
    http: reqwest::Client,
}

impl FaunaConnector {
    /// Create a connector.
    ///
    /// # Errors
    ///
    /// Returns error if configuration validation fails or the HTTP client
    /// cannot be built.
    pub fn new(config: FaunaConnectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::ValidationFailed(format!("HTTP client: {e}")))?;

        Ok(Self { config, http })
    }
}

impl IssuerConnector for FaunaConnector {
    fn connect(&self, settings: &ClientSettings) -> Result<Arc<dyn KeyIssuer>, IssuerError> {
        let endpoint = Url::parse(&settings.endpoint).map_err(|e| {
            IssuerError::Protocol(format!("invalid endpoint '{}': {e}", settings.endpoint))
        })?;

        Ok(Arc::new(FaunaClient {
            http: self.http.clone(),
            endpoint,
            secret: settings.secret.clone(),
            correlation_index: self.config.correlation_index.clone(),
        }))
    }
}

/// HTTP client bound to one issuing secret.
pub struct FaunaClient {
    http: reqwest::Client,
    endpoint: Url,
    secret: SecretValue,
    correlation_index: String,
}

impl std::fmt::Debug for FaunaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaunaClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("correlation_index", &self.correlation_index)
            .finish()
    }
}

impl FaunaClient {
    async fn query(&self, expr: Value) -> Result<Value, IssuerError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(self.secret.expose())
            .json(&expr)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }

        let mut payload: Value = serde_json::from_slice(&body)
            .map_err(|e| IssuerError::Protocol(format!("response is not JSON: {e}")))?;
        payload
            .get_mut("resource")
            .map(Value::take)
            .ok_or_else(|| IssuerError::Protocol("response has no resource".into()))
    }
}

#[async_trait]
impl KeyIssuer for FaunaClient {
    async fn create_key(&self, request: &CreateKeyRequest) -> Result<IssuedKey, IssuerError> {
        let resource = self.query(create_key_query(request)).await?;

        let secret = resource
            .get("secret")
            .and_then(Value::as_str)
            .ok_or_else(|| IssuerError::Protocol("created key has no secret".into()))?;
        let reference = resource
            .pointer("/ref/@ref/id")
            .and_then(Value::as_str)
            .ok_or_else(|| IssuerError::Protocol("created key has no ref".into()))?;

        debug!(reference, "Fauna key created");

        Ok(IssuedKey {
            secret: SecretValue::new(secret),
            reference: reference.to_string(),
        })
    }

    async fn delete_key(&self, reference: &str) -> Result<(), IssuerError> {
        self.query(json!({"delete": {"ref": {"keys": null}, "id": reference}}))
            .await
            .map(drop)
    }

    async fn delete_key_by_secret(&self, secret: &SecretValue) -> Result<(), IssuerError> {
        self.query(json!({
            "delete": {"select": "ref", "from": {"key_from_secret": secret.expose()}}
        }))
        .await
        .map(drop)
    }

    async fn delete_key_by_correlation(&self, hash: &str) -> Result<(), IssuerError> {
        self.query(json!({
            "delete": {
                "select": "ref",
                "from": {"get": {"match": {"index": self.correlation_index}, "terms": hash}}
            }
        }))
        .await
        .map(drop)
    }
}

fn create_key_query(request: &CreateKeyRequest) -> Value {
    let mut params = Map::new();

    let role = match &request.role {
        KeyRole::Builtin(name) => Value::String(name.clone()),
        KeyRole::Custom(name) => json!({"role": name}),
    };
    params.insert("role".into(), role);

    if let Some(database) = &request.database {
        params.insert("database".into(), json!({"database": database}));
    }

    if !request.data.is_empty() {
        params.insert("data".into(), literal(&Value::Object(request.data.clone())));
    }

    json!({"create_key": {"object": params}})
}

/// Quote a JSON value as an FQL literal: objects are wrapped so their keys are
/// not read as function calls.
fn literal(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let quoted: Map<String, Value> = fields
                .iter()
                .map(|(k, v)| (k.clone(), literal(v)))
                .collect();
            json!({"object": quoted})
        }
        Value::Array(items) => Value::Array(items.iter().map(literal).collect()),
        other => other.clone(),
    }
}

#[derive(Deserialize)]
struct FailureBody {
    #[serde(default)]
    errors: Vec<FailureEntry>,
}

#[derive(Deserialize)]
struct FailureEntry {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

fn classify_failure(status: StatusCode, body: &[u8]) -> IssuerError {
    let (code, description) = match serde_json::from_slice::<FailureBody>(body) {
        Ok(parsed) => parsed
            .errors
            .into_iter()
            .next()
            .map(|e| (e.code, e.description))
            .unwrap_or_default(),
        Err(_) => (String::new(), String::from_utf8_lossy(body).into_owned()),
    };

    match status {
        StatusCode::UNAUTHORIZED => IssuerError::Unauthorized,
        StatusCode::FORBIDDEN => IssuerError::PermissionDenied(description),
        StatusCode::NOT_FOUND => IssuerError::NotFound(description),
        _ if code == "instance not found" => IssuerError::NotFound(description),
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => IssuerError::Unavailable(format!("{status}: {description}")),
        _ => IssuerError::Rejected {
            status: status.as_u16(),
            code,
            description,
        },
    }
}
