//! Remote key issuer
//!
//! The engine talks to the credential-issuing database through [`KeyIssuer`],
//! an opaque RPC surface with one create and three delete operations. A
//! [`IssuerConnector`] turns root configuration into a live issuer; the
//! [`ClientCache`](crate::client_cache::ClientCache) calls it lazily.
//!
//! Keys are identified for deletion by a [`KeyLocator`]:
//!
//! - `Reference` - the issuer-assigned key reference, known only after the
//!   create call returns. Leases carry this.
//! - `CorrelationHash` - a hash the engine computes *before* the create call
//!   and stores in the key's data, looked up server-side through an index.
//!   Intent records carry this, so a key minted just before a crash can still
//!   be found.

pub mod fauna;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::secret::SecretValue;

/// Errors returned by a [`KeyIssuer`]
#[derive(Debug, Error)]
pub enum IssuerError {
    /// The referenced key or lookup target does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The issuing secret was rejected
    #[error("unauthorized: the issuing secret was rejected")]
    Unauthorized,

    /// The issuing secret lacks permission for the call
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The issuer rejected the call
    #[error("issuer rejected the request with {status} ({code}): {description}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Issuer error code
        code: String,
        /// Issuer error description
        description: String,
    },

    /// Network or HTTP transport failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response could not be understood
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The issuer is temporarily unavailable
    #[error("issuer unavailable: {0}")]
    Unavailable(String),
}

impl IssuerError {
    /// Whether the error means the target key does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether repeating the call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Transport(_))
    }
}

/// Identifies a remote key for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyLocator {
    /// Issuer-assigned key reference
    Reference(String),
    /// Hash of the correlation token stored in the key's data
    CorrelationHash(String),
}

impl fmt::Display for KeyLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference(reference) => write!(f, "ref:{reference}"),
            Self::CorrelationHash(hash) => write!(f, "correlation:{hash}"),
        }
    }
}

/// Hex-encoded SHA-256 of a correlation token.
pub fn correlation_hash(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..])
}

/// Permission role granted to a minted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRole {
    /// Built-in role such as `server`, `admin` or `client`
    Builtin(String),
    /// User-defined role, written `roles/<name>` in role definitions
    Custom(String),
}

impl KeyRole {
    /// Parse a role identifier. `roles/<name>` selects a custom role; anything
    /// else is passed through as a built-in role name.
    pub fn parse(raw: &str) -> Self {
        let tokens: Vec<&str> = raw.split('/').collect();
        match tokens.as_slice() {
            [_, name] => Self::Custom((*name).to_string()),
            _ => Self::Builtin(raw.to_string()),
        }
    }

    /// The built-in admin role, used for root keys
    pub fn admin() -> Self {
        Self::Builtin("admin".to_string())
    }
}

/// Parameters for minting a key.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateKeyRequest {
    /// Role granted to the key
    pub role: KeyRole,
    /// Child database the key is scoped to
    pub database: Option<String>,
    /// Data attached to the key, including the correlation name and hash
    pub data: Map<String, Value>,
}

/// Data field holding the human-readable correlation token
pub const KEY_NAME_FIELD: &str = "name";
/// Data field holding the correlation hash
pub const CORRELATION_HASH_FIELD: &str = "correlation_hash";

impl CreateKeyRequest {
    /// Build a request, attaching the correlation token and its hash to the
    /// role's extra data.
    pub fn new(
        role: KeyRole,
        database: Option<String>,
        extra: Option<Map<String, Value>>,
        correlation_token: &str,
    ) -> Self {
        let mut data = extra.unwrap_or_default();
        data.insert(
            KEY_NAME_FIELD.to_string(),
            Value::String(correlation_token.to_string()),
        );
        data.insert(
            CORRELATION_HASH_FIELD.to_string(),
            Value::String(correlation_hash(correlation_token)),
        );
        Self {
            role,
            database,
            data,
        }
    }
}

/// Result of a successful mint.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    /// Secret handed to the caller
    pub secret: SecretValue,
    /// Issuer-assigned reference
    pub reference: String,
}

/// Operations of the remote credential issuer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyIssuer: Send + Sync {
    /// Mint a new key
    async fn create_key(&self, request: &CreateKeyRequest) -> Result<IssuedKey, IssuerError>;

    /// Delete a key by issuer reference
    async fn delete_key(&self, reference: &str) -> Result<(), IssuerError>;

    /// Delete the key that owns `secret`
    async fn delete_key_by_secret(&self, secret: &SecretValue) -> Result<(), IssuerError>;

    /// Delete the key whose data carries `hash` as its correlation hash
    async fn delete_key_by_correlation(&self, hash: &str) -> Result<(), IssuerError>;
}

/// Settings a connector builds an issuer from.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Issuing secret, empty when root configuration is absent
    pub secret: SecretValue,
    /// Issuer endpoint URL
    pub endpoint: String,
}

/// Builds [`KeyIssuer`] instances from root configuration.
pub trait IssuerConnector: Send + Sync {
    /// Construct an issuer bound to `settings`. Must not perform network I/O.
    fn connect(&self, settings: &ClientSettings) -> Result<Arc<dyn KeyIssuer>, IssuerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("server", KeyRole::Builtin("server".into()))]
    #[case("admin", KeyRole::Builtin("admin".into()))]
    #[case("roles/reader", KeyRole::Custom("reader".into()))]
    #[case("a/b/c", KeyRole::Builtin("a/b/c".into()))]
    fn test_key_role_parse(#[case] raw: &str, #[case] expected: KeyRole) {
        assert_eq!(KeyRole::parse(raw), expected);
    }

    #[test]
    fn test_locator_serialization() {
        let json = serde_json::to_value(KeyLocator::CorrelationHash("ab12".into())).unwrap();
        assert_eq!(json, serde_json::json!({"correlation_hash": "ab12"}));

        let back: KeyLocator = serde_json::from_value(serde_json::json!({"reference": "42"})).unwrap();
        assert_eq!(back, KeyLocator::Reference("42".into()));
    }

    #[test]
    fn test_create_request_attaches_correlation() {
        let mut extra = Map::new();
        extra.insert("team".into(), Value::String("platform".into()));

        let request = CreateKeyRequest::new(
            KeyRole::parse("server"),
            Some("db1".into()),
            Some(extra),
            "lease-alice-deploy-1700000000-42",
        );

        assert_eq!(request.data["team"], "platform");
        assert_eq!(request.data[KEY_NAME_FIELD], "lease-alice-deploy-1700000000-42");
        assert_eq!(
            request.data[CORRELATION_HASH_FIELD],
            Value::String(correlation_hash("lease-alice-deploy-1700000000-42"))
        );
    }

    #[test]
    fn test_correlation_hash_is_stable_hex() {
        let hash = correlation_hash("token");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, correlation_hash("token"));
        assert_ne!(hash, correlation_hash("token2"));
    }
}
