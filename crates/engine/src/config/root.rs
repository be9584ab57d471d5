use serde::{Deserialize, Serialize};

use crate::host::{self, Storage, StorageError};
use crate::secret::SecretValue;

/// Storage path of the root configuration
pub const ROOT_CONFIG_PATH: &str = "config/root";

/// Issuing credential and endpoint the mount talks to the issuer with.
///
/// Only read or written while holding the client cache lock, see
/// [`ClientCache::lock_exclusive`](crate::ClientCache::lock_exclusive).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootConfig {
    /// Secret with permission to create and delete keys
    pub secret: SecretValue,

    /// Endpoint override, the backend default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl RootConfig {
    /// Root configuration with the default endpoint
    pub fn new(secret: impl Into<SecretValue>) -> Self {
        Self {
            secret: secret.into(),
            endpoint: None,
        }
    }

    /// Override the endpoint (builder pattern)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Endpoint to use, falling back to `default`
    pub fn endpoint_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.endpoint.as_deref().unwrap_or(default)
    }

    pub(crate) async fn load(storage: &dyn Storage) -> Result<Option<Self>, StorageError> {
        host::read_json(storage, ROOT_CONFIG_PATH).await
    }

    pub(crate) async fn store(&self, storage: &dyn Storage) -> Result<(), StorageError> {
        host::write_json(storage, ROOT_CONFIG_PATH, self).await
    }
}
