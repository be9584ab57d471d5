use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::host::{self, Storage, StorageError};

/// Storage path of the lease policy
pub const LEASE_CONFIG_PATH: &str = "config/lease";

/// Lease terms applied to issued keys on creation and renewal.
///
/// An absent policy means zero for both, i.e. the host defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Lease duration
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Upper bound across renewals
    #[serde(with = "humantime_serde")]
    pub max_ttl: Duration,
}

impl LeaseConfig {
    /// Create a lease policy
    pub fn new(ttl: Duration, max_ttl: Duration) -> Self {
        Self { ttl, max_ttl }
    }

    pub(crate) async fn load(storage: &dyn Storage) -> Result<Option<Self>, StorageError> {
        host::read_json(storage, LEASE_CONFIG_PATH).await
    }

    pub(crate) async fn store(&self, storage: &dyn Storage) -> Result<(), StorageError> {
        host::write_json(storage, LEASE_CONFIG_PATH, self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryStorage;

    #[tokio::test]
    async fn test_lease_is_stored_as_text() {
        let storage = MemoryStorage::new();
        LeaseConfig::new(Duration::from_secs(3600), Duration::from_secs(86400))
            .store(&storage)
            .await
            .unwrap();

        let raw = storage.get(LEASE_CONFIG_PATH).await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json, serde_json::json!({"ttl": "1h", "max_ttl": "1day"}));

        let loaded = LeaseConfig::load(&storage).await.unwrap().unwrap();
        assert_eq!(loaded.max_ttl, Duration::from_secs(86400));
    }
}
