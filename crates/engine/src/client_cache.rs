//! Lazily built, invalidatable issuer client
//!
//! One [`IssuerHandle`] is cached per backend. Lookups take the shared lock;
//! a miss upgrades to the exclusive lock, re-checks, and builds the client from
//! the stored [`RootConfig`]. Anything that writes the root configuration does
//! so under [`ClientCache::lock_exclusive`] and invalidates through the same
//! guard, so no reader can observe the new configuration with the old client.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::config::RootConfig;
use crate::error::{BackendError, Phase, Result};
use crate::host::Storage;
use crate::issuer::{ClientSettings, IssuerConnector, KeyIssuer};

/// A built issuer client plus what it was built from
#[derive(Clone)]
pub struct IssuerHandle {
    issuer: Arc<dyn KeyIssuer>,
    authenticated: bool,
    endpoint: String,
}

impl IssuerHandle {
    /// The issuer itself
    pub fn issuer(&self) -> &dyn KeyIssuer {
        self.issuer.as_ref()
    }

    /// Whether the client was built with a non-empty root secret.
    ///
    /// A client built before root configuration exists carries an empty
    /// secret; every remote call it makes would be rejected.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Endpoint the client talks to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Deref for IssuerHandle {
    type Target = dyn KeyIssuer;

    fn deref(&self) -> &Self::Target {
        self.issuer.as_ref()
    }
}

impl fmt::Debug for IssuerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerHandle")
            .field("authenticated", &self.authenticated)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Cache holding at most one issuer client
pub struct ClientCache {
    connector: Arc<dyn IssuerConnector>,
    default_endpoint: String,
    slot: RwLock<Option<IssuerHandle>>,
}

/// Exclusive hold on the client cache, taken around root configuration
/// writes.
pub struct ExclusiveGuard<'a> {
    slot: RwLockWriteGuard<'a, Option<IssuerHandle>>,
}

impl ExclusiveGuard<'_> {
    /// Drop the cached client while keeping the lock
    pub fn invalidate(&mut self) {
        if self.slot.take().is_some() {
            debug!("Issuer client invalidated");
        }
    }
}

/// Shared hold on the client cache, taken around root configuration reads.
pub struct SharedGuard<'a> {
    _slot: RwLockReadGuard<'a, Option<IssuerHandle>>,
}

impl ClientCache {
    /// Create an empty cache
    pub fn new(connector: Arc<dyn IssuerConnector>, default_endpoint: impl Into<String>) -> Self {
        Self {
            connector,
            default_endpoint: default_endpoint.into(),
            slot: RwLock::new(None),
        }
    }

    /// Return the cached client, building it on first use.
    pub async fn get(&self, storage: &dyn Storage) -> Result<IssuerHandle> {
        {
            let slot = self.slot.read().await;
            if let Some(handle) = slot.as_ref() {
                debug!("Issuer client cache hit");
                return Ok(handle.clone());
            }
        }

        let mut slot = self.slot.write().await;

        // another task may have built it while we waited
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }

        debug!("Issuer client cache miss");
        let handle = self.connect(storage).await?;
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Drop the cached client unconditionally
    pub async fn invalidate(&self) {
        self.lock_exclusive().await.invalidate();
    }

    /// Take the cache lock exclusively
    pub async fn lock_exclusive(&self) -> ExclusiveGuard<'_> {
        ExclusiveGuard {
            slot: self.slot.write().await,
        }
    }

    /// Take the cache lock shared
    pub async fn lock_shared(&self) -> SharedGuard<'_> {
        SharedGuard {
            _slot: self.slot.read().await,
        }
    }

    /// Whether a client is currently cached
    pub async fn is_cached(&self) -> bool {
        self.slot.read().await.is_some()
    }

    async fn connect(&self, storage: &dyn Storage) -> Result<IssuerHandle> {
        let root = RootConfig::load(storage)
            .await
            .map_err(BackendError::bookkeeping(Phase::ReadRootConfig))?
            .unwrap_or_default();

        let endpoint = root.endpoint_or(&self.default_endpoint).to_string();
        let issuer = self
            .connector
            .connect(&ClientSettings {
                secret: root.secret.clone(),
                endpoint: endpoint.clone(),
            })
            .map_err(BackendError::remote(Phase::Connect))?;

        debug!(endpoint = %endpoint, authenticated = !root.secret.is_empty(), "Issuer client built");

        Ok(IssuerHandle {
            issuer,
            authenticated: !root.secret.is_empty(),
            endpoint,
        })
    }
}

impl fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCache")
            .field("default_endpoint", &self.default_endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryStorage;
    use crate::testing::{FakeConnector, FakeIssuerService};

    const DEFAULT: &str = "https://db.fauna.com";

    async fn storage_with_root(secret: &str) -> MemoryStorage {
        let storage = MemoryStorage::new();
        RootConfig::new(secret).store(&storage).await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_builds_once_and_reuses() {
        let connector = FakeConnector::new(FakeIssuerService::with_root("root"));
        let cache = ClientCache::new(Arc::new(connector.clone()), DEFAULT);
        let storage = storage_with_root("root").await;

        let first = cache.get(&storage).await.unwrap();
        let second = cache.get(&storage).await.unwrap();

        assert!(first.is_authenticated());
        assert_eq!(first.endpoint(), DEFAULT);
        assert_eq!(second.endpoint(), DEFAULT);
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_absent_root_builds_unauthenticated_client() {
        let connector = FakeConnector::new(FakeIssuerService::new());
        let cache = ClientCache::new(Arc::new(connector), DEFAULT);

        let handle = cache.get(&MemoryStorage::new()).await.unwrap();
        assert!(!handle.is_authenticated());
    }

    #[tokio::test]
    async fn test_invalidate_forces_rebuild_with_new_config() {
        let connector = FakeConnector::new(FakeIssuerService::with_root("root"));
        let cache = ClientCache::new(Arc::new(connector.clone()), DEFAULT);
        let storage = storage_with_root("root").await;

        cache.get(&storage).await.unwrap();
        {
            let mut guard = cache.lock_exclusive().await;
            RootConfig::new("root")
                .with_endpoint("http://localhost:8443")
                .store(&storage)
                .await
                .unwrap();
            guard.invalidate();
        }
        assert!(!cache.is_cached().await);

        let handle = cache.get(&storage).await.unwrap();
        assert_eq!(handle.endpoint(), "http://localhost:8443");
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_builds_one_client() {
        let connector = FakeConnector::new(FakeIssuerService::with_root("root"));
        let cache = Arc::new(ClientCache::new(Arc::new(connector.clone()), DEFAULT));
        let storage = Arc::new(storage_with_root("root").await);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let storage = Arc::clone(&storage);
                tokio::spawn(async move { cache.get(storage.as_ref()).await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_is_not_cached() {
        let connector = FakeConnector::new(FakeIssuerService::with_root("root"));
        connector.fail_next_connect(crate::issuer::IssuerError::Protocol("bad endpoint".into()));
        let cache = ClientCache::new(Arc::new(connector.clone()), DEFAULT);
        let storage = storage_with_root("root").await;

        let err = cache.get(&storage).await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::RemoteIssuer {
                phase: Phase::Connect,
                ..
            }
        ));
        assert!(!cache.is_cached().await);

        cache.get(&storage).await.unwrap();
        assert_eq!(connector.connect_count(), 2);
    }
}
