//! Mount service object
//!
//! One [`Backend`] serves one mount. It owns the client cache and the role
//! store; the host hands it requests, lease callbacks, intent records to
//! replay and invalidation notices.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, info};

use crate::client_cache::ClientCache;
use crate::config::{BackendConfig, ROOT_CONFIG_PATH};
use crate::error::{BackendError, Result};
use crate::host::{StaticSystemView, Storage, SystemView};
use crate::issuer::IssuerConnector;
use crate::roles::RoleStore;

/// Leased-key backend for one mount
pub struct Backend {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) system: Arc<dyn SystemView>,
    pub(crate) config: BackendConfig,
    pub(crate) clients: ClientCache,
    pub(crate) roles: RoleStore,
}

impl Backend {
    /// Create builder for constructing a backend
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use faunakeys_engine::prelude::*;
    /// use faunakeys_engine::testing::{FakeConnector, FakeIssuerService};
    ///
    /// let backend = Backend::builder()
    ///     .storage(Arc::new(MemoryStorage::new()))
    ///     .connector(Arc::new(FakeConnector::new(FakeIssuerService::new())))
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(backend.config().key_name_prefix, "lease");
    /// ```
    pub fn builder() -> BackendBuilder<No, No> {
        BackendBuilder::new()
    }

    /// Backend settings
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Host storage
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Role records
    pub fn roles(&self) -> &RoleStore {
        &self.roles
    }

    /// Issuer client cache
    pub fn client_cache(&self) -> &ClientCache {
        &self.clients
    }

    /// Host notice that `key` was changed by another node
    pub async fn invalidate(&self, key: &str) {
        if key == ROOT_CONFIG_PATH {
            debug!(key, "Root configuration changed elsewhere");
            self.clients.invalidate().await;
        }
    }

    /// Release the cached client. The backend stays usable and rebuilds it on
    /// next use.
    pub async fn shutdown(&self) {
        self.clients.invalidate().await;
        info!("Backend shut down");
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("config", &self.config)
            .field("local_mount", &self.system.local_mount())
            .finish()
    }
}

/// Typestate marker: required component set
pub struct Yes;
/// Typestate marker: required component missing
pub struct No;

/// Builder for [`Backend`]; storage and connector are required
pub struct BackendBuilder<HasStorage, HasConnector> {
    storage: Option<Arc<dyn Storage>>,
    connector: Option<Arc<dyn IssuerConnector>>,
    system: Option<Arc<dyn SystemView>>,
    config: BackendConfig,
    _marker: PhantomData<(HasStorage, HasConnector)>,
}

impl BackendBuilder<No, No> {
    /// Create new builder instance
    pub fn new() -> Self {
        Self {
            storage: None,
            connector: None,
            system: None,
            config: BackendConfig::default(),
            _marker: PhantomData,
        }
    }
}

impl Default for BackendBuilder<No, No> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> BackendBuilder<No, C> {
    /// Set host storage (required)
    pub fn storage(self, storage: Arc<dyn Storage>) -> BackendBuilder<Yes, C> {
        BackendBuilder {
            storage: Some(storage),
            connector: self.connector,
            system: self.system,
            config: self.config,
            _marker: PhantomData,
        }
    }
}

impl<S> BackendBuilder<S, No> {
    /// Set issuer connector (required)
    pub fn connector(self, connector: Arc<dyn IssuerConnector>) -> BackendBuilder<S, Yes> {
        BackendBuilder {
            storage: self.storage,
            connector: Some(connector),
            system: self.system,
            config: self.config,
            _marker: PhantomData,
        }
    }
}

impl<S, C> BackendBuilder<S, C> {
    /// Set the system view (optional, defaults to a standalone node)
    pub fn system_view(mut self, system: Arc<dyn SystemView>) -> Self {
        self.system = Some(system);
        self
    }

    /// Set backend settings (optional)
    pub fn config(mut self, config: BackendConfig) -> Self {
        self.config = config;
        self
    }
}

impl BackendBuilder<Yes, Yes> {
    /// Validate settings and build the backend
    pub fn build(self) -> Result<Backend> {
        self.config.validate()?;

        let (Some(storage), Some(connector)) = (self.storage, self.connector) else {
            return Err(BackendError::Configuration(
                "storage and connector are required".into(),
            ));
        };
        let system = self
            .system
            .unwrap_or_else(|| Arc::new(StaticSystemView::default()));

        Ok(Backend {
            clients: ClientCache::new(connector, self.config.default_endpoint.clone()),
            roles: RoleStore::new(Arc::clone(&storage)),
            storage,
            system,
            config: self.config,
        })
    }
}
