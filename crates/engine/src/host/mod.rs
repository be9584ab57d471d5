//! Interfaces consumed from the secrets host
//!
//! The host owns durable storage and knows the mount's replication role. The
//! engine only sees the narrow traits below; every call is atomic per call and
//! may block the calling task.

mod memory;

pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// The storage substrate failed the call
    #[error("storage operation on '{path}' failed: {message}")]
    Backend {
        /// Path that was being accessed
        path: String,
        /// Substrate-provided description
        message: String,
    },

    /// A record could not be encoded or decoded
    #[error("malformed record at '{path}': {source}")]
    Codec {
        /// Path of the record
        path: String,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Shorthand for [`StorageError::Backend`]
    pub fn backend(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Durable key-value storage provided by the host.
///
/// Paths are `/`-separated. `list` returns the immediate children of a prefix;
/// children that have descendants of their own are suffixed with `/`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the value at `path`, `None` if absent
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write `value` at `path`, replacing any previous value
    async fn put(&self, path: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Delete the value at `path`; deleting an absent path succeeds
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// List the immediate children of `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Read and decode a JSON record.
pub async fn read_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    path: &str,
) -> Result<Option<T>, StorageError> {
    match storage.get(path).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Codec {
                path: path.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode and write a JSON record.
pub async fn write_json<T: Serialize + ?Sized>(
    storage: &dyn Storage,
    path: &str,
    value: &T,
) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec(value).map_err(|source| StorageError::Codec {
        path: path.to_string(),
        source,
    })?;
    storage.put(path, bytes).await
}

/// Replication role of the node serving this mount.
///
/// Mirrors the host's bit-set: a node can be in several states at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ReplicationState(u8);

impl ReplicationState {
    /// Standalone or primary node
    pub const NONE: Self = Self(0);
    /// Performance replication primary
    pub const PERFORMANCE_PRIMARY: Self = Self(1);
    /// Performance replication secondary cluster
    pub const PERFORMANCE_SECONDARY: Self = Self(1 << 1);
    /// Performance standby node within a cluster
    pub const PERFORMANCE_STANDBY: Self = Self(1 << 2);
    /// Disaster recovery primary
    pub const DR_PRIMARY: Self = Self(1 << 3);
    /// Disaster recovery secondary
    pub const DR_SECONDARY: Self = Self(1 << 4);

    /// Combine two states
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether any of the bits in `other` are set
    pub const fn has_state(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

/// View of the host system around this mount.
pub trait SystemView: Send + Sync {
    /// Whether the mount is local to this cluster (not replicated)
    fn local_mount(&self) -> bool;

    /// Replication role of this node
    fn replication_state(&self) -> ReplicationState;

    /// Whether intent records written on this node may be replayed here.
    ///
    /// Replicated mounts on performance secondaries and standbys do not own
    /// the keys their storage mentions.
    fn has_write_authority(&self) -> bool {
        self.local_mount()
            || !self.replication_state().has_state(
                ReplicationState::PERFORMANCE_SECONDARY.with(ReplicationState::PERFORMANCE_STANDBY),
            )
    }
}

/// Fixed [`SystemView`] for standalone hosts and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSystemView {
    /// Value returned by [`SystemView::local_mount`]
    pub local_mount: bool,
    /// Value returned by [`SystemView::replication_state`]
    pub replication_state: ReplicationState,
}

impl StaticSystemView {
    /// A replicated mount on a performance standby
    pub fn performance_standby() -> Self {
        Self {
            local_mount: false,
            replication_state: ReplicationState::PERFORMANCE_STANDBY,
        }
    }
}

impl SystemView for StaticSystemView {
    fn local_mount(&self) -> bool {
        self.local_mount
    }

    fn replication_state(&self) -> ReplicationState {
        self.replication_state
    }
}
