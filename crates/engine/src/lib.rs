//! faunakeys engine - leased Fauna keys for a secrets host
//!
//! The engine plugs into a secrets-management host that owns durable storage,
//! request routing and lease bookkeeping. It supplies the parts that must stay
//! correct when a remote call and a local write disagree:
//!
//! - **Provisioning** - every key is minted behind a write-ahead intent record,
//!   so a crash between "key exists remotely" and "lease recorded locally" is
//!   repaired by replay instead of leaking a key
//! - **Rotation** - the root key is replaced without ever leaving the mount
//!   with zero usable root keys
//! - **Client cache** - one lazily built issuer client per mount, dropped the
//!   moment the root configuration changes
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 Backend::handle_request()                    │
//! │   config/root · config/rotate-root · config/lease            │
//! │   roles/ · roles/<name> · <name>                             │
//! └──────────────────────────────────────────────────────────────┘
//!        │               │                  │
//! ┌──────▼─────┐  ┌──────▼───────┐  ┌───────▼────────┐
//! │ RoleStore  │  │ ClientCache  │  │ write-ahead log│
//! └────────────┘  └──────┬───────┘  └────────────────┘
//!                        │
//!               ┌────────▼─────────┐
//!               │  KeyIssuer       │  (FaunaClient over HTTP)
//!               └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use faunakeys_engine::prelude::*;
//! use faunakeys_engine::issuer::fauna::{FaunaConnector, FaunaConnectorConfig};
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let backend = Backend::builder()
//!     .storage(Arc::new(MemoryStorage::new()))
//!     .connector(Arc::new(FaunaConnector::new(FaunaConnectorConfig::default())?))
//!     .build()?;
//!
//! let ctx = RequestContext::new("deployer");
//! backend
//!     .handle_request(&ctx, Request::update("config/root").with("secret", "fnAE..."))
//!     .await?;
//! backend
//!     .handle_request(&ctx, Request::update("roles/deploy").with("key_role", "server"))
//!     .await?;
//!
//! let issued = backend.handle_request(&ctx, Request::read("deploy")).await?;
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

/// Mount service object and builder
pub mod backend;
/// Lazily built, invalidatable issuer client
pub mod client_cache;
/// Backend, root and lease configuration
pub mod config;
/// Request context carried through every operation
pub mod context;
/// Error taxonomy
pub mod error;
/// Interfaces consumed from the host
pub mod host;
/// Remote key issuer abstraction and the Fauna HTTP client
pub mod issuer;
/// Endpoint routing
pub mod paths;
/// Crash-safe key creation, renewal and revocation
pub mod provisioning;
/// Write-ahead log replay
pub mod recovery;
/// Role definitions
pub mod roles;
/// Root key rotation
pub mod rotation;
/// Lease-bound secret types
pub mod secret;
/// In-memory doubles for the remote issuer and failing storage
#[cfg(any(test, feature = "testing"))]
pub mod testing;
/// Storage-backed write-ahead log
pub mod wal;

pub use backend::{Backend, BackendBuilder};
pub use client_cache::{ClientCache, IssuerHandle};
pub use config::{BackendConfig, LeaseConfig, RootConfig};
pub use context::RequestContext;
pub use error::{BackendError, Phase, Result};
pub use host::{
    MemoryStorage, ReplicationState, StaticSystemView, Storage, StorageError, SystemView,
};
pub use issuer::{IssuerConnector, IssuerError, KeyIssuer, KeyLocator};
pub use paths::{Operation, Request, Response};
pub use provisioning::{IssuedCredential, KeyIntent};
pub use recovery::RollbackReport;
pub use roles::{ExtraData, RoleEntry, RoleStore, RoleUpdate};
pub use secret::{SecretLease, SecretValue};

/// Commonly used types and traits
pub mod prelude {
    pub use crate::backend::{Backend, BackendBuilder};
    pub use crate::config::{BackendConfig, LeaseConfig, RootConfig};
    pub use crate::context::RequestContext;
    pub use crate::error::{BackendError, Result};
    pub use crate::host::{MemoryStorage, Storage, SystemView};
    pub use crate::issuer::{IssuerConnector, KeyIssuer, KeyLocator};
    pub use crate::paths::{Operation, Request, Response};
    pub use crate::secret::{SecretLease, SecretValue};
}
