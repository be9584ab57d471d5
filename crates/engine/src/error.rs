//! Error types for backend operations
//!
//! Errors fall into four families:
//! - [`BackendError::Configuration`]: missing or invalid root secret, bad
//!   backend settings. Surfaced, never retried.
//! - [`BackendError::RemoteIssuer`]: network, auth or quota failure from the
//!   key issuer. Any intent record already written survives for replay.
//! - [`BackendError::Bookkeeping`]: storage failure around intent, role or
//!   config records. After a successful mint this is fatal to the call: the
//!   secret is withheld and replay deletes the key.
//! - [`BackendError::OrphanCleanup`]: a remote key could not be deleted during
//!   revoke, replay or rotation. The next replay sweep or revoke retry is the
//!   recovery path.
//!
//! Only "not found" on a delete path is ever downgraded to success.

use std::fmt;

use thiserror::Error;

use crate::host::StorageError;
use crate::issuer::IssuerError;
use crate::paths::Operation;

/// Step of a protocol that failed, carried in errors for diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Building the issuer client from root configuration
    Connect,
    /// Reading root configuration
    ReadRootConfig,
    /// Writing root configuration
    WriteRootConfig,
    /// Reading the lease policy
    ReadLease,
    /// Writing the lease policy
    WriteLease,
    /// Reading a role record
    ReadRole,
    /// Writing or deleting a role record
    WriteRole,
    /// Listing role records
    ListRoles,
    /// Writing the write-ahead intent record
    WriteIntent,
    /// Calling the issuer to create a key
    Mint,
    /// Deleting the write-ahead intent record
    ClearIntent,
    /// Replaying an intent record
    Rollback,
    /// Revoking a leased key
    Revoke,
    /// Retiring the previous root key
    RetireRootKey,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Connect => "connect",
            Phase::ReadRootConfig => "read root config",
            Phase::WriteRootConfig => "write root config",
            Phase::ReadLease => "read lease",
            Phase::WriteLease => "write lease",
            Phase::ReadRole => "read role",
            Phase::WriteRole => "write role",
            Phase::ListRoles => "list roles",
            Phase::WriteIntent => "write intent",
            Phase::Mint => "mint",
            Phase::ClearIntent => "clear intent",
            Phase::Rollback => "rollback",
            Phase::Revoke => "revoke",
            Phase::RetireRootKey => "retire root key",
        };
        f.write_str(name)
    }
}

/// Top-level backend error
#[derive(Debug, Error)]
pub enum BackendError {
    /// Root secret missing or backend settings invalid
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The remote issuer rejected or failed a call
    #[error("key issuer failed during {phase}: {source}")]
    RemoteIssuer {
        /// Step that made the call
        phase: Phase,
        /// Underlying issuer error
        #[source]
        source: IssuerError,
    },

    /// Local storage failed around intent, role or config records
    #[error("bookkeeping failed during {phase}: {source}")]
    Bookkeeping {
        /// Step that touched storage
        phase: Phase,
        /// Underlying storage error
        #[source]
        source: StorageError,
    },

    /// A remote key could not be deleted and is left behind
    #[error("failed to delete remote key {key}: {source}")]
    OrphanCleanup {
        /// Human-readable identification of the key
        key: String,
        /// Underlying issuer error
        #[source]
        source: IssuerError,
    },

    /// The request deadline passed before the step finished
    #[error("deadline exceeded during {phase}")]
    DeadlineExceeded {
        /// Step that was cut short
        phase: Phase,
    },

    /// Malformed request input
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Issuance requested for a role that does not exist
    #[error("role '{0}' not found")]
    RoleNotFound(String),

    /// No endpoint handles this operation on this path
    #[error("unsupported operation {operation} on path '{path}'")]
    UnsupportedOperation {
        /// Requested operation
        operation: Operation,
        /// Requested path
        path: String,
    },

    /// The host asked to replay an intent kind this backend never writes
    #[error("unknown rollback kind '{0}'")]
    UnknownRollbackKind(String),
}

impl BackendError {
    pub(crate) fn bookkeeping(phase: Phase) -> impl FnOnce(StorageError) -> Self {
        move |source| Self::Bookkeeping { phase, source }
    }

    pub(crate) fn remote(phase: Phase) -> impl FnOnce(IssuerError) -> Self {
        move |source| Self::RemoteIssuer { phase, source }
    }

    /// Whether the error was caused by the caller's input rather than by the
    /// backend, its storage or the issuer.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::InvalidRequest(_)
                | Self::RoleNotFound(_)
                | Self::UnsupportedOperation { .. }
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteIssuer { source, .. } | Self::OrphanCleanup { source, .. } => {
                source.is_retryable()
            }
            Self::Bookkeeping { .. } | Self::DeadlineExceeded { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bookkeeping_error_names_phase() {
        let err = BackendError::bookkeeping(Phase::ClearIntent)(StorageError::backend(
            "wal/abc",
            "disk full",
        ));

        let msg = err.to_string();
        assert!(msg.contains("clear intent"), "{msg}");
        assert!(!err.is_user_error());
    }

    #[test]
    fn test_user_errors() {
        assert!(BackendError::RoleNotFound("deploy".into()).is_user_error());
        assert!(BackendError::Configuration("no secret".into()).is_user_error());
        assert!(!BackendError::DeadlineExceeded { phase: Phase::Mint }.is_user_error());
    }

    #[test]
    fn test_retryable_follows_issuer_error() {
        let unavailable = BackendError::remote(Phase::Mint)(IssuerError::Unavailable("busy".into()));
        assert!(unavailable.is_retryable());

        let denied =
            BackendError::remote(Phase::Mint)(IssuerError::PermissionDenied("not admin".into()));
        assert!(!denied.is_retryable());

        assert!(!BackendError::InvalidRequest("bad".into()).is_retryable());
    }
}
