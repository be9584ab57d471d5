//! Backend, root and lease configuration
//!
//! [`BackendConfig`] is fixed when the backend is built. [`RootConfig`] and
//! [`LeaseConfig`] live in host storage and change through the `config/*`
//! endpoints.

mod backend;
mod lease;
mod root;

pub use backend::BackendConfig;
pub use lease::{LEASE_CONFIG_PATH, LeaseConfig};
pub use root::{ROOT_CONFIG_PATH, RootConfig};

use thiserror::Error;

use crate::error::BackendError;

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for field '{field}': {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Missing required field
    #[error("Missing required configuration field: {field}")]
    MissingRequired {
        /// Field name
        field: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

impl From<ConfigError> for BackendError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
