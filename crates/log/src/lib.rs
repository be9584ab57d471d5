//! # faunakeys-log
//!
//! Structured logging setup shared by the faunakeys binaries. Library crates
//! only emit `tracing` events; a binary picks a [`Config`] and installs the
//! subscriber once at startup.
//!
//! ```no_run
//! fn main() -> Result<(), faunakeys_log::LogError> {
//!     faunakeys_log::init()?;
//!     tracing::info!(mount = "fauna/", "Backend ready");
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod builder;
mod config;

pub use builder::LoggerBuilder;
pub use config::{Config, DisplayConfig, Format, LOG_ENV, LOG_FORMAT_ENV};

/// Logger setup errors
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Filter directives did not parse
    #[error("Invalid log filter '{directives}': {reason}")]
    Filter {
        /// Directives as given
        directives: String,
        /// Parser message
        reason: String,
    },

    /// A global subscriber was already installed
    #[error("Logger already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Result type for logger operations
pub type LogResult<T> = Result<T, LogError>;

/// Initialize from environment variables
pub fn init() -> LogResult<()> {
    init_with(Config::from_env())
}

/// Initialize with explicit configuration
pub fn init_with(config: Config) -> LogResult<()> {
    LoggerBuilder::from_config(config).build()
}
