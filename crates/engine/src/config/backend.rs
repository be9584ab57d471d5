use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::ConfigError;
use crate::issuer::fauna::DEFAULT_ENDPOINT;

/// Settings fixed for the lifetime of a [`Backend`](crate::Backend)
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use faunakeys_engine::BackendConfig;
///
/// let config = BackendConfig {
///     rollback_min_age: Duration::from_secs(30),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Intent records younger than this are skipped by the rollback sweep,
    /// so an in-flight mint is never replayed under its own feet
    #[serde(with = "humantime_serde")]
    pub rollback_min_age: Duration,

    /// Issuer endpoint used when root configuration names none
    pub default_endpoint: String,

    /// Leading segment of every correlation token
    pub key_name_prefix: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            rollback_min_age: Duration::from_secs(1),
            default_endpoint: DEFAULT_ENDPOINT.to_string(),
            key_name_prefix: "lease".to_string(),
        }
    }
}

impl BackendConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rollback_min_age.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "rollback_min_age".into(),
                reason: "must be greater than zero".into(),
            });
        }

        let endpoint = Url::parse(&self.default_endpoint).map_err(|e| ConfigError::InvalidValue {
            field: "default_endpoint".into(),
            reason: e.to_string(),
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                field: "default_endpoint".into(),
                reason: format!("unsupported scheme '{}'", endpoint.scheme()),
            });
        }

        if self.key_name_prefix.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "key_name_prefix".into(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = BackendConfig::default();
        assert_eq!(config.rollback_min_age, Duration::from_secs(1));
        assert_eq!(config.default_endpoint, "https://db.fauna.com");
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case::zero_age(BackendConfig { rollback_min_age: Duration::ZERO, ..Default::default() })]
    #[case::bad_scheme(BackendConfig { default_endpoint: "ftp://db".into(), ..Default::default() })]
    #[case::not_a_url(BackendConfig { default_endpoint: "db.fauna.com".into(), ..Default::default() })]
    #[case::empty_prefix(BackendConfig { key_name_prefix: String::new(), ..Default::default() })]
    fn test_invalid_config(#[case] config: BackendConfig) {
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: BackendConfig =
            serde_json::from_value(serde_json::json!({"rollback_min_age": "5m"})).unwrap();
        assert_eq!(config.rollback_min_age, Duration::from_secs(300));
        assert_eq!(config.key_name_prefix, "lease");
    }
}
