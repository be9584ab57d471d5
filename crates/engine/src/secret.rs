//! Lease-bound secret types

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use zeroize::Zeroizing;

/// Secret type name under which issued keys are leased by the host
pub const FAUNA_KEY_SECRET_TYPE: &str = "fauna_key";

/// A secret string that redacts its contents in Debug and Display and is
/// zeroed on drop.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretValue(Zeroizing<String>);

impl SecretValue {
    /// Wrap a secret
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Access the underlying value
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// Whether the secret is the empty string
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl From<String> for SecretValue {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for SecretValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Lease attached to a secret handed out through the host.
///
/// `internal_data` is never shown to the caller; the host hands it back on
/// renew and revoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretLease {
    /// Registered secret type, [`FAUNA_KEY_SECRET_TYPE`] for issued keys
    pub secret_type: String,

    /// Caller-invisible data needed to revoke the secret
    #[serde(default)]
    pub internal_data: Map<String, Value>,

    /// Lease duration, zero for the host default
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Upper bound across renewals, zero for the host default
    #[serde(with = "humantime_serde")]
    pub max_ttl: Duration,
}

impl SecretLease {
    /// Lease of the issued-key secret type
    pub fn fauna_key(internal_data: Map<String, Value>) -> Self {
        Self {
            secret_type: FAUNA_KEY_SECRET_TYPE.to_string(),
            internal_data,
            ttl: Duration::ZERO,
            max_ttl: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_value_redacts() {
        let secret = SecretValue::new("fnAEsecret");
        assert_eq!(format!("{secret:?}"), "SecretValue(***)");
        assert_eq!(secret.to_string(), "***");
        assert_eq!(secret.expose(), "fnAEsecret");
    }

    #[test]
    fn test_secret_lease_serializes_durations_as_text() {
        let mut lease = SecretLease::fauna_key(Map::new());
        lease.ttl = Duration::from_secs(3600);

        let json = serde_json::to_value(&lease).unwrap();
        assert_eq!(json["ttl"], "1h");
        assert_eq!(json["secret_type"], FAUNA_KEY_SECRET_TYPE);

        let back: SecretLease = serde_json::from_value(json).unwrap();
        assert_eq!(back, lease);
    }
}
