//! Crash-safe key creation, renewal and revocation
//!
//! Every mint runs the same three steps:
//!
//! 1. write an intent record naming the key by its correlation hash,
//! 2. create the key remotely,
//! 3. delete the intent record.
//!
//! A failure or crash anywhere after step 1 leaves the record behind, and
//! replay deletes whatever key the hash resolves to. The secret is only handed
//! out once step 3 succeeded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::client_cache::IssuerHandle;
use crate::config::LeaseConfig;
use crate::context::RequestContext;
use crate::error::{BackendError, Phase, Result};
use crate::issuer::{CreateKeyRequest, IssuedKey, KeyLocator, correlation_hash};
use crate::paths::Response;
use crate::roles::RoleEntry;
use crate::secret::{FAUNA_KEY_SECRET_TYPE, SecretLease, SecretValue};
use crate::wal::{self, KEY_WAL_KIND};

/// Internal-data field of a lease holding the key locator
pub const LOCATOR_FIELD: &str = "locator";

/// Payload of a `key` intent record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyIntent {
    /// Correlation token the key is created with
    pub name: String,
    /// How replay finds the key
    pub locator: KeyLocator,
}

impl KeyIntent {
    /// Intent for a key created with `token`
    pub fn for_token(token: &str) -> Self {
        Self {
            name: token.to_string(),
            locator: KeyLocator::CorrelationHash(correlation_hash(token)),
        }
    }
}

/// A freshly issued key
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    /// Secret handed to the caller
    pub secret: SecretValue,
    /// Caller-invisible identification used to revoke the key
    pub locator: KeyLocator,
    /// Lease terms, zero for host defaults
    pub lease: LeaseConfig,
}

impl IssuedCredential {
    /// Lease the host tracks for this key
    pub fn to_lease(&self) -> SecretLease {
        let mut internal_data = Map::new();
        internal_data.insert(
            LOCATOR_FIELD.to_string(),
            serde_json::to_value(&self.locator).unwrap_or(Value::Null),
        );

        let mut lease = SecretLease::fauna_key(internal_data);
        lease.ttl = self.lease.ttl;
        lease.max_ttl = self.lease.max_ttl;
        lease
    }

    /// Render as a host response: the secret in `data`, the lease alongside
    pub fn into_response(self) -> Response {
        let lease = self.to_lease();
        let mut data = Map::new();
        data.insert(
            "secret".into(),
            Value::String(self.secret.expose().to_string()),
        );
        Response {
            data,
            secret: Some(lease),
        }
    }
}

/// Keep characters that are safe in key names, replacing the rest.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Correlation token for a key issued under `role` to `display_name`.
///
/// The trailing UUID makes every token, and so every correlation hash, name
/// exactly one key even when the same caller issues many keys per second.
pub fn correlation_token(
    prefix: &str,
    display_name: &str,
    role: &str,
    now: DateTime<Utc>,
) -> String {
    format!(
        "{prefix}-{}-{}-{}-{}",
        sanitize(display_name),
        sanitize(role),
        now.timestamp(),
        Uuid::new_v4().simple()
    )
}

/// Correlation token for a rotated root key
pub fn root_rotation_token(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{prefix}-root-{}-{}", now.timestamp(), Uuid::new_v4().simple())
}

impl Backend {
    /// Mint a key behind an intent record.
    ///
    /// Shared by issuance and root rotation. On error the intent record is
    /// left in place unless the error happened while writing it.
    pub(crate) async fn mint_with_intent(
        &self,
        ctx: &RequestContext,
        client: &IssuerHandle,
        request: CreateKeyRequest,
        token: &str,
    ) -> Result<IssuedKey> {
        let intent = KeyIntent::for_token(token);
        let wal_id = wal::put_wal(self.storage.as_ref(), KEY_WAL_KIND, &intent)
            .await
            .map_err(BackendError::bookkeeping(Phase::WriteIntent))?;

        debug!(wal_id = %wal_id, locator = %intent.locator, "Intent recorded");

        let key = match ctx.bounded(Phase::Mint, client.create_key(&request)).await {
            Ok(Ok(key)) => key,
            Ok(Err(source)) => {
                warn!(wal_id = %wal_id, error = %source, "Key creation failed, intent left for replay");
                return Err(BackendError::RemoteIssuer {
                    phase: Phase::Mint,
                    source,
                });
            }
            Err(e) => {
                warn!(wal_id = %wal_id, "Key creation timed out, intent left for replay");
                return Err(e);
            }
        };

        wal::delete_wal(self.storage.as_ref(), &wal_id)
            .await
            .map_err(|source| {
                warn!(
                    wal_id = %wal_id,
                    reference = %key.reference,
                    "Intent could not be cleared, withholding secret"
                );
                BackendError::Bookkeeping {
                    phase: Phase::ClearIntent,
                    source,
                }
            })?;

        Ok(key)
    }

    /// Issue a key for `role`.
    ///
    /// Fails with [`BackendError::Configuration`] before anything is written
    /// when no root secret is configured.
    pub async fn create_key(
        &self,
        ctx: &RequestContext,
        role_name: &str,
        role: &RoleEntry,
    ) -> Result<IssuedCredential> {
        let client = self.clients.get(self.storage.as_ref()).await?;
        if !client.is_authenticated() {
            return Err(BackendError::Configuration(
                "root credentials are not configured".into(),
            ));
        }
        if role.key_role.is_empty() {
            return Err(BackendError::InvalidRequest(format!(
                "role '{role_name}' has no key_role"
            )));
        }

        let lease = self.lease_policy().await?;

        let token = correlation_token(
            &self.config.key_name_prefix,
            &ctx.display_name,
            role_name,
            ctx.timestamp,
        );
        let request = CreateKeyRequest::new(
            role.key_role(),
            role.database.clone(),
            role.extra.as_ref().map(|extra| extra.fields()),
            &token,
        );

        let key = self.mint_with_intent(ctx, &client, request, &token).await?;

        info!(
            trace_id = %ctx.trace_id,
            role = %role_name,
            reference = %key.reference,
            "Key issued"
        );

        Ok(IssuedCredential {
            secret: key.secret,
            locator: KeyLocator::Reference(key.reference),
            lease,
        })
    }

    /// Re-apply the current lease policy to `lease`. No remote call is made.
    pub async fn renew_secret(
        &self,
        _ctx: &RequestContext,
        lease: &SecretLease,
    ) -> Result<SecretLease> {
        check_secret_type(lease)?;
        let policy = self.lease_policy().await?;

        let mut renewed = lease.clone();
        renewed.ttl = policy.ttl;
        renewed.max_ttl = policy.max_ttl;
        Ok(renewed)
    }

    /// Delete the key behind `lease`. A key that is already gone counts as
    /// revoked.
    pub async fn revoke_secret(&self, ctx: &RequestContext, lease: &SecretLease) -> Result<()> {
        check_secret_type(lease)?;
        let locator: KeyLocator = lease
            .internal_data
            .get(LOCATOR_FIELD)
            .cloned()
            .ok_or_else(|| {
                BackendError::InvalidRequest("secret is missing locator internal data".into())
            })
            .and_then(|raw| {
                serde_json::from_value(raw).map_err(|e| {
                    BackendError::InvalidRequest(format!("malformed locator internal data: {e}"))
                })
            })?;

        self.delete_remote_key(ctx, &locator, Phase::Revoke).await
    }

    async fn lease_policy(&self) -> Result<LeaseConfig> {
        Ok(LeaseConfig::load(self.storage.as_ref())
            .await
            .map_err(BackendError::bookkeeping(Phase::ReadLease))?
            .unwrap_or_default())
    }
}

fn check_secret_type(lease: &SecretLease) -> Result<()> {
    if lease.secret_type == FAUNA_KEY_SECRET_TYPE {
        Ok(())
    } else {
        Err(BackendError::InvalidRequest(format!(
            "unexpected secret type '{}'",
            lease.secret_type
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::host::MemoryStorage;
    use crate::issuer::{
        ClientSettings, IssuerConnector, IssuerError, KeyIssuer, KeyRole, MockKeyIssuer,
    };
    use crate::wal::list_wal;
    use pretty_assertions::assert_eq;

    struct MockConnector(Arc<MockKeyIssuer>);

    impl IssuerConnector for MockConnector {
        fn connect(&self, _: &ClientSettings) -> std::result::Result<Arc<dyn KeyIssuer>, IssuerError> {
            Ok(self.0.clone())
        }
    }

    async fn backend_with(mock: MockKeyIssuer) -> (Backend, MemoryStorage) {
        let storage = MemoryStorage::new();
        crate::config::RootConfig::new("root")
            .store(&storage)
            .await
            .unwrap();
        let backend = Backend::builder()
            .storage(Arc::new(storage.clone()))
            .connector(Arc::new(MockConnector(Arc::new(mock))))
            .build()
            .unwrap();
        (backend, storage)
    }

    fn server_role() -> RoleEntry {
        RoleEntry {
            key_role: "server".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_correlation_token_shape() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let token = correlation_token("lease", "token user/1", "deploy", now);

        let parts: Vec<&str> = token.split('-').collect();
        assert_eq!(&parts[..4], &["lease", "token_user_1", "deploy", "1700000000"]);
        assert_eq!(parts[4].len(), 32);
        assert!(parts[4].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_in_the_same_second_hash_differently() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();

        let first = correlation_token("lease", "tester", "deploy", now);
        let second = correlation_token("lease", "tester", "deploy", now);
        assert_ne!(correlation_hash(&first), correlation_hash(&second));

        let first = root_rotation_token("lease", now);
        let second = root_rotation_token("lease", now);
        assert!(first.starts_with("lease-root-1700000000-"));
        assert_ne!(correlation_hash(&first), correlation_hash(&second));
    }

    #[tokio::test]
    async fn test_create_key_sends_correlation_data_and_clears_intent() {
        let mut mock = MockKeyIssuer::new();
        mock.expect_create_key()
            .withf(|request| {
                request.role == KeyRole::Builtin("server".into())
                    && request.data.contains_key("name")
                    && request.data.contains_key("correlation_hash")
            })
            .times(1)
            .returning(|_| {
                Ok(IssuedKey {
                    secret: SecretValue::new("fnAEissued"),
                    reference: "301".into(),
                })
            });

        let (backend, storage) = backend_with(mock).await;
        let issued = backend
            .create_key(&RequestContext::new("alice"), "deploy", &server_role())
            .await
            .unwrap();

        assert_eq!(issued.secret.expose(), "fnAEissued");
        assert_eq!(issued.locator, KeyLocator::Reference("301".into()));
        assert!(list_wal(&storage).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_intent() {
        let mut mock = MockKeyIssuer::new();
        mock.expect_create_key()
            .times(1)
            .returning(|_| Err(IssuerError::Unavailable("overloaded".into())));

        let (backend, storage) = backend_with(mock).await;
        let err = backend
            .create_key(&RequestContext::new("alice"), "deploy", &server_role())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BackendError::RemoteIssuer {
                phase: Phase::Mint,
                ..
            }
        ));
        assert_eq!(list_wal(&storage).await.unwrap().len(), 1);
    }

    #[test]
    fn test_lease_carries_reference_locator() {
        let issued = IssuedCredential {
            secret: SecretValue::new("s"),
            locator: KeyLocator::Reference("42".into()),
            lease: LeaseConfig::new(
                std::time::Duration::from_secs(60),
                std::time::Duration::from_secs(120),
            ),
        };

        let response = issued.into_response();
        let lease = response.secret.unwrap();
        assert_eq!(lease.internal_data[LOCATOR_FIELD], serde_json::json!({"reference": "42"}));
        assert_eq!(lease.ttl.as_secs(), 60);
        assert_eq!(response.data["secret"], "s");
    }
}
