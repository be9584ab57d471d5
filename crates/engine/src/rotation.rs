//! Root key rotation
//!
//! The new root key is minted and persisted before the old one is deleted, so
//! the mount holds at least one valid root key at every instant and the stored
//! root configuration never names a key that does not exist. The whole
//! sequence runs under the client cache's exclusive lock.

use chrono::Utc;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::config::RootConfig;
use crate::context::RequestContext;
use crate::error::{BackendError, Phase, Result};
use crate::issuer::{CreateKeyRequest, KeyRole};
use crate::provisioning::root_rotation_token;

impl Backend {
    /// Replace the root key with a freshly minted admin key.
    ///
    /// If the old key cannot be deleted the rotation still stands and
    /// [`BackendError::OrphanCleanup`] is returned. A deadline hit while
    /// deleting it likewise keeps the rotation and surfaces as
    /// [`BackendError::DeadlineExceeded`] for [`Phase::RetireRootKey`].
    pub async fn rotate_root(&self, ctx: &RequestContext) -> Result<()> {
        // built from the current root config, before we take the lock ourselves
        let client = self.clients.get(self.storage.as_ref()).await?;

        let mut guard = self.clients.lock_exclusive().await;

        let current = RootConfig::load(self.storage.as_ref())
            .await
            .map_err(BackendError::bookkeeping(Phase::ReadRootConfig))?
            .filter(|root| !root.secret.is_empty())
            .ok_or_else(|| {
                BackendError::Configuration("cannot rotate root when no secret is configured".into())
            })?;

        let token = root_rotation_token(&self.config.key_name_prefix, Utc::now());
        let request = CreateKeyRequest::new(KeyRole::admin(), None, None, &token);
        let new_key = self.mint_with_intent(ctx, &client, request, &token).await?;

        let rotated = RootConfig {
            secret: new_key.secret.clone(),
            endpoint: current.endpoint.clone(),
        };
        if let Err(source) = rotated.store(self.storage.as_ref()).await {
            // the old key is still the stored root; take the new one back
            let cleanup = ctx
                .bounded(Phase::WriteRootConfig, client.delete_key(&new_key.reference))
                .await;
            if !matches!(cleanup, Ok(Ok(()))) {
                warn!(
                    reference = %new_key.reference,
                    "New root key could not be deleted after failed config write"
                );
            }
            return Err(BackendError::Bookkeeping {
                phase: Phase::WriteRootConfig,
                source,
            });
        }

        guard.invalidate();
        info!(trace_id = %ctx.trace_id, reference = %new_key.reference, "Root key rotated");

        let retired = ctx
            .bounded(Phase::RetireRootKey, client.delete_key_by_secret(&current.secret))
            .await?;

        match retired {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(source) => {
                warn!(error = %source, "Previous root key could not be deleted");
                Err(BackendError::OrphanCleanup {
                    key: "previous root key".into(),
                    source,
                })
            }
        }
    }
}
