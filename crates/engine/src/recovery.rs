//! Write-ahead log replay
//!
//! Replaying an intent record deletes the key it names. Replay is idempotent:
//! a key that is already gone counts as deleted, so the same record can be
//! replayed after every crash until its deletion from storage sticks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::context::RequestContext;
use crate::error::{BackendError, Phase, Result};
use crate::issuer::KeyLocator;
use crate::provisioning::KeyIntent;
use crate::wal::{self, KEY_WAL_KIND};

/// Outcome of one [`Backend::rollback_sweep`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Records replayed and deleted
    pub replayed: usize,
    /// Records younger than the minimum rollback age, left for later
    pub skipped: usize,
    /// Records whose replay or deletion failed, left for the next sweep
    pub failed: usize,
}

impl Backend {
    /// Replay one intent record of `kind`.
    ///
    /// Does nothing on nodes without write authority over the mount.
    pub async fn wal_rollback(&self, ctx: &RequestContext, kind: &str, data: &Value) -> Result<()> {
        if !self.system.has_write_authority() {
            debug!(kind, "Skipping rollback on replica without write authority");
            return Ok(());
        }

        match kind {
            KEY_WAL_KIND => {
                let intent: KeyIntent = serde_json::from_value(data.clone()).map_err(|e| {
                    BackendError::InvalidRequest(format!("malformed key intent: {e}"))
                })?;
                debug!(name = %intent.name, locator = %intent.locator, "Replaying key intent");
                self.delete_remote_key(ctx, &intent.locator, Phase::Rollback)
                    .await
            }
            other => Err(BackendError::UnknownRollbackKind(other.to_string())),
        }
    }

    /// Delete the remote key `locator` names. "Not found" is success.
    pub(crate) async fn delete_remote_key(
        &self,
        ctx: &RequestContext,
        locator: &KeyLocator,
        phase: Phase,
    ) -> Result<()> {
        let client = self.clients.get(self.storage.as_ref()).await?;
        if !client.is_authenticated() {
            return Err(BackendError::Configuration(
                "root credentials are not configured".into(),
            ));
        }

        let outcome = ctx
            .bounded(phase, async {
                match locator {
                    KeyLocator::Reference(reference) => client.delete_key(reference).await,
                    KeyLocator::CorrelationHash(hash) => {
                        client.delete_key_by_correlation(hash).await
                    }
                }
            })
            .await?;

        match outcome {
            Ok(()) => {
                info!(locator = %locator, %phase, "Remote key deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(locator = %locator, %phase, "Remote key already gone");
                Ok(())
            }
            Err(source) => {
                warn!(locator = %locator, %phase, error = %source, "Remote key could not be deleted");
                Err(BackendError::OrphanCleanup {
                    key: locator.to_string(),
                    source,
                })
            }
        }
    }

    /// Replay every intent record older than the minimum rollback age.
    pub async fn rollback_sweep(&self) -> Result<RollbackReport> {
        self.rollback_sweep_at(Utc::now()).await
    }

    /// [`rollback_sweep`](Self::rollback_sweep) with an explicit clock.
    ///
    /// A record is deleted only after its replay succeeded. Failures are
    /// counted and the sweep moves on.
    pub async fn rollback_sweep_at(&self, now: DateTime<Utc>) -> Result<RollbackReport> {
        let mut report = RollbackReport::default();
        if !self.system.has_write_authority() {
            debug!("Skipping rollback sweep on replica without write authority");
            return Ok(report);
        }

        let ctx = RequestContext::system();
        let ids = wal::list_wal(self.storage.as_ref())
            .await
            .map_err(BackendError::bookkeeping(Phase::Rollback))?;

        for id in ids {
            let entry = match wal::get_wal(self.storage.as_ref(), &id).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    warn!(wal_id = %id, error = %e, "Unreadable intent record");
                    report.failed += 1;
                    continue;
                }
            };

            if entry.age(now) < self.config.rollback_min_age {
                report.skipped += 1;
                continue;
            }

            if let Err(e) = self.wal_rollback(&ctx, &entry.kind, &entry.data).await {
                warn!(wal_id = %id, kind = %entry.kind, error = %e, "Rollback failed");
                report.failed += 1;
                continue;
            }

            match wal::delete_wal(self.storage.as_ref(), &id).await {
                Ok(()) => report.replayed += 1,
                Err(e) => {
                    warn!(wal_id = %id, error = %e, "Replayed intent could not be deleted");
                    report.failed += 1;
                }
            }
        }

        if report != RollbackReport::default() {
            info!(
                replayed = report.replayed,
                skipped = report.skipped,
                failed = report.failed,
                "Rollback sweep finished"
            );
        }
        Ok(report)
    }
}
