//! Storage-backed write-ahead log
//!
//! Entries live at `wal/<uuid>` as `{"kind", "data", "created_at"}`. The
//! engine writes one before every remote mint and deletes it once the mint
//! succeeded; anything left behind is replayed by
//! [`Backend::rollback_sweep`](crate::Backend::rollback_sweep).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::host::{self, Storage, StorageError};

/// Storage prefix of intent records
pub const WAL_PREFIX: &str = "wal/";

/// Intent kind for minted keys
pub const KEY_WAL_KIND: &str = "key";

/// A stored intent record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Dispatch kind for replay
    pub kind: String,
    /// Kind-specific payload
    pub data: Value,
    /// Unix seconds at which the record was written
    pub created_at: i64,
}

impl WalEntry {
    /// Time elapsed between creation and `now`, zero if `now` is earlier.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        let secs = now.timestamp().saturating_sub(self.created_at);
        Duration::from_secs(u64::try_from(secs).unwrap_or(0))
    }
}

fn wal_path(id: &str) -> String {
    format!("{WAL_PREFIX}{id}")
}

/// Write a new intent record and return its id.
pub async fn put_wal<T: Serialize + ?Sized>(
    storage: &dyn Storage,
    kind: &str,
    data: &T,
) -> Result<String, StorageError> {
    let id = Uuid::new_v4().to_string();
    let path = wal_path(&id);

    let data = serde_json::to_value(data).map_err(|source| StorageError::Codec {
        path: path.clone(),
        source,
    })?;
    let entry = WalEntry {
        kind: kind.to_string(),
        data,
        created_at: Utc::now().timestamp(),
    };

    host::write_json(storage, &path, &entry).await?;
    Ok(id)
}

/// Read an intent record, `None` if it was already deleted.
pub async fn get_wal(storage: &dyn Storage, id: &str) -> Result<Option<WalEntry>, StorageError> {
    host::read_json(storage, &wal_path(id)).await
}

/// Delete an intent record; deleting an absent record succeeds.
pub async fn delete_wal(storage: &dyn Storage, id: &str) -> Result<(), StorageError> {
    storage.delete(&wal_path(id)).await
}

/// Ids of every stored intent record.
pub async fn list_wal(storage: &dyn Storage) -> Result<Vec<String>, StorageError> {
    let mut ids = storage.list(WAL_PREFIX).await?;
    ids.retain(|id| !id.ends_with('/'));
    Ok(ids)
}
