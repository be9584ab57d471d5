//! Role definitions
//!
//! A role names the permission, database and extra data of the keys issued
//! under it. Roles are stored at `role/<name>` and guarded by one lock shared
//! by every role, independent of the client cache lock.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{BackendError, Phase, Result};
use crate::host::{self, Storage};
use crate::issuer::KeyRole;

/// Storage prefix of role records
pub const ROLE_PREFIX: &str = "role/";

/// Errors from parsing [`ExtraData`]
#[derive(Debug, Error)]
pub enum ExtraDataError {
    /// Input is not valid JSON
    #[error("cannot parse extra: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Input is valid JSON but not an object
    #[error("extra must be a JSON object")]
    NotAnObject,
}

/// Extra data attached to every key minted under a role.
///
/// Always a compact JSON object; parsed into fields at the point of use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExtraData(String);

impl ExtraData {
    /// Validate and compact `raw`
    ///
    /// # Examples
    ///
    /// ```
    /// use faunakeys_engine::ExtraData;
    ///
    /// let extra = ExtraData::parse(r#"{ "team" : "platform" }"#).unwrap();
    /// assert_eq!(extra.as_str(), r#"{"team":"platform"}"#);
    /// assert!(ExtraData::parse("[1, 2]").is_err());
    /// ```
    pub fn parse(raw: &str) -> std::result::Result<Self, ExtraDataError> {
        match serde_json::from_str::<Value>(raw)? {
            value @ Value::Object(_) => Ok(Self(value.to_string())),
            _ => Err(ExtraDataError::NotAnObject),
        }
    }

    /// Compact JSON text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parsed fields
    pub fn fields(&self) -> Map<String, Value> {
        match serde_json::from_str(&self.0) {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        }
    }
}

impl TryFrom<String> for ExtraData {
    type Error = ExtraDataError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ExtraData> for String {
    fn from(value: ExtraData) -> Self {
        value.0
    }
}

impl fmt::Display for ExtraData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Permission role of issued keys: `server`, `admin`, `client` or
    /// `roles/<custom>`
    #[serde(default)]
    pub key_role: String,

    /// Database issued keys are scoped to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Data attached to issued keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<ExtraData>,
}

impl RoleEntry {
    /// Parsed permission role
    pub fn key_role(&self) -> KeyRole {
        KeyRole::parse(&self.key_role)
    }

    /// Fields shown on read; absent values render as empty strings
    pub fn to_response_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("key_role".into(), Value::String(self.key_role.clone()));
        data.insert(
            "database".into(),
            Value::String(self.database.clone().unwrap_or_default()),
        );
        data.insert(
            "extra".into(),
            Value::String(self.extra.as_ref().map(ToString::to_string).unwrap_or_default()),
        );
        data
    }

    /// Apply `update`, touching only the fields it carries.
    pub fn apply(&mut self, update: RoleUpdate) -> std::result::Result<(), ExtraDataError> {
        if let Some(key_role) = update.key_role {
            self.key_role = key_role;
        }
        if let Some(database) = update.database {
            self.database = (!database.is_empty()).then_some(database);
        }
        if let Some(extra) = update.extra {
            self.extra = if extra.is_empty() {
                None
            } else {
                Some(ExtraData::parse(&extra)?)
            };
        }
        Ok(())
    }
}

/// Partial role update; `None` leaves a field as it is, an empty string
/// clears `database` or `extra`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleUpdate {
    /// New permission role
    pub key_role: Option<String>,
    /// New database
    pub database: Option<String>,
    /// New extra data as JSON text
    pub extra: Option<String>,
}

impl RoleUpdate {
    /// Set `key_role` (builder pattern)
    pub fn key_role(mut self, key_role: impl Into<String>) -> Self {
        self.key_role = Some(key_role.into());
        self
    }

    /// Set `database` (builder pattern)
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set `extra` (builder pattern)
    pub fn extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }
}

/// Role records in host storage
pub struct RoleStore {
    storage: Arc<dyn Storage>,
    lock: RwLock<()>,
}

fn role_path(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(BackendError::InvalidRequest("missing role name".into()));
    }
    Ok(format!("{ROLE_PREFIX}{name}"))
}

impl RoleStore {
    /// Create a store over `storage`
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            lock: RwLock::new(()),
        }
    }

    /// Names of every role
    pub async fn list(&self) -> Result<Vec<String>> {
        let _guard = self.lock.read().await;
        self.storage
            .list(ROLE_PREFIX)
            .await
            .map_err(BackendError::bookkeeping(Phase::ListRoles))
    }

    /// Read a role, `None` if it does not exist
    pub async fn read(&self, name: &str) -> Result<Option<RoleEntry>> {
        let path = role_path(name)?;
        let _guard = self.lock.read().await;
        host::read_json(self.storage.as_ref(), &path)
            .await
            .map_err(BackendError::bookkeeping(Phase::ReadRole))
    }

    /// Create or partially update a role and return the stored result.
    ///
    /// Read, merge and write happen under one exclusive hold, so concurrent
    /// partial updates to disjoint fields both land.
    pub async fn write(&self, name: &str, update: RoleUpdate) -> Result<RoleEntry> {
        let path = role_path(name)?;
        let _guard = self.lock.write().await;

        let mut entry: RoleEntry = host::read_json(self.storage.as_ref(), &path)
            .await
            .map_err(BackendError::bookkeeping(Phase::ReadRole))?
            .unwrap_or_default();

        entry
            .apply(update)
            .map_err(|e| BackendError::InvalidRequest(e.to_string()))?;

        host::write_json(self.storage.as_ref(), &path, &entry)
            .await
            .map_err(BackendError::bookkeeping(Phase::WriteRole))?;

        info!(role = %name, key_role = %entry.key_role, "Role written");
        Ok(entry)
    }

    /// Delete a role; deleting an absent role succeeds
    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = role_path(name)?;
        let _guard = self.lock.write().await;
        self.storage
            .delete(&path)
            .await
            .map_err(BackendError::bookkeeping(Phase::WriteRole))?;

        info!(role = %name, "Role deleted");
        Ok(())
    }
}

impl fmt::Debug for RoleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryStorage;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn store() -> RoleStore {
        RoleStore::new(Arc::new(MemoryStorage::new()))
    }

    #[tokio::test]
    async fn test_partial_update_preserves_other_fields() {
        let roles = store();
        roles
            .write(
                "deploy",
                RoleUpdate::default()
                    .key_role("server")
                    .database("db1")
                    .extra(r#"{"team": "platform"}"#),
            )
            .await
            .unwrap();

        let entry = roles
            .write("deploy", RoleUpdate::default().key_role("admin"))
            .await
            .unwrap();

        assert_eq!(
            entry,
            RoleEntry {
                key_role: "admin".into(),
                database: Some("db1".into()),
                extra: Some(ExtraData::parse(r#"{"team":"platform"}"#).unwrap()),
            }
        );
        assert_eq!(roles.read("deploy").await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_empty_strings_clear_fields() {
        let roles = store();
        roles
            .write(
                "deploy",
                RoleUpdate::default()
                    .key_role("server")
                    .database("db1")
                    .extra(r#"{"a":1}"#),
            )
            .await
            .unwrap();

        let entry = roles
            .write("deploy", RoleUpdate::default().database("").extra(""))
            .await
            .unwrap();

        assert_eq!(entry.database, None);
        assert_eq!(entry.extra, None);
        assert_eq!(entry.key_role, "server");
    }

    #[rstest]
    #[case::not_json("{not json")]
    #[case::array("[1,2]")]
    #[case::scalar("42")]
    #[tokio::test]
    async fn test_invalid_extra_is_rejected_and_nothing_stored(#[case] extra: &str) {
        let roles = store();
        let err = roles
            .write("deploy", RoleUpdate::default().key_role("server").extra(extra))
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::InvalidRequest(_)), "{err}");
        assert!(roles.read("deploy").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let roles = store();
        for name in ["b", "a"] {
            roles
                .write(name, RoleUpdate::default().key_role("server"))
                .await
                .unwrap();
        }
        assert_eq!(roles.list().await.unwrap(), vec!["a", "b"]);

        roles.delete("a").await.unwrap();
        roles.delete("a").await.unwrap();
        assert_eq!(roles.list().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_empty_name_is_invalid() {
        let roles = store();
        assert!(matches!(
            roles.read("").await,
            Err(BackendError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_response_data_renders_absent_as_empty() {
        let entry = RoleEntry {
            key_role: "roles/reader".into(),
            ..Default::default()
        };
        let data = entry.to_response_data();
        assert_eq!(data["database"], "");
        assert_eq!(data["extra"], "");
        assert_eq!(entry.key_role(), KeyRole::Custom("reader".into()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_disjoint_updates_both_land() {
        let roles = Arc::new(store());
        roles
            .write("deploy", RoleUpdate::default().key_role("server"))
            .await
            .unwrap();

        let a = {
            let roles = Arc::clone(&roles);
            tokio::spawn(async move {
                roles
                    .write("deploy", RoleUpdate::default().database("db1"))
                    .await
            })
        };
        let b = {
            let roles = Arc::clone(&roles);
            tokio::spawn(async move {
                roles
                    .write("deploy", RoleUpdate::default().extra(r#"{"x":true}"#))
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let entry = roles.read("deploy").await.unwrap().unwrap();
        assert_eq!(entry.key_role, "server");
        assert_eq!(entry.database.as_deref(), Some("db1"));
        assert_eq!(entry.extra.unwrap().as_str(), r#"{"x":true}"#);
    }

    #[tokio::test]
    async fn test_database_only_update_keeps_role_and_extra() {
        // GIVEN: A role with key_role and extra set
        let roles = store();
        roles
            .write(
                "deploy",
                RoleUpdate::default()
                    .key_role("server")
                    .extra(r#"{"team": "platform"}"#),
            )
            .await
            .unwrap();

        // WHEN: Only database is written
        roles
            .write("deploy", RoleUpdate::default().database("db2"))
            .await
            .unwrap();

        // THEN: key_role and extra are unchanged
        let entry = roles.read("deploy").await.unwrap().unwrap();
        assert_eq!(entry.key_role, "server");
        assert_eq!(entry.database.as_deref(), Some("db2"));
        assert_eq!(entry.extra.unwrap().as_str(), r#"{"team":"platform"}"#);
    }
}
