//! Endpoint routing
//!
//! | Path                 | Operations            |
//! |----------------------|-----------------------|
//! | `config/root`        | read, update          |
//! | `config/rotate-root` | update                |
//! | `config/lease`       | read, update          |
//! | `roles/`             | list                  |
//! | `roles/<name>`       | read, update, delete  |
//! | `<name>`             | read, update (issue)  |

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::config::{LeaseConfig, RootConfig};
use crate::context::RequestContext;
use crate::error::{BackendError, Phase, Result};
use crate::roles::RoleUpdate;
use crate::secret::{SecretLease, SecretValue};

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\w(([\w\-.@]+)?\w)?$").expect("name pattern is a valid regex")
});

/// Whether `name` is a valid role name
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

/// Request operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Read a resource
    Read,
    /// Create or update a resource
    Update,
    /// Delete a resource
    Delete,
    /// List resources under a prefix
    List,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
        })
    }
}

/// A request routed by [`Backend::handle_request`]
///
/// # Examples
///
/// ```
/// use faunakeys_engine::{Operation, Request};
///
/// let request = Request::update("roles/deploy")
///     .with("key_role", "server")
///     .with("database", "db1");
/// assert_eq!(request.operation, Operation::Update);
/// assert_eq!(request.data["database"], "db1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Operation to perform
    pub operation: Operation,
    /// Path relative to the mount
    pub path: String,
    /// Request fields
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Request {
    /// Create a request without fields
    pub fn new(operation: Operation, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
            data: Map::new(),
        }
    }

    /// Read request
    pub fn read(path: impl Into<String>) -> Self {
        Self::new(Operation::Read, path)
    }

    /// Update request
    pub fn update(path: impl Into<String>) -> Self {
        Self::new(Operation::Update, path)
    }

    /// Delete request
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Operation::Delete, path)
    }

    /// List request
    pub fn list(path: impl Into<String>) -> Self {
        Self::new(Operation::List, path)
    }

    /// Add a field (builder pattern)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    fn str_field(&self, name: &str) -> Result<Option<String>> {
        match self.data.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(BackendError::InvalidRequest(format!(
                "field '{name}' must be a string, got {other}"
            ))),
        }
    }

    /// Integer seconds or a humantime string such as `"1h"`
    fn duration_field(&self, name: &str) -> Result<Option<Duration>> {
        match self.data.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(|secs| Some(Duration::from_secs(secs)))
                .ok_or_else(|| {
                    BackendError::InvalidRequest(format!(
                        "field '{name}' must be a non-negative number of seconds"
                    ))
                }),
            Some(Value::String(s)) => {
                if let Ok(secs) = s.parse::<u64>() {
                    return Ok(Some(Duration::from_secs(secs)));
                }
                humantime_serde::re::humantime::parse_duration(s)
                    .map(Some)
                    .map_err(|e| BackendError::InvalidRequest(format!("field '{name}': {e}")))
            }
            Some(other) => Err(BackendError::InvalidRequest(format!(
                "field '{name}' must be a duration, got {other}"
            ))),
        }
    }
}

/// Response returned to the host
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Response {
    /// Fields shown to the caller
    pub data: Map<String, Value>,

    /// Lease the host must track, set when a key was issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretLease>,
}

impl Response {
    /// Response carrying `data`
    pub fn with_data(data: Map<String, Value>) -> Self {
        Self { data, secret: None }
    }

    /// List response: `{"keys": [...]}`
    pub fn list(keys: Vec<String>) -> Self {
        let mut data = Map::new();
        data.insert(
            "keys".into(),
            Value::Array(keys.into_iter().map(Value::String).collect()),
        );
        Self::with_data(data)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    ConfigRoot,
    RotateRoot,
    ConfigLease,
    ListRoles,
    Role(&'a str),
    Key(&'a str),
}

impl<'a> Route<'a> {
    fn parse(path: &'a str) -> Option<Self> {
        let path = path.trim_start_matches('/');
        match path {
            "config/root" => Some(Self::ConfigRoot),
            "config/rotate-root" => Some(Self::RotateRoot),
            "config/lease" => Some(Self::ConfigLease),
            "roles" | "roles/" => Some(Self::ListRoles),
            _ => match path.strip_prefix("roles/") {
                Some(name) => is_valid_name(name).then_some(Self::Role(name)),
                None => is_valid_name(path).then_some(Self::Key(path)),
            },
        }
    }
}

impl Backend {
    /// Route a request to its endpoint.
    ///
    /// `Ok(None)` means success with nothing to show, or a read of something
    /// that does not exist.
    pub async fn handle_request(
        &self,
        ctx: &RequestContext,
        request: Request,
    ) -> Result<Option<Response>> {
        let unsupported = || BackendError::UnsupportedOperation {
            operation: request.operation,
            path: request.path.clone(),
        };
        let route = Route::parse(&request.path).ok_or_else(unsupported)?;

        debug!(
            trace_id = %ctx.trace_id,
            operation = %request.operation,
            path = %request.path,
            "Handling request"
        );

        match (route, request.operation) {
            (Route::ConfigRoot, Operation::Read) => self.read_root_config().await,
            (Route::ConfigRoot, Operation::Update) => self.write_root_config(&request).await,
            (Route::RotateRoot, Operation::Update) => {
                self.rotate_root(ctx).await?;
                Ok(None)
            }
            (Route::ConfigLease, Operation::Read) => self.read_lease_config().await,
            (Route::ConfigLease, Operation::Update) => self.write_lease_config(&request).await,
            (Route::ListRoles, Operation::List) => {
                Ok(Some(Response::list(self.roles.list().await?)))
            }
            (Route::Role(name), Operation::Read) => Ok(self
                .roles
                .read(name)
                .await?
                .map(|role| Response::with_data(role.to_response_data()))),
            (Route::Role(name), Operation::Update) => {
                let update = RoleUpdate {
                    key_role: request.str_field("key_role")?,
                    database: request.str_field("database")?,
                    extra: request.str_field("extra")?,
                };
                self.roles.write(name, update).await?;
                Ok(None)
            }
            (Route::Role(name), Operation::Delete) => {
                self.roles.delete(name).await?;
                Ok(None)
            }
            (Route::Key(name), Operation::Read | Operation::Update) => {
                let role = self
                    .roles
                    .read(name)
                    .await?
                    .ok_or_else(|| BackendError::RoleNotFound(name.to_string()))?;
                let issued = self.create_key(ctx, name, &role).await?;
                Ok(Some(issued.into_response()))
            }
            _ => Err(unsupported()),
        }
    }

    async fn read_root_config(&self) -> Result<Option<Response>> {
        let _guard = self.clients.lock_shared().await;
        let Some(root) = RootConfig::load(self.storage.as_ref())
            .await
            .map_err(BackendError::bookkeeping(Phase::ReadRootConfig))?
        else {
            return Ok(None);
        };

        let mut data = Map::new();
        data.insert("secret".into(), Value::String(root.secret.expose().to_string()));
        data.insert("endpoint".into(), Value::String(root.endpoint.unwrap_or_default()));
        Ok(Some(Response::with_data(data)))
    }

    async fn write_root_config(&self, request: &Request) -> Result<Option<Response>> {
        let secret = request
            .str_field("secret")?
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BackendError::InvalidRequest("missing secret".into()))?;
        let endpoint = request.str_field("endpoint")?.filter(|e| !e.is_empty());
        if let Some(endpoint) = &endpoint {
            url::Url::parse(endpoint).map_err(|e| {
                BackendError::InvalidRequest(format!("invalid endpoint '{endpoint}': {e}"))
            })?;
        }

        let root = RootConfig {
            secret: SecretValue::new(secret),
            endpoint,
        };

        let mut guard = self.clients.lock_exclusive().await;
        root.store(self.storage.as_ref())
            .await
            .map_err(BackendError::bookkeeping(Phase::WriteRootConfig))?;
        guard.invalidate();

        info!(endpoint = ?root.endpoint, "Root configuration written");
        Ok(None)
    }

    async fn read_lease_config(&self) -> Result<Option<Response>> {
        let Some(lease) = LeaseConfig::load(self.storage.as_ref())
            .await
            .map_err(BackendError::bookkeeping(Phase::ReadLease))?
        else {
            return Ok(None);
        };

        let mut data = Map::new();
        data.insert("ttl".into(), Value::from(lease.ttl.as_secs()));
        data.insert("max_ttl".into(), Value::from(lease.max_ttl.as_secs()));
        Ok(Some(Response::with_data(data)))
    }

    async fn write_lease_config(&self, request: &Request) -> Result<Option<Response>> {
        let current = LeaseConfig::load(self.storage.as_ref())
            .await
            .map_err(BackendError::bookkeeping(Phase::ReadLease))?
            .unwrap_or_default();

        let lease = LeaseConfig {
            ttl: request.duration_field("ttl")?.unwrap_or(current.ttl),
            max_ttl: request.duration_field("max_ttl")?.unwrap_or(current.max_ttl),
        };
        if !lease.max_ttl.is_zero() && lease.ttl > lease.max_ttl {
            return Err(BackendError::InvalidRequest(
                "ttl must not exceed max_ttl".into(),
            ));
        }

        lease
            .store(self.storage.as_ref())
            .await
            .map_err(BackendError::bookkeeping(Phase::WriteLease))?;

        info!(ttl = ?lease.ttl, max_ttl = ?lease.max_ttl, "Lease policy written");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("config/root", Some(Route::ConfigRoot))]
    #[case("/config/rotate-root", Some(Route::RotateRoot))]
    #[case("config/lease", Some(Route::ConfigLease))]
    #[case("roles/", Some(Route::ListRoles))]
    #[case("roles", Some(Route::ListRoles))]
    #[case("roles/deploy", Some(Route::Role("deploy")))]
    #[case("roles/ops@team.io", Some(Route::Role("ops@team.io")))]
    #[case("deploy", Some(Route::Key("deploy")))]
    #[case("roles/-bad", None)]
    #[case("config/unknown", None)]
    #[case("a/b", None)]
    #[case("", None)]
    fn test_route_parse(#[case] path: &str, #[case] expected: Option<Route<'_>>) {
        assert_eq!(Route::parse(path), expected);
    }

    #[rstest]
    #[case(serde_json::json!(3600), Some(Duration::from_secs(3600)))]
    #[case(serde_json::json!("90"), Some(Duration::from_secs(90)))]
    #[case(serde_json::json!("1h 30m"), Some(Duration::from_secs(5400)))]
    #[case(serde_json::Value::Null, None)]
    fn test_duration_field(#[case] value: Value, #[case] expected: Option<Duration>) {
        let request = Request::update("config/lease").with("ttl", value);
        assert_eq!(request.duration_field("ttl").unwrap(), expected);
    }

    #[test]
    fn test_duration_field_rejects_garbage() {
        let request = Request::update("config/lease").with("ttl", "soon");
        assert!(request.duration_field("ttl").is_err());

        let request = Request::update("config/lease").with("ttl", -5);
        assert!(request.duration_field("ttl").is_err());
    }

    #[test]
    fn test_list_response_shape() {
        let response = Response::list(vec!["a".into(), "b".into()]);
        assert_eq!(response.data["keys"], serde_json::json!(["a", "b"]));
    }
}
