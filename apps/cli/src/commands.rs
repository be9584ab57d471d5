//! Command dispatch onto the engine

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use faunakeys_engine::prelude::*;
use serde_json::Value;
use tracing::info;

use crate::cli::{Command, LeaseCommand, RoleCommand, RootCommand};
use crate::config::CliConfig;
use crate::state::StateFile;

/// Run one command against the state file and return what to print
pub async fn execute(
    command: Command,
    config: &CliConfig,
    caller: &str,
    connector: Arc<dyn IssuerConnector>,
) -> anyhow::Result<Option<Value>> {
    let state = StateFile::new(&config.state_file);
    let storage = state.load().await?;

    let backend = Backend::builder()
        .storage(Arc::new(storage.clone()))
        .connector(connector)
        .config(config.backend.clone())
        .build()?;
    let ctx = RequestContext::new(caller);

    let outcome = dispatch(&backend, &ctx, command).await;

    // intent records written by a failed command must survive it
    state.save(&storage).await?;
    backend.shutdown().await;
    info!(state = %state.path().display(), ok = outcome.is_ok(), "Command finished");

    outcome
}

async fn dispatch(
    backend: &Backend,
    ctx: &RequestContext,
    command: Command,
) -> anyhow::Result<Option<Value>> {
    let request = match command {
        Command::Root(RootCommand::Set { secret, endpoint }) => {
            let mut request = Request::update("config/root").with("secret", secret);
            if let Some(endpoint) = endpoint {
                request = request.with("endpoint", endpoint);
            }
            request
        }
        Command::Root(RootCommand::Show) => Request::read("config/root"),
        Command::Root(RootCommand::Rotate) => Request::update("config/rotate-root"),

        Command::Lease(LeaseCommand::Set { ttl, max_ttl }) => {
            let mut request = Request::update("config/lease");
            if let Some(ttl) = ttl {
                request = request.with("ttl", duration_value(ttl));
            }
            if let Some(max_ttl) = max_ttl {
                request = request.with("max_ttl", duration_value(max_ttl));
            }
            request
        }
        Command::Lease(LeaseCommand::Show) => Request::read("config/lease"),

        Command::Role(RoleCommand::Write {
            name,
            key_role,
            database,
            extra,
        }) => {
            let mut request = Request::update(format!("roles/{name}"));
            for (field, value) in [("key_role", key_role), ("database", database), ("extra", extra)] {
                if let Some(value) = value {
                    request = request.with(field, value);
                }
            }
            request
        }
        Command::Role(RoleCommand::Read { name }) => Request::read(format!("roles/{name}")),
        Command::Role(RoleCommand::List) => Request::list("roles/"),
        Command::Role(RoleCommand::Delete { name }) => Request::delete(format!("roles/{name}")),

        Command::Issue { role } => Request::read(role),

        Command::Renew { lease } => {
            let lease = read_lease(&lease)?;
            let renewed = backend.renew_secret(ctx, &lease).await?;
            return Ok(Some(serde_json::to_value(renewed)?));
        }
        Command::Revoke { lease } => {
            let lease = read_lease(&lease)?;
            backend.revoke_secret(ctx, &lease).await?;
            return Ok(None);
        }
        Command::Rollback => {
            let report = backend.rollback_sweep().await?;
            return Ok(Some(serde_json::to_value(report)?));
        }
    };

    let response = backend.handle_request(ctx, request).await?;
    response
        .map(|response| serde_json::to_value(response).context("encoding response"))
        .transpose()
}

/// Plain integers are seconds, anything else goes through as a duration string
fn duration_value(raw: String) -> Value {
    raw.parse::<u64>()
        .map_or_else(|_| Value::String(raw), Value::from)
}

fn read_lease(path: &Path) -> anyhow::Result<SecretLease> {
    let raw = if path == Path::new("-") {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("reading lease from stdin")?;
        raw
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading lease from {}", path.display()))?
    };

    // accept either the bare lease or the whole `issue` output
    let value: Value = serde_json::from_str(&raw).context("parsing lease JSON")?;
    let lease = value.get("secret").cloned().unwrap_or(value);
    serde_json::from_value(lease).context("lease JSON is not a lease")
}
