//! Command-line surface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Leased Fauna keys against a local state file
#[derive(Parser, Debug)]
#[command(name = "faunakeys")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags accepted by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Configuration file
    #[arg(long, global = true, default_value = "faunakeys.toml")]
    pub config: PathBuf,

    /// State file holding the mount's storage
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    /// Log filter directives, e.g. "debug" or "faunakeys_engine=trace"
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Caller name embedded in issued key names
    #[arg(long = "as", global = true, default_value = "cli")]
    pub caller: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Root key configuration
    #[command(subcommand)]
    Root(RootCommand),

    /// Lease policy for issued keys
    #[command(subcommand)]
    Lease(LeaseCommand),

    /// Role definitions
    #[command(subcommand)]
    Role(RoleCommand),

    /// Issue a key for a role
    Issue {
        /// Role name
        role: String,
    },

    /// Renew a lease printed by `issue`
    Renew {
        /// File holding the lease JSON, `-` for stdin
        lease: PathBuf,
    },

    /// Revoke a lease printed by `issue`, deleting its key
    Revoke {
        /// File holding the lease JSON, `-` for stdin
        lease: PathBuf,
    },

    /// Replay intent records left behind by interrupted issuances
    Rollback,
}

#[derive(Subcommand, Debug)]
pub enum RootCommand {
    /// Store the root secret and endpoint
    Set {
        /// Admin key secret
        #[arg(long, env = "FAUNAKEYS_ROOT_SECRET", hide_env_values = true)]
        secret: String,

        /// Issuer endpoint, e.g. https://db.fauna.com
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Print the stored root configuration
    Show,

    /// Replace the root key with a freshly minted one
    Rotate,
}

#[derive(Subcommand, Debug)]
pub enum LeaseCommand {
    /// Update ttl and max_ttl (seconds or "1h"-style durations)
    Set {
        #[arg(long)]
        ttl: Option<String>,

        #[arg(long)]
        max_ttl: Option<String>,
    },

    /// Print the lease policy
    Show,
}

#[derive(Subcommand, Debug)]
pub enum RoleCommand {
    /// Create a role or update the given fields of an existing one
    Write {
        name: String,

        /// "server", "admin", "client" or "roles/<custom>"
        #[arg(long)]
        key_role: Option<String>,

        /// Child database the keys are scoped to
        #[arg(long)]
        database: Option<String>,

        /// JSON object stored on every issued key
        #[arg(long)]
        extra: Option<String>,
    },

    /// Print one role
    Read { name: String },

    /// List role names
    List,

    /// Delete a role
    Delete { name: String },
}
