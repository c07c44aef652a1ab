use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Caching mirror for Composer package repositories.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "PKGMIRROR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); `RUST_LOG` takes precedence
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Synchronize one mirror, or every configured mirror
    Sync(SyncArgs),
    /// Approve packages on a mirror (approving also enables them)
    Approve(PackagesArgs),
    /// Withdraw approval of packages
    Unapprove(PackagesArgs),
    /// List the enabled (or approved) packages of a mirror
    Enabled {
        mirror: String,
        #[arg(long)]
        approved: bool,
    },
    /// Print the root document, or a package document, as served
    Show {
        mirror: String,
        package: Option<String>,
        /// Serve as a caller restricted to enabled packages
        #[arg(long)]
        restricted: bool,
    },
    /// Resolve an archive, downloading it if needed, and print its path
    Dist {
        mirror: String,
        package: String,
        version: String,
        reference: String,
    },
    /// Print the statistics of the last sync
    Stats { mirror: String },
    /// List configured mirrors
    Mirrors,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Mirror to synchronize; all mirrors when omitted
    pub mirror: Option<String>,
    /// Delete everything stored for the mirror first
    #[arg(long)]
    pub reset: bool,
    /// Sync even when the upstream root is unchanged
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct PackagesArgs {
    pub mirror: String,
    #[arg(required = true)]
    pub packages: Vec<String>,
}
