//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Serverkeeper - single-instance server coordinator
#[derive(Parser)]
#[command(
    name = "serverkeeper",
    about = "Runs one shared game server on exactly one host at a time",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, help = "Log level override")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Claim the shared record, provision, run the server, publish state
    /// back and release (default when no subcommand is given)
    Run,

    /// Show the shared status record
    Status,

    /// Clear a claim left behind by a crashed host
    ///
    /// There is no lease expiry; a host that died while holding the
    /// claim blocks everyone until an operator runs this.
    Release,

    /// Snapshot the local work directory and upload it as the canonical
    /// bundle, without running the server
    Publish,
}
