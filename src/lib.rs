//! Serverkeeper - single-instance server coordinator
//!
//! Coordinates exclusive execution of one long-running game server
//! across independent hosts that share no local state. A shared database
//! row is the arbitration point; a remote Drive folder pair is the
//! artifact-exchange medium.
//!
//! # Protocol
//!
//! - **Claim first**: a host atomically flips the shared record to
//!   `running` with its own name before touching the server.
//! - **State in the store**: the work directory travels as a canonical
//!   snapshot under a fixed title, plus immutable timestamped copies.
//! - **Crash-safe release**: a run that aborts after claiming releases
//!   the claim best-effort; a run that never claimed touches nothing.
//!
//! # Modules
//!
//! - [`status`] - shared status record (claim arbitration)
//! - [`artifact`] - remote blob store scoped by folder
//! - [`provision`] - local runtime assembly with per-artifact dispositions
//! - [`backup`] - snapshots, canonical rotation, historical archives
//! - [`launch`] - workload process launch
//! - [`orchestrator`] - the lifecycle state machine

pub mod artifact;
pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod launch;
pub mod orchestrator;
pub mod provision;
pub mod status;

// Re-export commonly used types
pub use artifact::{ArtifactRef, ArtifactStore, DriveStore, MemArtifactStore};
pub use backup::BackupManager;
pub use config::Config;
pub use error::{KeeperError, Result};
pub use launch::{JavaLauncher, Launcher};
pub use orchestrator::{LifecycleState, Orchestrator, PROTOCOL_TOKEN, local_host_name};
pub use provision::{Disposition, ProvisionReport, Provisioner};
pub use status::{MemStatusStore, PgStatusStore, StatusRecord, StatusStore};
