//! Shared status record: the arbitration point between hosts
//!
//! A single row in a shared database records whether any host currently
//! holds the right to run the server, and which one. Hosts coordinate
//! exclusively through this record; there is no lease or heartbeat.

use async_trait::async_trait;

use crate::error::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemStatusStore;
pub use postgres::PgStatusStore;

/// Snapshot of the singleton status row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusRecord {
    /// True iff a host currently holds the execution claim
    pub running: bool,
    /// Identity of the claim holder; empty when not running
    pub host_name: Option<String>,
}

/// Access to the shared status record
///
/// The record is a pre-provisioned singleton row; it is never created or
/// deleted by this system, only read and updated.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Current claim state. An absent row reads as `false`.
    async fn get_running(&self) -> Result<bool>;

    /// Identity of the current claim holder, if any.
    async fn get_host_name(&self) -> Result<Option<String>>;

    /// Idempotent write of the claim flag.
    async fn set_running(&self, value: bool) -> Result<()>;

    /// Record the claim holder's identity.
    async fn set_host_name(&self, name: &str) -> Result<()>;

    /// Shared authorization token, read-only from this system's side.
    async fn get_secret(&self) -> Result<Option<String>>;

    /// Atomically take the claim iff nobody holds it.
    ///
    /// Sets `running = true` and records `host` in a single conditional
    /// update. Returns `false` when another host already holds the claim
    /// (including when it won a concurrent race for it).
    async fn claim_if_free(&self, host: &str) -> Result<bool>;
}
