//! Postgres-backed status store
//!
//! Schema (pre-provisioned, never created here):
//!
//! ```sql
//! CREATE TABLE status (id INT PRIMARY KEY, running BOOLEAN NOT NULL, host_name TEXT);
//! CREATE TABLE secret (id INT PRIMARY KEY, text TEXT NOT NULL);
//! INSERT INTO status (id, running, host_name) VALUES (1, FALSE, '');
//! ```

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info};

use crate::error::{KeeperError, Result};

use super::StatusStore;

/// Fixed key of the singleton status row
const STATUS_ROW_ID: i32 = 1;

/// [`StatusStore`] over the shared Postgres instance
///
/// Every transport or query failure maps to `StorageUnavailable`; the
/// caller aborts the run rather than retrying.
#[derive(Debug, Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    /// Connect to the shared database
    pub async fn connect(url: &str) -> Result<Self> {
        debug!("connecting to status database");
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(url)
            .await
            .map_err(KeeperError::storage)?;
        info!("status database connected");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn get_running(&self) -> Result<bool> {
        debug!("fetching running status");
        let running: Option<bool> = sqlx::query_scalar("SELECT running FROM status WHERE id = $1")
            .bind(STATUS_ROW_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(KeeperError::storage)?;
        // Absent row reads as "nobody is running"
        Ok(running.unwrap_or(false))
    }

    async fn get_host_name(&self) -> Result<Option<String>> {
        debug!("fetching host name");
        let host: Option<Option<String>> = sqlx::query_scalar("SELECT host_name FROM status WHERE id = $1")
            .bind(STATUS_ROW_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(KeeperError::storage)?;
        Ok(host.flatten().filter(|h| !h.is_empty()))
    }

    async fn set_running(&self, value: bool) -> Result<()> {
        debug!(value, "updating running status");
        sqlx::query("UPDATE status SET running = $1 WHERE id = $2")
            .bind(value)
            .bind(STATUS_ROW_ID)
            .execute(&self.pool)
            .await
            .map_err(KeeperError::storage)?;
        info!(value, "running status updated");
        Ok(())
    }

    async fn set_host_name(&self, name: &str) -> Result<()> {
        debug!(name, "updating host name");
        sqlx::query("UPDATE status SET host_name = $1 WHERE id = $2")
            .bind(name)
            .bind(STATUS_ROW_ID)
            .execute(&self.pool)
            .await
            .map_err(KeeperError::storage)?;
        Ok(())
    }

    async fn get_secret(&self) -> Result<Option<String>> {
        debug!("fetching shared token");
        let secret: Option<String> = sqlx::query_scalar("SELECT text FROM secret WHERE id = $1")
            .bind(STATUS_ROW_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(KeeperError::storage)?;
        Ok(secret)
    }

    async fn claim_if_free(&self, host: &str) -> Result<bool> {
        debug!(host, "attempting to claim the run");
        // Single conditional update: flag and holder change together, and
        // only when nobody holds the claim.
        let result = sqlx::query("UPDATE status SET running = TRUE, host_name = $1 WHERE id = $2 AND running = FALSE")
            .bind(host)
            .bind(STATUS_ROW_ID)
            .execute(&self.pool)
            .await
            .map_err(KeeperError::storage)?;
        let claimed = result.rows_affected() == 1;
        info!(host, claimed, "claim attempt finished");
        Ok(claimed)
    }
}
