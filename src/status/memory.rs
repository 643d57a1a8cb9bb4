//! In-process status store
//!
//! Backs the integration tests and local experimentation. Mutations go
//! through one mutex, so `claim_if_free` is atomic here too, and every
//! write bumps a counter so tests can assert "zero stray writes".

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::{KeeperError, Result};

use super::{StatusRecord, StatusStore};

/// In-memory implementation of [`StatusStore`]
#[derive(Debug, Default)]
pub struct MemStatusStore {
    record: Mutex<StatusRecord>,
    secret: Mutex<Option<String>>,
    writes: AtomicU64,
    /// When set, every operation fails as if the database were down
    unavailable: Mutex<bool>,
}

impl MemStatusStore {
    pub fn new(record: StatusRecord, secret: Option<&str>) -> Self {
        Self {
            record: Mutex::new(record),
            secret: Mutex::new(secret.map(str::to_string)),
            writes: AtomicU64::new(0),
            unavailable: Mutex::new(false),
        }
    }

    /// Snapshot the current record
    pub fn record(&self) -> StatusRecord {
        self.record.lock().unwrap().clone()
    }

    /// Number of writes performed since construction
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make all subsequent operations fail with `StorageUnavailable`
    pub fn set_unavailable(&self, value: bool) {
        *self.unavailable.lock().unwrap() = value;
    }

    fn check_available(&self) -> Result<()> {
        if *self.unavailable.lock().unwrap() {
            return Err(KeeperError::storage("simulated outage"));
        }
        Ok(())
    }
}

#[async_trait]
impl StatusStore for MemStatusStore {
    async fn get_running(&self) -> Result<bool> {
        self.check_available()?;
        Ok(self.record.lock().unwrap().running)
    }

    async fn get_host_name(&self) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.record.lock().unwrap().host_name.clone())
    }

    async fn set_running(&self, value: bool) -> Result<()> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.record.lock().unwrap().running = value;
        Ok(())
    }

    async fn set_host_name(&self, name: &str) -> Result<()> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.record.lock().unwrap().host_name = Some(name.to_string());
        Ok(())
    }

    async fn get_secret(&self) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.secret.lock().unwrap().clone())
    }

    async fn claim_if_free(&self, host: &str) -> Result<bool> {
        self.check_available()?;
        let mut record = self.record.lock().unwrap();
        if record.running {
            return Ok(false);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        record.running = true;
        record.host_name = Some(host.to_string());
        Ok(true)
    }
}
