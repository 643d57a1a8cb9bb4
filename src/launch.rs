//! Workload process launch
//!
//! Starts the server process and blocks until it exits. Exit codes are
//! not interpreted: a server that came down, however it came down, is a
//! normally terminated run whose state should be backed up.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::error::{KeeperError, Result};

/// Launches the workload and waits for it to finish
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn run(&self, work_dir: &Path, heap_mb: u32) -> Result<()>;
}

/// Runs the server jar under the provisioned Java runtime
pub struct JavaLauncher {
    runtime_dir: PathBuf,
    binary_title: String,
}

impl JavaLauncher {
    pub fn new(runtime_dir: PathBuf, binary_title: impl Into<String>) -> Self {
        Self {
            runtime_dir,
            binary_title: binary_title.into(),
        }
    }

    /// Absolute path to the bundled java executable. The child runs with
    /// the work directory as cwd, so a relative runtime path must be
    /// resolved before the spawn.
    fn java_path(&self) -> PathBuf {
        self.runtime_dir
            .canonicalize()
            .unwrap_or_else(|_| self.runtime_dir.clone())
            .join("bin")
            .join("java")
    }

    fn build_args(&self, heap_mb: u32) -> Vec<String> {
        vec![
            format!("-Xmx{heap_mb}M"),
            format!("-Xms{heap_mb}M"),
            "-jar".to_string(),
            self.binary_title.clone(),
            "nogui".to_string(),
        ]
    }
}

#[async_trait]
impl Launcher for JavaLauncher {
    async fn run(&self, work_dir: &Path, heap_mb: u32) -> Result<()> {
        let java = self.java_path();
        info!(java = %java.display(), heap_mb, "starting server process");

        let status = Command::new(&java)
            .args(self.build_args(heap_mb))
            .current_dir(work_dir)
            .status()
            .await
            .map_err(|e| KeeperError::Launch(format!("{}: {e}", java.display())))?;

        // Any exit status is normal termination
        info!(code = ?status.code(), "server process exited");
        Ok(())
    }
}
