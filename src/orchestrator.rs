//! Run lifecycle
//!
//! Sequences one full server run: local pre-backup, protocol token
//! check, claim acquisition, provisioning, execution, snapshot
//! publication, release. A local flag tracks whether this run holds the
//! claim so an abort never clears a claim some other host took.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::artifact::ArtifactStore;
use crate::backup::{BackupManager, timestamp_now};
use crate::config::Config;
use crate::error::{KeeperError, Result};
use crate::launch::Launcher;
use crate::provision::Provisioner;
use crate::status::StatusStore;

/// Token the shared secret must equal for this build to act.
///
/// Bumped together with protocol-breaking changes; an out-of-date build
/// refuses to run against a newer deployment.
pub const PROTOCOL_TOKEN: &str = "ver2";

/// Lifecycle states, in run order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    PreBackup,
    SecretCheck,
    RunningCheck,
    Claiming,
    Provisioning,
    Executing,
    PostBackup,
    Released,
    Aborted,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::PreBackup => "pre-backup",
            LifecycleState::SecretCheck => "secret-check",
            LifecycleState::RunningCheck => "running-check",
            LifecycleState::Claiming => "claiming",
            LifecycleState::Provisioning => "provisioning",
            LifecycleState::Executing => "executing",
            LifecycleState::PostBackup => "post-backup",
            LifecycleState::Released => "released",
            LifecycleState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Drives one run of the server under the shared claim protocol
pub struct Orchestrator<'a> {
    config: &'a Config,
    status: &'a dyn StatusStore,
    artifacts: &'a dyn ArtifactStore,
    launcher: &'a dyn Launcher,
    host: String,
}

/// Identity this host records when claiming the run
pub fn local_host_name() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        status: &'a dyn StatusStore,
        artifacts: &'a dyn ArtifactStore,
        launcher: &'a dyn Launcher,
        host: String,
    ) -> Self {
        Self {
            config,
            status,
            artifacts,
            launcher,
            host,
        }
    }

    /// Execute the full lifecycle.
    ///
    /// Failures after a successful claim release it best-effort before
    /// propagating; failures before the claim leave the shared record
    /// untouched.
    pub async fn run(&self) -> Result<()> {
        let mut holds_claim = false;
        let result = self.run_inner(&mut holds_claim).await;

        if let Err(err) = &result {
            warn!(state = %LifecycleState::Aborted, %err, "run aborted");
            if holds_claim {
                info!("releasing claim taken by this run");
                if let Err(release_err) = self.status.set_running(false).await {
                    error!(%release_err, "failed to release claim during abort");
                }
            }
        }
        result
    }

    async fn run_inner(&self, holds_claim: &mut bool) -> Result<()> {
        let server = &self.config.server;
        let backup = BackupManager::new(&server.binary_title);
        let timestamp = timestamp_now();

        // Pre-backup: capture local-only state before touching anything
        // remote, so an early abort cannot lose it.
        self.enter(LifecycleState::PreBackup);
        if server.work_dir.exists() {
            backup.snapshot(&self.snapshot_path(&format!("backup_{timestamp}.zip")), &server.work_dir)?;
        }

        self.enter(LifecycleState::SecretCheck);
        let secret = self.status.get_secret().await?;
        if secret.as_deref() != Some(PROTOCOL_TOKEN) {
            return Err(KeeperError::AuthorizationMismatch);
        }

        self.enter(LifecycleState::RunningCheck);
        if self.status.get_running().await? {
            let host = self.status.get_host_name().await?;
            return Err(KeeperError::AlreadyRunning { host });
        }

        self.enter(LifecycleState::Claiming);
        if !self.status.claim_if_free(&self.host).await? {
            // Lost a concurrent race between the check and the claim
            let host = match self.status.get_host_name().await {
                Ok(host) => host,
                Err(err) => {
                    debug!(%err, "claim holder lookup failed after lost race");
                    None
                }
            };
            return Err(KeeperError::AlreadyRunning { host });
        }
        *holds_claim = true;

        self.enter(LifecycleState::Provisioning);
        let provisioner = Provisioner::new(self.artifacts, server, &self.config.drive.main_folder_id);
        provisioner.ensure_runtime().await?;

        self.enter(LifecycleState::Executing);
        self.launcher.run(&server.work_dir, server.allocated_ram_mb()).await?;

        self.enter(LifecycleState::PostBackup);
        let timestamp = timestamp_now();
        backup.snapshot(&self.snapshot_path(&format!("backup_{timestamp}.zip")), &server.work_dir)?;
        let canonical = backup.snapshot(&self.snapshot_path(&server.bundle_title), &server.work_dir)?;
        backup
            .rotate_canonical(
                self.artifacts,
                &canonical,
                &server.bundle_title,
                &self.config.drive.main_folder_id,
            )
            .await?;
        backup
            .archive_timestamped(
                self.artifacts,
                &canonical,
                &self.config.drive.backup_folder_id,
                &self.host,
                &timestamp,
            )
            .await?;

        self.enter(LifecycleState::Released);
        self.status.set_running(false).await?;
        *holds_claim = false;

        info!("run finished, claim released");
        Ok(())
    }

    fn enter(&self, state: LifecycleState) {
        debug!(%state, host = %self.host, "entering lifecycle state");
    }

    /// Local snapshots land next to the work directory
    fn snapshot_path(&self, name: &str) -> PathBuf {
        match self.config.server.work_dir.parent() {
            Some(parent) if parent.as_os_str().is_empty() => PathBuf::from(name),
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemArtifactStore;
    use crate::status::{MemStatusStore, StatusRecord};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct NoopLauncher {
        launches: AtomicU32,
    }

    impl NoopLauncher {
        fn new() -> Self {
            Self {
                launches: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Launcher for NoopLauncher {
        async fn run(&self, _work_dir: &Path, _heap_mb: u32) -> Result<()> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Loses the claim race and then cannot read back who won
    struct BlindLoserStatusStore;

    #[async_trait]
    impl StatusStore for BlindLoserStatusStore {
        async fn get_running(&self) -> Result<bool> {
            Ok(false)
        }

        async fn get_host_name(&self) -> Result<Option<String>> {
            Err(KeeperError::storage("connection reset"))
        }

        async fn set_running(&self, _value: bool) -> Result<()> {
            Ok(())
        }

        async fn set_host_name(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn get_secret(&self) -> Result<Option<String>> {
            Ok(Some(PROTOCOL_TOKEN.to_string()))
        }

        async fn claim_if_free(&self, _host: &str) -> Result<bool> {
            Ok(false)
        }
    }

    fn test_config(root: &Path) -> Config {
        let mut config = Config::default();
        config.server.work_dir = root.join("server");
        config.server.runtime_dir = root.join("jdk-21.0.5+11");
        config.drive.main_folder_id = "main".to_string();
        config.drive.backup_folder_id = "backup".to_string();
        config
    }

    #[tokio::test]
    async fn test_secret_mismatch_aborts_before_any_write() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let status = MemStatusStore::new(StatusRecord::default(), Some("ver1"));
        let artifacts = MemArtifactStore::new();
        let launcher = NoopLauncher::new();

        let orchestrator = Orchestrator::new(&config, &status, &artifacts, &launcher, "hostA".to_string());
        let err = orchestrator.run().await.unwrap_err();

        assert!(matches!(err, KeeperError::AuthorizationMismatch));
        assert_eq!(status.write_count(), 0);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lost_claim_race_reports_already_running() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let status = MemStatusStore::new(StatusRecord::default(), Some(PROTOCOL_TOKEN));
        let artifacts = MemArtifactStore::new();
        let launcher = NoopLauncher::new();

        // Another host already claimed before this run started
        assert!(status.claim_if_free("hostB").await.unwrap());

        let orchestrator = Orchestrator::new(&config, &status, &artifacts, &launcher, "hostA".to_string());
        let err = orchestrator.run().await.unwrap_err();

        assert!(err.is_benign());
        assert_eq!(status.record().host_name.as_deref(), Some("hostB"));
        assert!(status.record().running);
    }

    #[tokio::test]
    async fn test_lost_race_with_unreadable_holder_reports_already_running() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let status = BlindLoserStatusStore;
        let artifacts = MemArtifactStore::new();
        let launcher = NoopLauncher::new();

        let orchestrator = Orchestrator::new(&config, &status, &artifacts, &launcher, "hostA".to_string());
        let err = orchestrator.run().await.unwrap_err();

        // The holder lookup outage must not mask the lost race
        assert!(matches!(err, KeeperError::AlreadyRunning { host: None }));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_snapshot_path_stays_next_to_work_dir() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let status = MemStatusStore::default();
        let artifacts = MemArtifactStore::new();
        let launcher = NoopLauncher::new();

        let orchestrator = Orchestrator::new(&config, &status, &artifacts, &launcher, "hostA".to_string());
        assert_eq!(orchestrator.snapshot_path("server.zip"), tmp.path().join("server.zip"));
    }
}
