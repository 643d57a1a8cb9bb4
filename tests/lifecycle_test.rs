//! Integration tests for serverkeeper
//!
//! Drive the full orchestrator lifecycle over in-memory stores and a
//! fake launcher, covering the claim protocol's success, contention and
//! crash paths.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::TempDir;

use serverkeeper::artifact::MemArtifactStore;
use serverkeeper::config::Config;
use serverkeeper::error::{KeeperError, Result};
use serverkeeper::launch::Launcher;
use serverkeeper::orchestrator::{Orchestrator, PROTOCOL_TOKEN};
use serverkeeper::status::{MemStatusStore, StatusRecord};

// =============================================================================
// Fixtures
// =============================================================================

/// Launcher double that records the shared record as seen mid-execution
/// and mutates the work directory like a real server session would.
struct FakeLauncher<'a> {
    status: &'a MemStatusStore,
    seen_during_run: Mutex<Option<StatusRecord>>,
    fail: bool,
}

impl<'a> FakeLauncher<'a> {
    fn new(status: &'a MemStatusStore) -> Self {
        Self {
            status,
            seen_during_run: Mutex::new(None),
            fail: false,
        }
    }

    fn failing(status: &'a MemStatusStore) -> Self {
        Self {
            status,
            seen_during_run: Mutex::new(None),
            fail: true,
        }
    }
}

#[async_trait]
impl Launcher for FakeLauncher<'_> {
    async fn run(&self, work_dir: &Path, _heap_mb: u32) -> Result<()> {
        *self.seen_during_run.lock().unwrap() = Some(self.status.record());
        if self.fail {
            return Err(KeeperError::Launch("simulated crash".to_string()));
        }
        // The server mutates its world state while it runs
        std::fs::create_dir_all(work_dir)?;
        std::fs::write(work_dir.join("world.dat"), b"new chunks")?;
        Ok(())
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

fn make_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }
    buf.into_inner()
}

fn seeded_artifacts() -> MemArtifactStore {
    let store = MemArtifactStore::new();
    store.insert("server.zip", "main", &make_zip(&[("server.properties", b"motd=hi")]));
    store.insert("server.jar", "main", b"jar bytes");
    store.insert("jdk-21.0.5+11.zip", "main", &make_zip(&[("bin/java", b"elf")]));
    store
}

// =============================================================================
// Successful full run
// =============================================================================

#[tokio::test]
async fn test_full_run_from_empty_host_claims_provisions_publishes_and_releases() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let status = MemStatusStore::new(StatusRecord::default(), Some(PROTOCOL_TOKEN));
    let artifacts = seeded_artifacts();
    let launcher = FakeLauncher::new(&status);

    let orchestrator = Orchestrator::new(&config, &status, &artifacts, &launcher, "hostA".to_string());
    orchestrator.run().await.unwrap();

    // The claim was held, under this host's name, while the server ran
    let seen = launcher.seen_during_run.lock().unwrap().clone().unwrap();
    assert!(seen.running);
    assert_eq!(seen.host_name.as_deref(), Some("hostA"));

    // Provisioned from empty state: bundle extracted, binary placed
    assert!(config.server.work_dir.join("server.properties").exists());
    assert!(config.server.work_dir.join("server.jar").exists());
    assert!(config.server.runtime_dir.join("bin/java").exists());

    // Claim released on success; the host name stays as a record of the
    // last runner
    let record = status.record();
    assert!(!record.running);
    assert_eq!(record.host_name.as_deref(), Some("hostA"));

    // Exactly one canonical snapshot, plus one timestamped historical copy
    assert_eq!(artifacts.count("server.zip", "main"), 1);
    let backups = artifacts.titles_in("backup");
    assert_eq!(backups.len(), 1);
    assert!(backups[0].starts_with("server_"));
    assert!(backups[0].ends_with("_hostA.zip"));
}

#[tokio::test]
async fn test_canonical_slot_is_rotated_not_duplicated() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let status = MemStatusStore::new(StatusRecord::default(), Some(PROTOCOL_TOKEN));
    let artifacts = seeded_artifacts(); // already holds a canonical server.zip
    let launcher = FakeLauncher::new(&status);

    let orchestrator = Orchestrator::new(&config, &status, &artifacts, &launcher, "hostA".to_string());
    orchestrator.run().await.unwrap();

    assert_eq!(artifacts.count("server.zip", "main"), 1);
}

// =============================================================================
// Contention
// =============================================================================

#[tokio::test]
async fn test_record_held_by_other_host_aborts_with_zero_writes() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let initial = StatusRecord {
        running: true,
        host_name: Some("hostB".to_string()),
    };
    let status = MemStatusStore::new(initial.clone(), Some(PROTOCOL_TOKEN));
    let artifacts = seeded_artifacts();
    let launcher = FakeLauncher::new(&status);

    let orchestrator = Orchestrator::new(&config, &status, &artifacts, &launcher, "hostA".to_string());
    let err = orchestrator.run().await.unwrap_err();

    assert!(err.is_benign());
    assert!(err.to_string().contains("hostB"));

    // No writes, no artifact operations, record untouched
    assert_eq!(status.write_count(), 0);
    assert_eq!(artifacts.remote_calls(), 0);
    assert_eq!(status.record(), initial);
    assert!(launcher.seen_during_run.lock().unwrap().is_none());
}

// =============================================================================
// Abort paths
// =============================================================================

#[tokio::test]
async fn test_abort_before_claim_leaves_record_identical() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let initial = StatusRecord::default();
    // Shared token from a newer deployment than this build understands
    let status = MemStatusStore::new(initial.clone(), Some("ver3"));
    let artifacts = seeded_artifacts();
    let launcher = FakeLauncher::new(&status);

    let orchestrator = Orchestrator::new(&config, &status, &artifacts, &launcher, "hostA".to_string());
    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(err, KeeperError::AuthorizationMismatch));
    assert_eq!(status.write_count(), 0);
    assert_eq!(status.record(), initial);
}

#[tokio::test]
async fn test_abort_after_claim_releases_it() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let status = MemStatusStore::new(StatusRecord::default(), Some(PROTOCOL_TOKEN));
    let artifacts = seeded_artifacts();
    let launcher = FakeLauncher::failing(&status);

    let orchestrator = Orchestrator::new(&config, &status, &artifacts, &launcher, "hostA".to_string());
    let err = orchestrator.run().await.unwrap_err();

    assert!(!err.is_benign());

    // The claim this run took was released on the way out
    let record = status.record();
    assert!(!record.running);
    assert_eq!(record.host_name.as_deref(), Some("hostA"));
}

#[tokio::test]
async fn test_database_outage_aborts_without_artifact_operations() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let status = MemStatusStore::new(StatusRecord::default(), Some(PROTOCOL_TOKEN));
    status.set_unavailable(true);
    let artifacts = seeded_artifacts();
    let launcher = FakeLauncher::new(&status);

    let orchestrator = Orchestrator::new(&config, &status, &artifacts, &launcher, "hostA".to_string());
    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(err, KeeperError::StorageUnavailable(_)));
    assert_eq!(artifacts.remote_calls(), 0);
}

// =============================================================================
// Pre-backup
// =============================================================================

#[tokio::test]
async fn test_prior_work_dir_is_backed_up_locally_before_remote_state_is_touched() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());

    std::fs::create_dir_all(&config.server.work_dir).unwrap();
    std::fs::write(config.server.work_dir.join("world.dat"), b"local-only changes").unwrap();

    // The run aborts at the secret check, before any remote mutation,
    // yet the local backup must already exist.
    let status = MemStatusStore::new(StatusRecord::default(), Some("stale-token"));
    let artifacts = seeded_artifacts();
    let launcher = FakeLauncher::new(&status);

    let orchestrator = Orchestrator::new(&config, &status, &artifacts, &launcher, "hostA".to_string());
    let _ = orchestrator.run().await.unwrap_err();

    let backups: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("backup_") && name.ends_with(".zip"))
        .collect();
    assert_eq!(backups.len(), 1);
}

#[tokio::test]
async fn test_second_run_reuses_local_artifacts() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let status = MemStatusStore::new(StatusRecord::default(), Some(PROTOCOL_TOKEN));
    let artifacts = seeded_artifacts();
    let launcher = FakeLauncher::new(&status);

    let orchestrator = Orchestrator::new(&config, &status, &artifacts, &launcher, "hostA".to_string());
    orchestrator.run().await.unwrap();

    let calls_after_first = artifacts.remote_calls();
    orchestrator.run().await.unwrap();

    // Second run downloads nothing: only the claim and the two snapshot
    // uploads (plus the canonical find/delete) hit the remote store.
    let provisioning_calls = 0;
    let rotation_calls = 3; // find + delete + upload canonical
    let archive_calls = 1; // upload timestamped
    assert_eq!(
        artifacts.remote_calls(),
        calls_after_first + provisioning_calls + rotation_calls + archive_calls
    );

    // Local state survived: world.dat from the first run is still there
    assert!(config.server.work_dir.join("world.dat").exists());
}
