//! Runtime provisioning
//!
//! Ensures the server binary, the bundled workload archive and the
//! runtime package are present locally, reusing local copies and
//! fetching the rest from the artifact store. Every artifact gets an
//! explicit disposition so the one destructive step (replacing the work
//! directory with a freshly fetched bundle) is gated on a visible fact,
//! not on implicit bookkeeping.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::artifact::ArtifactStore;
use crate::backup::extract_archive;
use crate::config::ServerConfig;
use crate::error::Result;

/// What happened to one artifact during a provisioning run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A local copy exists and was reused; no remote call made
    Cached,
    /// Downloaded from the remote store during this run
    Fetched,
    /// Not present locally and not found remotely; logged and skipped
    Missing,
}

/// Dispositions for the three runtime artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionReport {
    pub bundle: Disposition,
    pub binary: Disposition,
    pub runtime: Disposition,
}

/// Fetches and assembles the local runtime from the artifact store
pub struct Provisioner<'a> {
    store: &'a dyn ArtifactStore,
    server: &'a ServerConfig,
    folder_id: &'a str,
}

impl<'a> Provisioner<'a> {
    pub fn new(store: &'a dyn ArtifactStore, server: &'a ServerConfig, folder_id: &'a str) -> Self {
        Self {
            store,
            server,
            folder_id,
        }
    }

    /// Ensure the server binary, workload bundle and runtime package are
    /// present locally.
    ///
    /// Local copies are never re-fetched, regardless of remote drift.
    /// Absence of a remote artifact is a logged soft failure. The work
    /// directory is destructively replaced only when the bundle was
    /// fetched during *this* run, which can only happen when no local
    /// work directory existed. Staging lives in a temp directory removed
    /// on every exit path.
    pub async fn ensure_runtime(&self) -> Result<ProvisionReport> {
        let staging = tempfile::tempdir()?;
        let staged_bundle = staging.path().join(&self.server.bundle_title);
        let staged_binary = staging.path().join(&self.server.binary_title);
        let staged_runtime = staging.path().join(&self.server.runtime_title);

        let runtime = if self.server.runtime_dir.exists() {
            info!(dir = %self.server.runtime_dir.display(), "runtime package already present, skipping download");
            Disposition::Cached
        } else {
            self.fetch_if_found(&self.server.runtime_title, &staged_runtime).await?
        };

        let local_binary = self.server.work_dir.join(&self.server.binary_title);
        let binary = if local_binary.exists() {
            info!(path = %local_binary.display(), "server binary already present, skipping download");
            // Copied aside so it survives a work directory replacement
            fs::copy(&local_binary, &staged_binary)?;
            Disposition::Cached
        } else {
            self.fetch_if_found(&self.server.binary_title, &staged_binary).await?
        };

        let bundle = if self.server.work_dir.exists() {
            info!(dir = %self.server.work_dir.display(), "work directory already present, keeping local state");
            Disposition::Cached
        } else {
            self.fetch_if_found(&self.server.bundle_title, &staged_bundle).await?
        };

        // Destructive replacement: only a bundle fetched in this run may
        // clobber the work directory.
        if bundle == Disposition::Fetched {
            if self.server.work_dir.exists() {
                fs::remove_dir_all(&self.server.work_dir)?;
            }
            extract_archive(&staged_bundle, &self.server.work_dir)?;
        }

        if staged_binary.exists() {
            fs::create_dir_all(&self.server.work_dir)?;
            fs::copy(&staged_binary, &local_binary)?;
            info!(path = %local_binary.display(), "server binary placed");
        }

        if runtime == Disposition::Fetched {
            extract_archive(&staged_runtime, &self.server.runtime_dir)?;
        }

        let report = ProvisionReport { bundle, binary, runtime };
        info!(?report, "provisioning finished");
        Ok(report)
    }

    /// Resolve and download one artifact; absence is a soft failure
    async fn fetch_if_found(&self, title: &str, dest: &Path) -> Result<Disposition> {
        info!(title, "searching remote folder");
        match self.store.find(title, self.folder_id).await? {
            Some(artifact) => {
                self.store.fetch(&artifact, dest).await?;
                Ok(Disposition::Fetched)
            }
            None => {
                warn!(title, "not found in remote folder, continuing without it");
                Ok(Disposition::Missing)
            }
        }
    }
}
