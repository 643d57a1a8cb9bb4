//! Workload snapshots and remote backup rotation
//!
//! A snapshot is a deflated zip of the server working directory, minus
//! the server binary (provisioned separately, identical every run). The
//! canonical remote copy lives under a fixed title and is replaced by
//! delete-then-upload; historical copies get collision-free titles and
//! are never deleted.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::artifact::ArtifactStore;
use crate::error::Result;

/// Timestamp format used in snapshot titles
pub fn timestamp_now() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// Produces and publishes snapshots of the server working directory
#[derive(Debug, Clone)]
pub struct BackupManager {
    /// File name excluded from every snapshot
    binary_title: String,
}

impl BackupManager {
    pub fn new(binary_title: impl Into<String>) -> Self {
        Self {
            binary_title: binary_title.into(),
        }
    }

    /// Archive `source_dir` into `output`, overwriting any existing file.
    ///
    /// Every file is stored under its path relative to `source_dir`; the
    /// server binary is always excluded. Returns `output` for chaining.
    pub fn snapshot(&self, output: &Path, source_dir: &Path) -> Result<PathBuf> {
        if output.exists() {
            debug!(output = %output.display(), "removing previous local snapshot");
            std::fs::remove_file(output)?;
        }

        info!(source = %source_dir.display(), output = %output.display(), "zipping server folder");
        let mut writer = ZipWriter::new(File::create(output)?);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for entry in WalkDir::new(source_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy() == self.binary_title {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(source_dir)
                .expect("walkdir yields paths under its root");
            writer.start_file(relative.to_string_lossy(), options)?;
            io::copy(&mut File::open(entry.path())?, &mut writer)?;
        }

        writer.finish()?;
        info!(output = %output.display(), "snapshot written");
        Ok(output.to_path_buf())
    }

    /// Replace the canonical remote snapshot at `title`.
    ///
    /// The store has no title uniqueness, so the single-slot semantics
    /// come from deleting the resolved object first (a no-op when absent)
    /// and uploading afterwards.
    pub async fn rotate_canonical(
        &self,
        store: &dyn ArtifactStore,
        snapshot: &Path,
        title: &str,
        folder_id: &str,
    ) -> Result<()> {
        if let Some(existing) = store.find(title, folder_id).await? {
            info!(title, "deleting superseded canonical snapshot");
            store.delete(&existing).await?;
        }
        store.upload(snapshot, title, folder_id).await?;
        info!(title, "canonical snapshot rotated");
        Ok(())
    }

    /// Publish an immutable historical copy under a host- and
    /// timestamp-tagged title. Never deleted by this system.
    pub async fn archive_timestamped(
        &self,
        store: &dyn ArtifactStore,
        snapshot: &Path,
        folder_id: &str,
        host: &str,
        timestamp: &str,
    ) -> Result<()> {
        let title = format!("server_{timestamp}_{host}.zip");
        store.upload(snapshot, &title, folder_id).await?;
        info!(title, "historical snapshot archived");
        Ok(())
    }
}

/// Extract a zip archive into `dest`, creating it as needed
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    info!(archive = %archive.display(), dest = %dest.display(), "extracting archive");
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    zip.extract(dest)?;
    Ok(())
}
