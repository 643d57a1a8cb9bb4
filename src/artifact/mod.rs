//! Remote artifact store: named blobs under folder scopes
//!
//! Objects are addressed by human-readable title within a folder. The
//! store has no native uniqueness constraint on titles, so callers that
//! need a single canonical slot must delete before uploading, and callers
//! that need history must pick collision-resistant titles.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

pub mod drive;
pub mod memory;

pub use drive::DriveStore;
pub use memory::MemArtifactStore;

/// Handle to one remote object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    /// Store-assigned object id
    pub id: String,
    /// Human-readable title the object was found or created under
    pub title: String,
}

/// Folder-scoped blob operations against the remote store
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Resolve a title within a folder. Exact match, soft-deleted objects
    /// excluded, first match wins. `None` is not an error.
    async fn find(&self, title: &str, folder_id: &str) -> Result<Option<ArtifactRef>>;

    /// Download the object's content to a local path.
    async fn fetch(&self, artifact: &ArtifactRef, dest: &Path) -> Result<()>;

    /// Create a new remote object. Never checks for or removes prior
    /// objects with the same title.
    async fn upload(&self, local_path: &Path, title: &str, folder_id: &str) -> Result<ArtifactRef>;

    /// Remove one specific remote object.
    async fn delete(&self, artifact: &ArtifactRef) -> Result<()>;
}
