//! In-process artifact store
//!
//! Test double with the same title semantics as the remote store:
//! duplicate titles accumulate, find returns the first non-trashed match.
//! Counts remote calls so tests can assert provisioning idempotence.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::{KeeperError, Result};

use super::{ArtifactRef, ArtifactStore};

#[derive(Debug, Clone)]
struct StoredObject {
    id: String,
    title: String,
    folder_id: String,
    data: Vec<u8>,
    trashed: bool,
}

/// In-memory implementation of [`ArtifactStore`]
#[derive(Debug, Default)]
pub struct MemArtifactStore {
    objects: Mutex<Vec<StoredObject>>,
    next_id: AtomicU64,
    calls: AtomicU64,
}

impl MemArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without counting it as a remote call
    pub fn insert(&self, title: &str, folder_id: &str, data: &[u8]) -> ArtifactRef {
        let id = format!("obj-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.objects.lock().unwrap().push(StoredObject {
            id: id.clone(),
            title: title.to_string(),
            folder_id: folder_id.to_string(),
            data: data.to_vec(),
            trashed: false,
        });
        ArtifactRef {
            id,
            title: title.to_string(),
        }
    }

    /// Soft-delete an object, as the remote store's trash does
    pub fn trash(&self, artifact: &ArtifactRef) {
        let mut objects = self.objects.lock().unwrap();
        if let Some(obj) = objects.iter_mut().find(|o| o.id == artifact.id) {
            obj.trashed = true;
        }
    }

    /// Number of live objects under a title within a folder
    pub fn count(&self, title: &str, folder_id: &str) -> usize {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.title == title && o.folder_id == folder_id && !o.trashed)
            .count()
    }

    /// Content of the first live object under a title, if any
    pub fn content(&self, title: &str, folder_id: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.title == title && o.folder_id == folder_id && !o.trashed)
            .map(|o| o.data.clone())
    }

    /// Titles of all live objects within a folder
    pub fn titles_in(&self, folder_id: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.folder_id == folder_id && !o.trashed)
            .map(|o| o.title.clone())
            .collect()
    }

    /// Total remote calls made through the trait since construction
    pub fn remote_calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for MemArtifactStore {
    async fn find(&self, title: &str, folder_id: &str) -> Result<Option<ArtifactRef>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.title == title && o.folder_id == folder_id && !o.trashed)
            .map(|o| ArtifactRef {
                id: o.id.clone(),
                title: o.title.clone(),
            }))
    }

    async fn fetch(&self, artifact: &ArtifactRef, dest: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let data = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.id == artifact.id && !o.trashed)
            .map(|o| o.data.clone())
            .ok_or_else(|| KeeperError::ArtifactNotFound {
                title: artifact.title.clone(),
            })?;
        std::fs::write(dest, data)?;
        Ok(())
    }

    async fn upload(&self, local_path: &Path, title: &str, folder_id: &str) -> Result<ArtifactRef> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let data = std::fs::read(local_path)?;
        Ok(self.insert(title, folder_id, &data))
    }

    async fn delete(&self, artifact: &ArtifactRef) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().retain(|o| o.id != artifact.id);
        Ok(())
    }
}
