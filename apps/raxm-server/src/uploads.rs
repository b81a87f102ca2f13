use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Bytes [`MemoryUploadStore::default`] holds before refusing uploads.
pub const DEFAULT_MEMORY_LIMIT: usize = 16 * 1024 * 1024;

/// Receipt for a file accepted by the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredUpload {
    pub id: String,
    pub name: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("upload store is full: {requested} bytes requested, {used} of {limit} in use")]
pub struct StoreFull {
    pub limit: usize,
    pub used: usize,
    pub requested: usize,
}

/// Where uploaded bytes land once their URL signature checked out.
#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn store(&self, name: &str, bytes: &[u8]) -> Result<StoredUpload>;
}

/// Writes each upload to its own file under `root`.
#[derive(Debug, Clone)]
pub struct LocalUploadStore {
    root: PathBuf,
}

impl LocalUploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

#[async_trait]
impl UploadStore for LocalUploadStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn store(&self, name: &str, bytes: &[u8]) -> Result<StoredUpload> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create {}", self.root.display()))?;

        // The client-supplied name is kept in the receipt only, never in the path.
        let id = Uuid::new_v4().simple().to_string();
        let path = self.path_for(&id);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        debug!(%id, path = %path.display(), "upload stored");
        Ok(StoredUpload {
            id,
            name: name.to_owned(),
            size: bytes.len(),
        })
    }
}

/// Keeps uploads in memory, up to `limit` bytes in total. Used when no
/// upload directory is configured outside production.
#[derive(Debug)]
pub struct MemoryUploadStore {
    limit: usize,
    files: Mutex<Vec<(String, Vec<u8>)>>,
}

impl Default for MemoryUploadStore {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MEMORY_LIMIT)
    }
}

impl MemoryUploadStore {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            files: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }

    pub fn used(&self) -> usize {
        self.files.lock().iter().map(|(_, bytes)| bytes.len()).sum()
    }

    pub fn get(&self, id: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .iter()
            .find(|(stored, _)| stored == id)
            .map(|(_, bytes)| bytes.clone())
    }
}

#[async_trait]
impl UploadStore for MemoryUploadStore {
    async fn store(&self, name: &str, bytes: &[u8]) -> Result<StoredUpload> {
        let mut files = self.files.lock();
        let used: usize = files.iter().map(|(_, stored)| stored.len()).sum();
        if used.saturating_add(bytes.len()) > self.limit {
            warn!(used, limit = self.limit, requested = bytes.len(), "memory upload store full");
            return Err(StoreFull {
                limit: self.limit,
                used,
                requested: bytes.len(),
            }
            .into());
        }

        let id = Uuid::new_v4().simple().to_string();
        files.push((id.clone(), bytes.to_vec()));
        Ok(StoredUpload {
            id,
            name: name.to_owned(),
            size: bytes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_store_writes_one_file_per_upload() {
        let root = std::env::temp_dir().join(format!("raxm-uploads-{}", Uuid::new_v4()));
        let store = LocalUploadStore::new(&root);

        let first = store.store("avatar.png", b"avatar").await.unwrap();
        let second = store.store("../resume.pdf", b"resume").await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first.size, 6);
        assert_eq!(second.name, "../resume.pdf");

        let written = tokio::fs::read(store.path_for(&first.id)).await.unwrap();
        assert_eq!(written, b"avatar");
        assert!(store.path_for(&second.id).starts_with(&root));

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn memory_store_keeps_bytes_by_id() {
        let store = MemoryUploadStore::default();
        assert!(store.is_empty());

        let stored = store.store("hello.txt", b"hello").await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(stored.name, "hello.txt");
        assert_eq!(store.get(&stored.id).as_deref(), Some(&b"hello"[..]));
        assert!(store.get("missing").is_none());
    }

    #[tokio::test]
    async fn memory_store_refuses_uploads_past_its_limit() {
        let store = MemoryUploadStore::with_limit(8);
        store.store("a", b"12345").await.unwrap();

        let error = store.store("b", b"6789").await.unwrap_err();
        assert_eq!(
            error.downcast_ref::<StoreFull>(),
            Some(&StoreFull {
                limit: 8,
                used: 5,
                requested: 4,
            })
        );
        assert_eq!(store.len(), 1);

        store.store("c", b"678").await.unwrap();
        assert_eq!(store.used(), 8);
    }
}
