//! Storage for immutable document snapshots.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::DocumentId;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot not found: {0}")]
    NotFound(String),

    #[error("Invalid snapshot key: {0}")]
    InvalidKey(String),

    #[error("Snapshot already exists: {0}")]
    AlreadyExists(String),
}

/// Where a file landed and the SHA-256 of its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    pub storage_key: String,
    pub sha256: String,
}

/// Write-once file storage addressed by key. Storing under a key that is
/// already taken fails with `AlreadyExists` and leaves the file untouched.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<StoredFile, SnapshotError>;

    async fn load(&self, key: &str) -> Result<Vec<u8>, SnapshotError>;
}

/// `documents/<id>/v<version>/<prefix>_<UTC timestamp, microseconds>.pdf`
pub fn snapshot_key(id: DocumentId, version: i32, prefix: &str, at: DateTime<Utc>) -> String {
    format!(
        "documents/{id}/v{version}/{prefix}_{}.pdf",
        at.format("%Y%m%dT%H%M%S%6fZ")
    )
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Keeps snapshots as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsSnapshotStorage {
    root: PathBuf,
}

impl FsSnapshotStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, SnapshotError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(SnapshotError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl SnapshotStorage for FsSnapshotStorage {
    #[tracing::instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<StoredFile, SnapshotError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(SnapshotError::AlreadyExists(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        file.write_all(bytes).await?;
        file.sync_all().await?;

        Ok(StoredFile {
            storage_key: key.to_string(),
            sha256: sha256_hex(bytes),
        })
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>, SnapshotError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(SnapshotError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Snapshot storage held in memory, for tests and storage-less runs.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStorage {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemorySnapshotStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored files.
    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[async_trait]
impl SnapshotStorage for InMemorySnapshotStorage {
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<StoredFile, SnapshotError> {
        let mut files = self.files.write().await;
        if files.contains_key(key) {
            return Err(SnapshotError::AlreadyExists(key.to_string()));
        }
        files.insert(key.to_string(), bytes.to_vec());
        Ok(StoredFile {
            storage_key: key.to_string(),
            sha256: sha256_hex(bytes),
        })
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>, SnapshotError> {
        self.files
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| SnapshotError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_snapshot_key_layout() {
        let id = DocumentId::new();
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(
            snapshot_key(id, 2, "signed", at),
            format!("documents/{id}/v2/signed_20250307T090501000000Z.pdf")
        );
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fs_storage_rejects_escaping_keys() {
        let storage = FsSnapshotStorage::new("/tmp/snapshots");
        assert!(matches!(
            storage.resolve("../etc/passwd"),
            Err(SnapshotError::InvalidKey(_))
        ));
        assert!(matches!(
            storage.resolve("/abs/path.pdf"),
            Err(SnapshotError::InvalidKey(_))
        ));
        assert!(storage.resolve("documents/a/v1/signed.pdf").is_ok());
    }

    #[tokio::test]
    async fn test_fs_storage_round_trip() {
        let root = std::env::temp_dir().join(format!("snapshots-{}", DocumentId::new()));
        let storage = FsSnapshotStorage::new(&root);

        let stored = storage.store("documents/x/v1/signed.pdf", b"%PDF").await.unwrap();
        assert_eq!(stored.sha256, sha256_hex(b"%PDF"));
        assert_eq!(storage.load(&stored.storage_key).await.unwrap(), b"%PDF");
        assert!(matches!(
            storage.load("documents/x/v1/missing.pdf").await,
            Err(SnapshotError::NotFound(_))
        ));

        let second = storage.store("documents/x/v1/signed.pdf", b"%PDF-other").await;
        assert!(matches!(second, Err(SnapshotError::AlreadyExists(_))));
        assert_eq!(storage.load("documents/x/v1/signed.pdf").await.unwrap(), b"%PDF");

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_in_memory_storage_is_write_once() {
        let storage = InMemorySnapshotStorage::new();
        storage.store("documents/y/v1/signed.pdf", b"first").await.unwrap();

        let second = storage.store("documents/y/v1/signed.pdf", b"second").await;

        assert!(matches!(second, Err(SnapshotError::AlreadyExists(_))));
        assert_eq!(storage.load("documents/y/v1/signed.pdf").await.unwrap(), b"first");
        assert_eq!(storage.len().await, 1);
    }

    #[test]
    fn test_snapshot_keys_differ_within_a_second() {
        let id = DocumentId::new();
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 1).unwrap();
        let later = at + chrono::Duration::microseconds(250);
        assert_ne!(
            snapshot_key(id, 1, "signed", at),
            snapshot_key(id, 1, "signed", later)
        );
    }
}
