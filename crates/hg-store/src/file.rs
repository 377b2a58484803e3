//! Repository writing one JSON document per key under a root directory.
//!
//! Documents are replaced through a temp file and a rename, so readers only
//! ever observe complete states. Locks are held in process memory and do not
//! protect against a second process using the same directory.

use async_trait::async_trait;
use hg_types::{Key, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::repository::{Entity, LockOwner, LockTable, Repository};

#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    version: u64,
    entity: Entity,
}

/// File-backed repository.
#[derive(Debug)]
pub struct JsonFileRepository {
    root: PathBuf,
    locks: LockTable,
    // Serializes read-modify-write cycles on documents.
    writes: Mutex<()>,
}

impl JsonFileRepository {
    pub fn new<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::Io {
            key: root.display().to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            root,
            locks: LockTable::default(),
            writes: Mutex::new(()),
        })
    }

    /// `<data dir>/hypergrid`, falling back to the working directory.
    pub fn default_location() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hypergrid")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, key: &Key) -> PathBuf {
        self.root.join(format!("{}.json", file_stem(key)))
    }

    async fn read(&self, key: &Key) -> StoreResult<Option<StoredDocument>> {
        let path = self.document_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(key, e)),
        };
        let document: StoredDocument =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        Ok(Some(document))
    }

    async fn write(&self, key: &Key, document: &StoredDocument) -> StoreResult<()> {
        let path = self.document_path(key);
        let staging = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(document).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|e| io_error(key, e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| io_error(key, e))
    }
}

/// Percent-encodes every byte outside `[A-Za-z0-9._-]`, `%` included, so
/// distinct keys map to distinct file names.
fn file_stem(key: &Key) -> String {
    let mut stem = String::with_capacity(key.as_str().len());
    for byte in key.as_str().bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}

fn io_error(key: &Key, error: std::io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        message: error.to_string(),
    }
}

#[async_trait]
impl Repository for JsonFileRepository {
    async fn get(&self, key: &Key) -> StoreResult<Option<Entity>> {
        Ok(self.read(key).await?.map(|doc| doc.entity))
    }

    async fn version(&self, key: &Key) -> StoreResult<Option<u64>> {
        Ok(self.read(key).await?.map(|doc| doc.version))
    }

    async fn create_and_lock(&self, entity: Entity, owner: LockOwner) -> StoreResult<()> {
        let _guard = self.writes.lock().await;
        let key = entity.key().clone();
        if self.read(&key).await?.is_some() {
            return Err(StoreError::AlreadyExists {
                key: key.to_string(),
            });
        }
        self.locks.acquire(&key, owner)?;
        let document = StoredDocument { version: 1, entity };
        if let Err(e) = self.write(&key, &document).await {
            // Creation failed; do not leave a lock on a missing document.
            self.locks.release(&key, owner)?;
            return Err(e);
        }
        debug!(key = %key, owner = %owner, path = %self.document_path(&key).display(), "created and locked");
        Ok(())
    }

    async fn lock(&self, key: &Key, owner: LockOwner) -> StoreResult<()> {
        if self.read(key).await?.is_none() {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        }
        self.locks.acquire(key, owner)
    }

    async fn unlock(&self, key: &Key, owner: LockOwner) -> StoreResult<()> {
        self.locks.release(key, owner)
    }

    async fn persist(&self, entity: &Entity, owner: LockOwner) -> StoreResult<u64> {
        let key = entity.key();
        self.locks.ensure_held(key, owner)?;
        let _guard = self.writes.lock().await;
        let current = self.read(key).await?.ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        let document = StoredDocument {
            version: current.version + 1,
            entity: entity.clone(),
        };
        self.write(key, &document).await?;
        Ok(document.version)
    }

    async fn put(&self, entity: Entity) -> StoreResult<u64> {
        let key = entity.key().clone();
        self.locks.ensure_free(&key)?;
        let _guard = self.writes.lock().await;
        let version = match self.read(&key).await? {
            Some(current) => {
                current.entity.ensure_replaceable_by(&entity)?;
                current.version + 1
            }
            None => 1,
        };
        self.write(&key, &StoredDocument { version, entity }).await?;
        Ok(version)
    }
}
