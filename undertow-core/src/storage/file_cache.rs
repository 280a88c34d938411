//! Directory-backed piece cache.
//!
//! Layout under the database root:
//!
//! ```text
//! torrents.db/
//!   ab/abcdef...     one file per piece, sharded by the first two hex chars
//!   .tmp/            in-flight writes, renamed into place when complete
//!   .trash/<txn>/    pieces staged by an open delete transaction
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;

use super::{PieceCache, PieceKey, StorageError};

const TMP_DIR: &str = ".tmp";
const TRASH_DIR: &str = ".trash";

/// Piece cache storing one file per piece.
///
/// Writes go through a temp file and an atomic rename, so readers never see
/// a partially written piece. Batch deletes move pieces into a transaction
/// directory first and move them back if any rename fails.
#[derive(Debug)]
pub struct FilePieceCache {
    root: PathBuf,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl FilePieceCache {
    /// Opens or creates the cache at `root`.
    ///
    /// Leftovers from an interrupted run are cleared: staged deletes are
    /// completed and half-written pieces dropped.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - Directory could not be created
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        for stale in [TMP_DIR, TRASH_DIR] {
            let path = root.join(stale);
            match fs::remove_dir_all(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "Cleared stale cache directory"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        fs::create_dir_all(root.join(TMP_DIR)).await?;

        Ok(Self {
            root,
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Database location for a download root.
    pub fn default_path(download_dir: &Path) -> PathBuf {
        download_dir.join("torrents.db")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Closes the cache and deletes the whole database.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - Removal failed
    pub async fn destroy(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn piece_path(&self, key: &PieceKey) -> PathBuf {
        let key = key.as_str();
        self.root.join(&key[..2]).join(key)
    }

    fn unique_name(&self) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-{id}", std::process::id())
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    async fn rollback(&self, txn_dir: &Path, staged: &[&PieceKey]) {
        for key in staged {
            let from = txn_dir.join(key.as_str());
            if let Err(e) = fs::rename(&from, self.piece_path(key)).await {
                tracing::error!(key = %key, error = %e, "Failed to restore piece during rollback");
            }
        }
        let _ = fs::remove_dir_all(txn_dir).await;
    }
}

#[async_trait]
impl PieceCache for FilePieceCache {
    async fn get(&self, key: &PieceKey) -> Result<Option<Bytes>, StorageError> {
        self.ensure_open()?;
        match fs::read(self.piece_path(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &PieceKey, data: Bytes) -> Result<(), StorageError> {
        self.ensure_open()?;
        let target = self.piece_path(key);
        if let Some(shard) = target.parent() {
            fs::create_dir_all(shard).await?;
        }
        let tmp = self.root.join(TMP_DIR).join(self.unique_name());
        fs::write(&tmp, &data).await?;
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn contains(&self, key: &PieceKey) -> Result<bool, StorageError> {
        self.ensure_open()?;
        Ok(fs::try_exists(self.piece_path(key)).await?)
    }

    async fn delete_many(&self, keys: &[PieceKey]) -> Result<usize, StorageError> {
        self.ensure_open()?;
        let txn_dir = self.root.join(TRASH_DIR).join(self.unique_name());
        fs::create_dir_all(&txn_dir).await?;

        let mut staged: Vec<&PieceKey> = Vec::new();
        for key in keys {
            match fs::rename(self.piece_path(key), txn_dir.join(key.as_str())).await {
                Ok(()) => staged.push(key),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    self.rollback(&txn_dir, &staged).await;
                    return Err(StorageError::PieceDelete {
                        key: key.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Commit: staged pieces are already invisible, so a failure here only
        // leaves garbage for the next open to clear.
        if let Err(e) = fs::remove_dir_all(&txn_dir).await {
            tracing::warn!(path = %txn_dir.display(), error = %e, "Failed to clear delete transaction");
        }
        Ok(staged.len())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
