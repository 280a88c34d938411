//! Saved descriptors for resuming torrents across restarts.
//!
//! One `<name>.torrent` file per torrent under `<download_dir>/torrents`,
//! holding the exact descriptor bytes the torrent was added with.

use std::io;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use tokio::fs;

use crate::engine::{TorrentEngine, TorrentSession};
use crate::torrent::InfoHash;

/// Errors from saving or removing descriptors.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Failed to write descriptor {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Failed to delete descriptor {path}: {source}")]
    Delete { path: PathBuf, source: io::Error },

    #[error("Failed to list saved descriptors in {path}: {source}")]
    List { path: PathBuf, source: io::Error },

    #[error("Torrent {info_hash} has no metadata to save yet")]
    Unresolved { info_hash: InfoHash },
}

/// Outcome of resuming saved torrents.
#[derive(Debug, Default)]
pub struct ResumeReport {
    pub resumed: Vec<InfoHash>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Directory of saved descriptors.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the saved descriptor for a torrent name.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.torrent", file_stem_for(name)))
    }

    /// Writes the session's descriptor, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// - `PersistenceError::Unresolved` - Session has no metadata
    /// - `PersistenceError::Write` - Directory or file could not be written
    pub async fn save(&self, session: &TorrentSession) -> Result<PathBuf, PersistenceError> {
        let metainfo = session.metainfo().ok_or(PersistenceError::Unresolved {
            info_hash: session.info_hash(),
        })?;
        let path = self.path_for(&metainfo.name);
        let write_error = |source| PersistenceError::Write {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).await.map_err(write_error)?;
        let tmp = path.with_extension("torrent.partial");
        fs::write(&tmp, metainfo.descriptor()).await.map_err(write_error)?;
        fs::rename(&tmp, &path).await.map_err(write_error)?;

        tracing::debug!(info_hash = %metainfo.info_hash, path = %path.display(), "Saved descriptor");
        Ok(path)
    }

    /// Deletes the saved descriptor for `name`. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// - `PersistenceError::Delete` - File exists but could not be removed
    pub async fn remove(&self, name: &str) -> Result<bool, PersistenceError> {
        let path = self.path_for(name);
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Deleted descriptor");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(PersistenceError::Delete { path, source }),
        }
    }

    /// Saved descriptor paths. A missing directory means none.
    ///
    /// # Errors
    ///
    /// - `PersistenceError::List` - Directory exists but could not be read
    pub async fn saved(&self) -> Result<Vec<PathBuf>, PersistenceError> {
        let list_error = |source| PersistenceError::List {
            path: self.dir.clone(),
            source,
        };
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(list_error(e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(list_error)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "torrent") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Re-adds every saved descriptor concurrently.
    ///
    /// Individual failures are logged and reported, never propagated; the
    /// call returns once the slowest resume finishes.
    pub async fn resume_all(&self, engine: &dyn TorrentEngine) -> ResumeReport {
        let paths = match self.saved().await {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list saved torrents");
                return ResumeReport::default();
            }
        };

        let results = join_all(paths.into_iter().map(|path| async move {
            let result = engine.add_descriptor_file(&path).await;
            (path, result)
        }))
        .await;

        let mut report = ResumeReport::default();
        for (path, result) in results {
            match result {
                Ok(session) => {
                    tracing::info!(info_hash = %session.info_hash(), path = %path.display(), "Resumed torrent");
                    report.resumed.push(session.info_hash());
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to resume torrent");
                    report.failed.push((path, e.to_string()));
                }
            }
        }
        report
    }
}

/// File stem for a torrent name, with path separators neutralized.
fn file_stem_for(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            other => other,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
