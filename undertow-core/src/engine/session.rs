//! Torrent session state shared between the engine and its callers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::torrent::{InfoHash, MagnetLink, Metainfo, TorrentError};

/// One torrent known to the engine.
///
/// A session exists as soon as the torrent is added but its file list is
/// only known once metadata arrives. Readiness is published through a watch
/// channel so any number of waiters observe the same transition.
#[derive(Debug)]
pub struct TorrentSession {
    info_hash: InfoHash,
    display_name: Option<String>,
    trackers: Vec<String>,
    extra_web_seeds: Vec<String>,
    metadata: watch::Sender<Option<Arc<Metainfo>>>,
    resolver: Mutex<Option<JoinHandle<()>>>,
    added_at: DateTime<Utc>,
}

impl TorrentSession {
    /// Session still waiting for metadata.
    pub fn unresolved(info_hash: InfoHash) -> Self {
        let (metadata, _) = watch::channel(None);
        Self {
            info_hash,
            display_name: None,
            trackers: Vec::new(),
            extra_web_seeds: Vec::new(),
            metadata,
            resolver: Mutex::new(None),
            added_at: Utc::now(),
        }
    }

    /// Session created from a magnet link, unresolved until a source answers.
    pub fn from_magnet(magnet: &MagnetLink) -> Self {
        Self {
            display_name: magnet.display_name.clone(),
            trackers: magnet.trackers.clone(),
            extra_web_seeds: magnet.web_seeds.clone(),
            ..Self::unresolved(magnet.info_hash)
        }
    }

    /// Session whose metadata is already known.
    pub fn resolved(metainfo: Metainfo) -> Self {
        let session = Self::unresolved(metainfo.info_hash);
        session.metadata.send_replace(Some(Arc::new(metainfo)));
        session
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Best known name: metadata name, then magnet display name, then the hash.
    pub fn name(&self) -> String {
        if let Some(metainfo) = self.metainfo() {
            return metainfo.name.clone();
        }
        self.display_name
            .clone()
            .unwrap_or_else(|| self.info_hash.to_string())
    }

    pub fn trackers(&self) -> Vec<String> {
        match self.metainfo() {
            Some(metainfo) if !metainfo.trackers.is_empty() => metainfo.trackers.clone(),
            _ => self.trackers.clone(),
        }
    }

    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    /// Metadata if already resolved.
    pub fn metainfo(&self) -> Option<Arc<Metainfo>> {
        self.metadata.borrow().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.metadata.borrow().is_some()
    }

    /// Waits until metadata is available.
    ///
    /// Dropping the returned future cancels the wait, so callers bound it
    /// with their own request lifetime or timeout.
    ///
    /// # Errors
    ///
    /// - `TorrentError::EngineShutdown` - Readiness channel closed
    pub async fn wait_for_metadata(&self) -> Result<Arc<Metainfo>, TorrentError> {
        let mut rx = self.metadata.subscribe();
        let ready = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| TorrentError::EngineShutdown)?;
        ready.clone().ok_or(TorrentError::EngineShutdown)
    }

    /// Publishes metadata. Returns `false` if the session was already resolved.
    ///
    /// # Errors
    ///
    /// - `TorrentError::MetadataMismatch` - Metadata belongs to another torrent
    pub fn resolve(&self, metainfo: Metainfo) -> Result<bool, TorrentError> {
        if metainfo.info_hash != self.info_hash {
            return Err(TorrentError::MetadataMismatch {
                info_hash: self.info_hash,
                actual: metainfo.info_hash,
            });
        }
        let metainfo = Arc::new(metainfo.with_extra_web_seeds(&self.extra_web_seeds));
        let newly_resolved = self.metadata.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(metainfo);
            true
        });
        if newly_resolved {
            self.abort_resolver();
        }
        Ok(newly_resolved)
    }

    /// Attaches the background task fetching this session's metadata.
    pub fn set_resolver(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.resolver.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stops metadata resolution, if still running.
    pub fn abort_resolver(&self) {
        if let Some(handle) = self.resolver.lock().take() {
            handle.abort();
        }
    }
}
