//! Default torrent engine backed by web seeds and the piece cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::reader::{FileReader, PieceFetcher, ReadOptions};
use super::session::TorrentSession;
use super::source::PieceSource;
use super::TorrentEngine;
use crate::storage::PieceCache;
use crate::torrent::{InfoHash, MagnetLink, Metainfo, TorrentError};

/// Readahead used when the caller does not pick one; also the configured default.
pub const DEFAULT_READAHEAD: u64 = 32 * 1024 * 1024;

/// Session table plus the piece pipeline.
///
/// The table is the only shared mutable state; handlers look sessions up
/// by info-hash and never hold the lock across an await.
pub struct Engine {
    sessions: RwLock<HashMap<InfoHash, Arc<TorrentSession>>>,
    fetcher: Arc<PieceFetcher>,
    default_readahead: u64,
    shut_down: AtomicBool,
}

impl Engine {
    pub fn new(cache: Arc<dyn PieceCache>, source: Arc<dyn PieceSource>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            fetcher: Arc::new(PieceFetcher::new(cache, source)),
            default_readahead: DEFAULT_READAHEAD,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Overrides the readahead used when [`ReadOptions::readahead`] is `None`.
    pub fn with_default_readahead(mut self, readahead: u64) -> Self {
        self.default_readahead = readahead;
        self
    }

    fn ensure_running(&self) -> Result<(), TorrentError> {
        if self.shut_down.load(Ordering::SeqCst) {
            Err(TorrentError::EngineShutdown)
        } else {
            Ok(())
        }
    }

    /// Inserts a session unless one with the same hash exists.
    ///
    /// Returns the session in the table and whether it was newly inserted.
    fn insert(&self, session: TorrentSession) -> (Arc<TorrentSession>, bool) {
        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(&session.info_hash()) {
            return (Arc::clone(existing), false);
        }
        let session = Arc::new(session);
        sessions.insert(session.info_hash(), Arc::clone(&session));
        (session, true)
    }

    fn spawn_resolver(&self, session: &Arc<TorrentSession>, sources: Vec<String>) {
        let source = self.fetcher.source();
        let target = Arc::clone(session);
        let handle = tokio::spawn(async move {
            for url in sources {
                let metainfo = match source.fetch_metadata(&url).await {
                    Ok(bytes) => Metainfo::from_bytes(&bytes),
                    Err(e) => Err(e),
                };
                match metainfo.and_then(|metainfo| target.resolve(metainfo)) {
                    Ok(_) => {
                        tracing::info!(info_hash = %target.info_hash(), source = %url, "Resolved metadata");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(info_hash = %target.info_hash(), source = %url, error = %e, "Metadata source failed");
                    }
                }
            }
            tracing::warn!(info_hash = %target.info_hash(), "No metadata source answered, session stays unresolved");
        });
        session.set_resolver(handle);
    }
}

#[async_trait]
impl TorrentEngine for Engine {
    async fn add_metainfo(&self, metainfo: Metainfo) -> Result<Arc<TorrentSession>, TorrentError> {
        self.ensure_running()?;
        let info_hash = metainfo.info_hash;
        let existing = self.sessions.read().get(&info_hash).cloned();
        if let Some(session) = existing {
            if session.resolve(metainfo)? {
                tracing::info!(info_hash = %info_hash, "Resolved pending session from added metadata");
            }
            return Ok(session);
        }

        let (session, inserted) = self.insert(TorrentSession::resolved(metainfo));
        if inserted {
            tracing::info!(info_hash = %info_hash, name = %session.name(), "Added torrent");
        }
        Ok(session)
    }

    async fn add_info_hash(&self, info_hash: InfoHash) -> Result<Arc<TorrentSession>, TorrentError> {
        self.ensure_running()?;
        let (session, inserted) = self.insert(TorrentSession::unresolved(info_hash));
        if inserted {
            tracing::info!(info_hash = %info_hash, "Added torrent by info hash, waiting for metadata");
        }
        Ok(session)
    }

    async fn add_magnet(&self, magnet: MagnetLink) -> Result<Arc<TorrentSession>, TorrentError> {
        self.ensure_running()?;
        let (session, inserted) = self.insert(TorrentSession::from_magnet(&magnet));
        if inserted {
            tracing::info!(info_hash = %magnet.info_hash, name = %session.name(), "Added magnet");
            if !magnet.exact_sources.is_empty() {
                self.spawn_resolver(&session, magnet.exact_sources);
            }
        }
        Ok(session)
    }

    fn sessions(&self) -> Vec<Arc<TorrentSession>> {
        self.sessions.read().values().cloned().collect()
    }

    fn session(&self, info_hash: &InfoHash) -> Option<Arc<TorrentSession>> {
        self.sessions.read().get(info_hash).cloned()
    }

    async fn remove(&self, info_hash: &InfoHash) -> Result<Arc<TorrentSession>, TorrentError> {
        let session = self
            .sessions
            .write()
            .remove(info_hash)
            .ok_or(TorrentError::TorrentNotFound {
                info_hash: *info_hash,
            })?;
        session.abort_resolver();
        self.fetcher.source().release(info_hash);
        tracing::info!(info_hash = %info_hash, "Removed torrent");
        Ok(session)
    }

    async fn open_file(
        &self,
        session: &TorrentSession,
        file_index: usize,
        options: ReadOptions,
    ) -> Result<FileReader, TorrentError> {
        self.ensure_running()?;
        let metainfo = session.wait_for_metadata().await?;
        FileReader::new(
            metainfo,
            file_index,
            options.responsive,
            options.readahead.unwrap_or(self.default_readahead),
            Arc::clone(&self.fetcher),
        )
    }

    fn piece_cache(&self) -> Arc<dyn PieceCache> {
        self.fetcher.cache()
    }

    async fn shutdown(&self) -> Result<(), TorrentError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let sessions: Vec<_> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.abort_resolver();
            self.fetcher.source().release(&session.info_hash());
        }
        self.fetcher.cache().close().await?;
        tracing::info!(sessions = sessions.len(), "Engine shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::storage::MemoryPieceCache;
    use crate::torrent::test_data::{MemorySource, TorrentBuilder, patterned_bytes};

    fn engine() -> (Engine, Arc<MemorySource>, Arc<MemoryPieceCache>) {
        let cache = Arc::new(MemoryPieceCache::new());
        let source = Arc::new(MemorySource::new());
        (Engine::new(cache.clone(), source.clone()), source, cache)
    }

    #[tokio::test]
    async fn test_add_metainfo_twice_returns_same_session() {
        let (engine, _, _) = engine();
        let torrent = TorrentBuilder::single("a.mp4", patterned_bytes(100, 1)).build();

        let first = engine.add_metainfo(torrent.metainfo.clone()).await.unwrap();
        let second = engine.add_metainfo(torrent.metainfo.clone()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.sessions().len(), 1);
        assert!(first.is_resolved());
    }

    #[tokio::test]
    async fn test_info_hash_session_resolves_when_metadata_added() {
        let (engine, _, _) = engine();
        let torrent = TorrentBuilder::single("a.mp4", patterned_bytes(100, 1)).build();

        let pending = engine.add_info_hash(torrent.info_hash()).await.unwrap();
        assert!(!pending.is_resolved());

        engine.add_metainfo(torrent.metainfo.clone()).await.unwrap();
        assert!(pending.is_resolved());
    }

    #[tokio::test]
    async fn test_magnet_resolves_from_exact_source() {
        let (engine, source, _) = engine();
        let torrent = TorrentBuilder::single("a.mp4", patterned_bytes(100, 1)).build();
        source.add_descriptor("http://host/a.torrent", &torrent);

        let magnet = MagnetLink {
            info_hash: torrent.info_hash(),
            display_name: None,
            trackers: Vec::new(),
            exact_sources: vec!["http://missing/x.torrent".to_string(), "http://host/a.torrent".to_string()],
            web_seeds: Vec::new(),
        };
        let session = engine.add_magnet(magnet).await.unwrap();
        let metainfo = tokio::time::timeout(Duration::from_secs(2), session.wait_for_metadata())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metainfo.name, "a.mp4");
    }

    #[tokio::test]
    async fn test_remove_unknown_is_not_found() {
        let (engine, _, _) = engine();
        assert!(matches!(
            engine.remove(&InfoHash::new([1; 20])).await,
            Err(TorrentError::TorrentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_file_reads_through_source() {
        let (engine, source, _) = engine();
        let torrent = TorrentBuilder::multi("set")
            .piece_length(512)
            .file("a.mkv", patterned_bytes(1_000, 1))
            .file("b.mkv", patterned_bytes(700, 2))
            .build();
        source.add_torrent(&torrent);
        let session = engine.add_metainfo(torrent.metainfo.clone()).await.unwrap();

        let mut reader = engine
            .open_file(&session, 1, ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(reader.read_to_end().await.unwrap(), torrent.file_data("b.mkv").unwrap());
        assert!(matches!(
            engine.open_file(&session, 7, ReadOptions::default()).await,
            Err(TorrentError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_cache_and_rejects_adds() {
        let (engine, _, cache) = engine();
        engine.add_info_hash(InfoHash::new([1; 20])).await.unwrap();

        engine.shutdown().await.unwrap();
        assert!(cache.is_closed());
        assert!(engine.sessions().is_empty());
        assert!(matches!(
            engine.add_info_hash(InfoHash::new([2; 20])).await,
            Err(TorrentError::EngineShutdown)
        ));
    }
}
