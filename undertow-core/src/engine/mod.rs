//! Torrent engine boundary and the bundled default engine
//!
//! The gateway only talks to [`TorrentEngine`]. The bundled [`Engine`]
//! keeps sessions in memory, reads pieces from the piece cache and falls
//! back to HTTP web seeds; a peer-wire engine can be plugged in behind the
//! same trait.

pub mod reader;
pub mod runtime;
pub mod session;
pub mod source;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
pub use reader::{FileReader, PieceFetcher, ReadOptions, STREAM_CHUNK_SIZE};
pub use runtime::{DEFAULT_READAHEAD, Engine};
pub use session::TorrentSession;
pub use source::{HttpSource, PieceSource};

use crate::storage::PieceCache;
use crate::torrent::{InfoHash, MagnetLink, Metainfo, TorrentError};

/// Operations the gateway needs from a torrent engine.
///
/// Adding a torrent whose info-hash is already known returns the existing
/// session. Sessions may come back unresolved; callers await
/// [`TorrentSession::wait_for_metadata`] before touching files.
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Adds a torrent from a `.torrent` file on disk.
    ///
    /// # Errors
    ///
    /// - `TorrentError::Io` - File could not be read
    /// - `TorrentError::InvalidTorrentFile` - File is not a valid descriptor
    async fn add_descriptor_file(&self, path: &Path) -> Result<Arc<TorrentSession>, TorrentError> {
        let metainfo = Metainfo::from_file(path).await?;
        self.add_metainfo(metainfo).await
    }

    /// Adds a torrent from parsed metadata.
    ///
    /// # Errors
    ///
    /// - `TorrentError::EngineShutdown` - Engine no longer accepts torrents
    async fn add_metainfo(&self, metainfo: Metainfo) -> Result<Arc<TorrentSession>, TorrentError>;

    /// Adds a torrent by info-hash alone. The session stays unresolved until
    /// metadata is discovered.
    ///
    /// # Errors
    ///
    /// - `TorrentError::EngineShutdown` - Engine no longer accepts torrents
    async fn add_info_hash(&self, info_hash: InfoHash) -> Result<Arc<TorrentSession>, TorrentError>;

    /// Adds a torrent from a magnet link.
    ///
    /// # Errors
    ///
    /// - `TorrentError::EngineShutdown` - Engine no longer accepts torrents
    async fn add_magnet(&self, magnet: MagnetLink) -> Result<Arc<TorrentSession>, TorrentError>;

    /// All active sessions, in no particular order.
    fn sessions(&self) -> Vec<Arc<TorrentSession>>;

    fn session(&self, info_hash: &InfoHash) -> Option<Arc<TorrentSession>>;

    /// Drops a session from the engine. Cached piece data is left alone.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - No session with this info-hash
    async fn remove(&self, info_hash: &InfoHash) -> Result<Arc<TorrentSession>, TorrentError>;

    /// Opens a seekable reader on one file, waiting for metadata first.
    ///
    /// # Errors
    ///
    /// - `TorrentError::FileNotFound` - File index out of range
    /// - `TorrentError::EngineShutdown` - Engine stopped
    async fn open_file(
        &self,
        session: &TorrentSession,
        file_index: usize,
        options: ReadOptions,
    ) -> Result<FileReader, TorrentError>;

    /// Piece cache backing this engine.
    fn piece_cache(&self) -> Arc<dyn PieceCache>;

    /// Stops resolution tasks, drops sessions and closes the cache.
    ///
    /// # Errors
    ///
    /// - `TorrentError::Storage` - Cache failed to close
    async fn shutdown(&self) -> Result<(), TorrentError>;
}
