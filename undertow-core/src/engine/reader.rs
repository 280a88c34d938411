//! Seekable reader over one file of a resolved torrent.

use std::collections::HashSet;
use std::io;
use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use lru::LruCache;
use parking_lot::Mutex;

use super::source::PieceSource;
use crate::storage::{PieceCache, PieceKey};
use crate::torrent::{Metainfo, PieceIndex, TorrentError, TorrentFile};

/// Chunk size yielded by [`FileReader::into_stream`].
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

const HOT_PIECES: usize = 32;

/// Read mode options for opening a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOptions {
    /// Return fetched data before it is verified and stored
    pub responsive: bool,
    /// Bytes to prefetch ahead of the cursor; `None` uses the engine default
    pub readahead: Option<u64>,
}

/// Loads pieces through the hot cache, the piece cache and the source.
pub struct PieceFetcher {
    cache: Arc<dyn PieceCache>,
    source: Arc<dyn PieceSource>,
    hot: Mutex<LruCache<(PieceIndex, [u8; 20]), Bytes>>,
    /// Pieces with a readahead fetch running
    prefetching: Mutex<HashSet<(PieceIndex, [u8; 20])>>,
}

impl PieceFetcher {
    pub fn new(cache: Arc<dyn PieceCache>, source: Arc<dyn PieceSource>) -> Self {
        let capacity = NonZeroUsize::new(HOT_PIECES).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache,
            source,
            hot: Mutex::new(LruCache::new(capacity)),
            prefetching: Mutex::new(HashSet::new()),
        }
    }

    pub fn cache(&self) -> Arc<dyn PieceCache> {
        Arc::clone(&self.cache)
    }

    pub fn source(&self) -> Arc<dyn PieceSource> {
        Arc::clone(&self.source)
    }

    fn hot_key(metainfo: &Metainfo, index: PieceIndex) -> Option<(PieceIndex, [u8; 20])> {
        metainfo
            .piece_hashes
            .get(index.as_u32() as usize)
            .map(|hash| (index, *hash))
    }

    /// Returns piece data, fetching it if needed.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PieceHashMismatch` - Source data failed verification
    ///   (non-responsive mode only)
    /// - `TorrentError::PieceUnavailable` - Piece index out of range or no source
    pub async fn piece(
        self: &Arc<Self>,
        metainfo: &Arc<Metainfo>,
        index: PieceIndex,
        responsive: bool,
    ) -> Result<Bytes, TorrentError> {
        let hot_key = Self::hot_key(metainfo, index).ok_or_else(|| TorrentError::PieceUnavailable {
            index,
            reason: "piece index out of range".to_string(),
        })?;
        if let Some(data) = self.hot.lock().get(&hot_key).cloned() {
            return Ok(data);
        }

        let key = PieceKey::from_hash(&hot_key.1);
        match self.cache.get(&key).await {
            Ok(Some(data)) => {
                self.hot.lock().put(hot_key, data.clone());
                return Ok(data);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "Piece cache read failed"),
        }

        let data = self.source.fetch_piece(metainfo, index).await?;

        if responsive {
            self.hot.lock().put(hot_key, data.clone());
            let fetcher = Arc::clone(self);
            let metainfo = Arc::clone(metainfo);
            let unverified = data.clone();
            tokio::spawn(async move {
                if metainfo.verify_piece(index, &unverified) {
                    fetcher.store(&key, unverified).await;
                } else {
                    tracing::warn!(info_hash = %metainfo.info_hash, piece = %index, "Responsive read served a corrupt piece");
                    fetcher.hot.lock().pop(&hot_key);
                }
            });
            return Ok(data);
        }

        if !metainfo.verify_piece(index, &data) {
            return Err(TorrentError::PieceHashMismatch { index });
        }
        self.store(&key, data.clone()).await;
        self.hot.lock().put(hot_key, data.clone());
        Ok(data)
    }

    /// Starts background fetches for pieces not yet cached.
    ///
    /// A piece already being prefetched is skipped, so overlapping readers
    /// share one fetch per piece.
    pub fn prefetch(self: &Arc<Self>, metainfo: &Arc<Metainfo>, pieces: impl IntoIterator<Item = PieceIndex>) {
        for index in pieces {
            let Some(hot_key) = Self::hot_key(metainfo, index) else {
                continue;
            };
            if self.hot.lock().contains(&hot_key) || !self.prefetching.lock().insert(hot_key) {
                continue;
            }
            let fetcher = Arc::clone(self);
            let metainfo = Arc::clone(metainfo);
            tokio::spawn(async move {
                let key = PieceKey::from_hash(&hot_key.1);
                if !matches!(fetcher.cache.contains(&key).await, Ok(true)) {
                    if let Err(e) = fetcher.piece(&metainfo, index, false).await {
                        tracing::debug!(piece = %index, error = %e, "Readahead fetch failed");
                    }
                }
                fetcher.prefetching.lock().remove(&hot_key);
            });
        }
    }

    /// Number of readahead fetches still running.
    pub fn prefetches_in_flight(&self) -> usize {
        self.prefetching.lock().len()
    }

    async fn store(&self, key: &PieceKey, data: Bytes) {
        if let Err(e) = self.cache.put(key, data).await {
            tracing::warn!(key = %key, error = %e, "Failed to store piece");
        }
    }
}

/// Cursor over one file, reading through the piece layout.
pub struct FileReader {
    metainfo: Arc<Metainfo>,
    file: TorrentFile,
    position: u64,
    responsive: bool,
    readahead: u64,
    prefetched_until: Option<PieceIndex>,
    fetcher: Arc<PieceFetcher>,
}

impl FileReader {
    /// Creates a reader positioned at the start of the file.
    ///
    /// # Errors
    ///
    /// - `TorrentError::FileNotFound` - Index outside the torrent's file list
    pub fn new(
        metainfo: Arc<Metainfo>,
        file_index: usize,
        responsive: bool,
        readahead: u64,
        fetcher: Arc<PieceFetcher>,
    ) -> Result<Self, TorrentError> {
        let file = metainfo
            .files
            .get(file_index)
            .cloned()
            .ok_or(TorrentError::FileNotFound {
                info_hash: metainfo.info_hash,
                index: file_index,
            })?;
        Ok(Self {
            metainfo,
            file,
            position: 0,
            responsive,
            readahead,
            prefetched_until: None,
            fetcher,
        })
    }

    pub fn file(&self) -> &TorrentFile {
        &self.file
    }

    pub fn metainfo(&self) -> &Arc<Metainfo> {
        &self.metainfo
    }

    pub fn len(&self) -> u64 {
        self.file.length
    }

    pub fn is_empty(&self) -> bool {
        self.file.length == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Moves the cursor. Positions past the end read as end of file.
    pub fn seek(&mut self, position: u64) {
        self.position = position;
        self.prefetched_until = None;
    }

    /// Reads up to `max` bytes at the cursor, returning an empty buffer at end of file.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PieceHashMismatch` - Piece failed verification
    /// - `TorrentError::PieceUnavailable` - Piece could not be fetched
    pub async fn read_chunk(&mut self, max: usize) -> Result<Bytes, TorrentError> {
        if self.position >= self.file.length || max == 0 {
            return Ok(Bytes::new());
        }

        let absolute = self.file.offset + self.position;
        let index = self.metainfo.piece_at(absolute);
        self.schedule_readahead(index, absolute);

        let piece = self
            .fetcher
            .piece(&self.metainfo, index, self.responsive)
            .await?;
        let start = (absolute - self.metainfo.piece_offset(index)) as usize;
        let remaining_in_file = self.file.length - self.position;
        let len = (piece.len().saturating_sub(start) as u64)
            .min(remaining_in_file)
            .min(max as u64) as usize;
        if len == 0 {
            return Err(TorrentError::PieceUnavailable {
                index,
                reason: "piece shorter than expected".to_string(),
            });
        }

        self.position += len as u64;
        Ok(piece.slice(start..start + len))
    }

    /// Reads from the cursor to the end of the file.
    ///
    /// # Errors
    ///
    /// Same as [`FileReader::read_chunk`].
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, TorrentError> {
        let mut out = Vec::with_capacity((self.file.length - self.position.min(self.file.length)) as usize);
        loop {
            let chunk = self.read_chunk(STREAM_CHUNK_SIZE).await?;
            if chunk.is_empty() {
                return Ok(out);
            }
            out.extend_from_slice(&chunk);
        }
    }

    /// Streams at most `limit` bytes from the cursor.
    pub fn into_stream(self, limit: u64) -> impl Stream<Item = Result<Bytes, io::Error>> + Send {
        futures::stream::unfold((self, limit), |(mut reader, remaining)| async move {
            if remaining == 0 {
                return None;
            }
            let want = remaining.min(STREAM_CHUNK_SIZE as u64) as usize;
            match reader.read_chunk(want).await {
                Ok(chunk) if chunk.is_empty() => None,
                Ok(chunk) => {
                    let left = remaining - chunk.len() as u64;
                    Some((Ok(chunk), (reader, left)))
                }
                Err(e) => Some((Err(io::Error::other(e)), (reader, 0))),
            }
        })
    }

    fn schedule_readahead(&mut self, current: PieceIndex, absolute: u64) {
        if self.readahead == 0 {
            return;
        }
        let file_end = self.file.offset + self.file.length;
        let window_end = (absolute + self.readahead).min(file_end);
        if window_end <= absolute {
            return;
        }
        let last = self.metainfo.piece_at(window_end - 1);
        let first = match self.prefetched_until {
            Some(done) if done >= last => return,
            Some(done) => done.as_u32() + 1,
            None => current.as_u32() + 1,
        };
        if first <= last.as_u32() {
            self.fetcher
                .prefetch(&self.metainfo, (first..=last.as_u32()).map(PieceIndex::new));
        }
        self.prefetched_until = Some(last);
    }
}
