//! Where piece bytes and metadata come from when the cache misses.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::RANGE;
use tokio::sync::Semaphore;

use crate::torrent::{InfoHash, Metainfo, PieceIndex, TorrentError, TorrentFile};

/// Supplier of raw, unverified piece data and torrent metadata.
#[async_trait]
pub trait PieceSource: Send + Sync {
    /// Fetches the bytes of one piece. The caller verifies the hash.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PieceUnavailable` - No source could provide the piece
    async fn fetch_piece(&self, metainfo: &Metainfo, index: PieceIndex) -> Result<Bytes, TorrentError>;

    /// Fetches a torrent descriptor from an exact-source URL.
    ///
    /// # Errors
    ///
    /// - `TorrentError::Http` - Request failed
    async fn fetch_metadata(&self, url: &str) -> Result<Bytes, TorrentError>;

    /// Drops per-torrent resources once a torrent is removed.
    fn release(&self, _info_hash: &InfoHash) {}
}

/// Web seed (BEP 19) source using HTTP range requests.
///
/// Concurrent requests per torrent are capped by a semaphore sized from the
/// max-connections setting.
#[derive(Debug)]
pub struct HttpSource {
    client: reqwest::Client,
    max_conns: usize,
    permits: Mutex<HashMap<InfoHash, Arc<Semaphore>>>,
}

impl HttpSource {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// - `TorrentError::Http` - Client construction failed
    pub fn new(
        max_conns_per_torrent: usize,
        local_addr: Option<IpAddr>,
        timeout: Duration,
    ) -> Result<Self, TorrentError> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("undertow/", env!("CARGO_PKG_VERSION")));
        if local_addr.is_some() {
            builder = builder.local_address(local_addr);
        }

        Ok(Self {
            client: builder.build()?,
            max_conns: max_conns_per_torrent.max(1),
            permits: Mutex::new(HashMap::new()),
        })
    }

    fn semaphore(&self, info_hash: InfoHash) -> Arc<Semaphore> {
        Arc::clone(
            self.permits
                .lock()
                .entry(info_hash)
                .or_insert_with(|| Arc::new(Semaphore::new(self.max_conns))),
        )
    }

    async fn fetch_range(&self, url: &str, offset: u64, length: u64) -> Result<Bytes, String> {
        let range = format!("bytes={}-{}", offset, offset + length - 1);
        let response = self
            .client
            .get(url)
            .header(RANGE, range)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        let data = match status {
            StatusCode::PARTIAL_CONTENT => body,
            // Server ignored the range and sent the whole file
            StatusCode::OK if body.len() as u64 >= offset + length => {
                body.slice(offset as usize..(offset + length) as usize)
            }
            other => return Err(format!("unexpected status {other}")),
        };
        if data.len() as u64 != length {
            return Err(format!("expected {length} bytes, got {}", data.len()));
        }
        Ok(data)
    }
}

/// Location of a file on a web seed.
///
/// A seed URL ending in `/` is a directory: the torrent name (and for
/// multi-file torrents the file path) is appended. Otherwise a single-file
/// torrent's seed URL points at the file itself.
pub fn web_seed_url(seed: &str, metainfo: &Metainfo, file: &TorrentFile) -> String {
    if !metainfo.multi_file {
        if seed.ends_with('/') {
            return format!("{seed}{}", urlencoding::encode(&metainfo.name));
        }
        return seed.to_string();
    }

    let mut url = seed.to_string();
    if !url.ends_with('/') {
        url.push('/');
    }
    url.push_str(&urlencoding::encode(&metainfo.name));
    for segment in &file.path {
        url.push('/');
        url.push_str(&urlencoding::encode(segment));
    }
    url
}

#[async_trait]
impl PieceSource for HttpSource {
    async fn fetch_piece(&self, metainfo: &Metainfo, index: PieceIndex) -> Result<Bytes, TorrentError> {
        if metainfo.web_seeds.is_empty() {
            return Err(TorrentError::PieceUnavailable {
                index,
                reason: "no web seeds".to_string(),
            });
        }

        let semaphore = self.semaphore(metainfo.info_hash);
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|_| TorrentError::EngineShutdown)?;

        let mut piece = BytesMut::with_capacity(metainfo.piece_len(index) as usize);
        for segment in metainfo.piece_segments(index) {
            let file = &metainfo.files[segment.file_index];
            let mut last_error = String::new();
            let mut fetched = None;
            for seed in &metainfo.web_seeds {
                let url = web_seed_url(seed, metainfo, file);
                match self.fetch_range(&url, segment.file_offset, segment.length).await {
                    Ok(data) => {
                        fetched = Some(data);
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(url = %url, piece = %index, error = %e, "Web seed request failed");
                        last_error = e;
                    }
                }
            }
            let data = fetched.ok_or_else(|| TorrentError::PieceUnavailable {
                index,
                reason: last_error,
            })?;
            piece.extend_from_slice(&data);
        }
        Ok(piece.freeze())
    }

    async fn fetch_metadata(&self, url: &str) -> Result<Bytes, TorrentError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?)
    }

    fn release(&self, info_hash: &InfoHash) {
        if let Some(semaphore) = self.permits.lock().remove(info_hash) {
            semaphore.close();
        }
    }
}
