//! Identifier classification and torrent ingestion.
//!
//! Input shapes are tried in a fixed priority order: HTTP(S) URL, path to a
//! `.torrent` file, bare 40-character hex info-hash, magnet URI. The first
//! match wins even when a later pattern would also match.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;

use crate::engine::{TorrentEngine, TorrentSession};
use crate::torrent::{InfoHash, MagnetLink, Metainfo, TorrentError};

/// Shape of a torrent identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    Url,
    DescriptorFile,
    InfoHash,
    Magnet,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Url => "url",
            Self::DescriptorFile => "descriptor-file",
            Self::InfoHash => "info-hash",
            Self::Magnet => "magnet",
        })
    }
}

static PATTERNS: LazyLock<Vec<(IdentifierKind, Regex)>> = LazyLock::new(|| {
    [
        (IdentifierKind::Url, r"^https?"),
        (IdentifierKind::DescriptorFile, r"\.torrent$"),
        (IdentifierKind::InfoHash, r"^[0-9a-fA-F]{40}$"),
        (IdentifierKind::Magnet, r"^magnet:"),
    ]
    .into_iter()
    .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (kind, re)))
    .collect()
});

/// Classifies input without any I/O.
pub fn classify_kind(input: &str) -> Option<IdentifierKind> {
    let input = input.trim();
    PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(input))
        .map(|(kind, _)| *kind)
}

/// A classified torrent identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentIdentifier {
    Url(String),
    DescriptorFile(PathBuf),
    InfoHash(InfoHash),
    Magnet(String),
}

impl TorrentIdentifier {
    /// Classifies trimmed input.
    ///
    /// # Errors
    ///
    /// - `IngestError::InvalidTorrentIdentifier` - Input matches no known shape
    pub fn classify(input: &str) -> Result<Self, IngestError> {
        let trimmed = input.trim();
        let invalid = || IngestError::InvalidTorrentIdentifier {
            input: trimmed.to_string(),
        };
        match classify_kind(trimmed).ok_or_else(invalid)? {
            IdentifierKind::Url => Ok(Self::Url(trimmed.to_string())),
            IdentifierKind::DescriptorFile => Ok(Self::DescriptorFile(PathBuf::from(trimmed))),
            IdentifierKind::InfoHash => InfoHash::from_hex(trimmed)
                .map(Self::InfoHash)
                .map_err(|_| invalid()),
            IdentifierKind::Magnet => Ok(Self::Magnet(trimmed.to_string())),
        }
    }

    pub fn kind(&self) -> IdentifierKind {
        match self {
            Self::Url(_) => IdentifierKind::Url,
            Self::DescriptorFile(_) => IdentifierKind::DescriptorFile,
            Self::InfoHash(_) => IdentifierKind::InfoHash,
            Self::Magnet(_) => IdentifierKind::Magnet,
        }
    }
}

/// Errors raised while adding a torrent from an identifier.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Invalid torrent identifier: {input}")]
    InvalidTorrentIdentifier { input: String },

    #[error("Failed to fetch torrent from {url}: {reason}")]
    RemoteFetch { url: String, reason: String },

    #[error(transparent)]
    Torrent(#[from] TorrentError),
}

/// Hands classified identifiers to the engine.
#[derive(Clone)]
pub struct Ingestor {
    engine: Arc<dyn TorrentEngine>,
    http: reqwest::Client,
}

impl Ingestor {
    /// Creates an ingestor whose descriptor downloads time out after `fetch_timeout`.
    ///
    /// # Errors
    ///
    /// - `IngestError::Torrent` - HTTP client construction failed
    pub fn new(engine: Arc<dyn TorrentEngine>, fetch_timeout: Duration) -> Result<Self, IngestError> {
        let http = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(TorrentError::from)?;
        Ok(Self { engine, http })
    }

    pub fn engine(&self) -> &Arc<dyn TorrentEngine> {
        &self.engine
    }

    /// Classifies `input` and adds the torrent.
    ///
    /// The returned session may still be unresolved.
    ///
    /// # Errors
    ///
    /// - `IngestError::InvalidTorrentIdentifier` - Unclassifiable input
    /// - `IngestError::RemoteFetch` - URL could not be downloaded
    /// - `IngestError::Torrent` - Descriptor or magnet invalid, or engine refused
    pub async fn ingest(&self, input: &str) -> Result<Arc<TorrentSession>, IngestError> {
        let identifier = TorrentIdentifier::classify(input)?;
        tracing::info!(kind = %identifier.kind(), input = %input.trim(), "Adding torrent");

        let session = match identifier {
            TorrentIdentifier::Url(url) => {
                let metainfo = self.fetch_descriptor(&url).await?;
                self.engine.add_metainfo(metainfo).await?
            }
            TorrentIdentifier::DescriptorFile(path) => self.engine.add_descriptor_file(&path).await?,
            TorrentIdentifier::InfoHash(info_hash) => self.engine.add_info_hash(info_hash).await?,
            TorrentIdentifier::Magnet(uri) => {
                let magnet = MagnetLink::parse(&uri)?;
                self.engine.add_magnet(magnet).await?
            }
        };

        tracing::debug!(info_hash = %session.info_hash(), resolved = session.is_resolved(), "Torrent added");
        Ok(session)
    }

    async fn fetch_descriptor(&self, url: &str) -> Result<Metainfo, IngestError> {
        let remote_error = |e: reqwest::Error| IngestError::RemoteFetch {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(remote_error)?;
        let body = response.bytes().await.map_err(remote_error)?;
        Ok(Metainfo::from_bytes(&body)?)
    }
}
