//! Torrent descriptor parsing and piece layout
//!
//! Descriptors are decoded with `serde_bencode`. The info-hash is computed
//! over the canonical re-encoding of the raw `info` dictionary so keys this
//! module does not model still contribute to the hash.

use std::path::Path;

use bytes::Bytes;
use serde::Deserialize;
use serde_bencode::value::Value;
use sha1::{Digest, Sha1};

use super::{InfoHash, PieceIndex, TorrentError};
use crate::storage::PieceKey;

#[derive(Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    announce: Option<String>,
    #[serde(default, rename = "announce-list")]
    announce_list: Option<Vec<Vec<String>>>,
    #[serde(default, rename = "creation date")]
    creation_date: Option<i64>,
    #[serde(default, rename = "url-list")]
    url_list: Option<Value>,
    info: Value,
}

#[derive(Deserialize)]
struct RawInfo {
    name: String,
    #[serde(rename = "piece length")]
    piece_length: u64,
    pieces: serde_bytes::ByteBuf,
    #[serde(default)]
    length: Option<u64>,
    #[serde(default)]
    files: Option<Vec<RawFile>>,
}

#[derive(Deserialize)]
struct RawFile {
    length: u64,
    path: Vec<String>,
}

/// One file inside a torrent.
///
/// `path` holds the display path segments: the path inside the torrent for
/// multi-file torrents, the torrent name for single-file torrents.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentFile {
    pub path: Vec<String>,
    pub length: u64,
    /// Byte offset of the file in the torrent's concatenated content
    pub offset: u64,
}

impl TorrentFile {
    /// Slash-joined display path, the form used in stream URLs.
    pub fn display_path(&self) -> String {
        self.path.join("/")
    }

    /// Final path segment.
    pub fn file_name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }
}

/// Part of a piece that lives inside a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceSegment {
    pub file_index: usize,
    pub file_offset: u64,
    pub length: u64,
}

/// Complete metadata extracted from a torrent descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Metainfo {
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u64,
    pub piece_hashes: Vec<[u8; 20]>,
    pub files: Vec<TorrentFile>,
    pub total_length: u64,
    pub trackers: Vec<String>,
    pub web_seeds: Vec<String>,
    pub creation_date: Option<i64>,
    pub multi_file: bool,
    descriptor: Bytes,
}

impl Metainfo {
    /// Parses a bencoded `.torrent` descriptor.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTorrentFile` - Malformed bencode, missing fields
    ///   or an inconsistent piece layout
    pub fn from_bytes(data: &[u8]) -> Result<Self, TorrentError> {
        let raw: RawDescriptor = serde_bencode::from_bytes(data).map_err(|e| invalid(e))?;

        let info_bytes = serde_bencode::to_bytes(&raw.info).map_err(|e| invalid(e))?;
        let info_hash = InfoHash::new(Sha1::digest(&info_bytes).into());
        let info: RawInfo = serde_bencode::from_bytes(&info_bytes).map_err(|e| invalid(e))?;

        if info.piece_length == 0 {
            return Err(invalid("piece length is zero"));
        }
        if info.pieces.len() % 20 != 0 {
            return Err(invalid("pieces field is not a multiple of 20 bytes"));
        }
        let piece_hashes: Vec<[u8; 20]> = info
            .pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let (files, multi_file) = match (info.length, info.files) {
            (Some(length), _) => (
                vec![TorrentFile {
                    path: vec![info.name.clone()],
                    length,
                    offset: 0,
                }],
                false,
            ),
            (None, Some(raw_files)) => {
                let mut offset = 0;
                let mut files = Vec::with_capacity(raw_files.len());
                for raw_file in raw_files {
                    if raw_file.path.is_empty() {
                        return Err(invalid("file entry with empty path"));
                    }
                    files.push(TorrentFile {
                        path: raw_file.path,
                        length: raw_file.length,
                        offset,
                    });
                    offset += raw_file.length;
                }
                (files, true)
            }
            (None, None) => return Err(invalid("missing 'files' or 'length' field")),
        };

        let total_length: u64 = files.iter().map(|f| f.length).sum();
        let expected_pieces = total_length.div_ceil(info.piece_length);
        if expected_pieces != piece_hashes.len() as u64 {
            return Err(invalid(format!(
                "expected {expected_pieces} pieces for {total_length} bytes, found {}",
                piece_hashes.len()
            )));
        }

        let mut trackers = Vec::new();
        if let Some(announce) = raw.announce {
            trackers.push(announce);
        }
        for url in raw.announce_list.into_iter().flatten().flatten() {
            if !trackers.contains(&url) {
                trackers.push(url);
            }
        }

        Ok(Self {
            info_hash,
            name: info.name,
            piece_length: info.piece_length,
            piece_hashes,
            files,
            total_length,
            trackers,
            web_seeds: raw.url_list.map(web_seeds_from).unwrap_or_default(),
            creation_date: raw.creation_date,
            multi_file,
            descriptor: Bytes::copy_from_slice(data),
        })
    }

    /// Reads and parses a descriptor file.
    ///
    /// # Errors
    ///
    /// - `TorrentError::Io` - File could not be read
    /// - `TorrentError::InvalidTorrentFile` - File content is not a descriptor
    pub async fn from_file(path: &Path) -> Result<Self, TorrentError> {
        let data = tokio::fs::read(path).await?;
        Self::from_bytes(&data)
    }

    /// The descriptor bytes this metainfo was parsed from.
    pub fn descriptor(&self) -> &Bytes {
        &self.descriptor
    }

    /// Adds web seeds learned outside the descriptor (magnet `ws`).
    pub fn with_extra_web_seeds(mut self, seeds: &[String]) -> Self {
        for seed in seeds {
            if !self.web_seeds.contains(seed) {
                self.web_seeds.push(seed.clone());
            }
        }
        self
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    /// Byte offset of a piece in the concatenated content.
    pub fn piece_offset(&self, index: PieceIndex) -> u64 {
        index.as_u32() as u64 * self.piece_length
    }

    /// Length of a piece; the last piece may be short.
    pub fn piece_len(&self, index: PieceIndex) -> u64 {
        let start = self.piece_offset(index);
        self.piece_length.min(self.total_length.saturating_sub(start))
    }

    /// Piece containing the given absolute content offset.
    pub fn piece_at(&self, offset: u64) -> PieceIndex {
        PieceIndex::new((offset / self.piece_length) as u32)
    }

    /// Cache key of a piece, the hex of its SHA-1 hash.
    pub fn piece_key(&self, index: PieceIndex) -> Option<PieceKey> {
        self.piece_hashes
            .get(index.as_u32() as usize)
            .map(PieceKey::from_hash)
    }

    /// Checks piece data against its recorded hash.
    pub fn verify_piece(&self, index: PieceIndex, data: &[u8]) -> bool {
        match self.piece_hashes.get(index.as_u32() as usize) {
            Some(expected) => {
                let actual: [u8; 20] = Sha1::digest(data).into();
                &actual == expected
            }
            None => false,
        }
    }

    /// Splits a piece into the file ranges it covers.
    pub fn piece_segments(&self, index: PieceIndex) -> Vec<PieceSegment> {
        let start = self.piece_offset(index);
        let end = start + self.piece_len(index);
        self.files
            .iter()
            .enumerate()
            .filter(|(_, file)| file.length > 0)
            .filter_map(|(file_index, file)| {
                let file_end = file.offset + file.length;
                let overlap_start = start.max(file.offset);
                let overlap_end = end.min(file_end);
                (overlap_start < overlap_end).then(|| PieceSegment {
                    file_index,
                    file_offset: overlap_start - file.offset,
                    length: overlap_end - overlap_start,
                })
            })
            .collect()
    }

    /// Finds a file by its exact display path.
    pub fn file_by_display_path(&self, display_path: &str) -> Option<(usize, &TorrentFile)> {
        self.files
            .iter()
            .enumerate()
            .find(|(_, file)| file.display_path() == display_path)
    }
}

fn invalid(reason: impl ToString) -> TorrentError {
    TorrentError::InvalidTorrentFile {
        reason: reason.to_string(),
    }
}

fn web_seeds_from(value: Value) -> Vec<String> {
    match value {
        Value::Bytes(bytes) => String::from_utf8(bytes).into_iter().collect(),
        Value::List(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Bytes(bytes) => String::from_utf8(bytes).ok(),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
    .into_iter()
    .filter(|seed| !seed.is_empty())
    .collect()
}
