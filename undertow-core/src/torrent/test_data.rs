//! Test data creation for torrent testing.
//!
//! Builds real bencoded descriptors from in-memory content so tests exercise
//! the same parsing path as descriptors fetched from disk or the network.
//! Also provides an in-memory piece source serving that content.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};

use super::{InfoHash, Metainfo, PieceIndex, TorrentError};
use crate::engine::PieceSource;

#[derive(Serialize)]
struct DescriptorOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    announce: Option<String>,
    #[serde(rename = "creation date", skip_serializing_if = "Option::is_none")]
    creation_date: Option<i64>,
    info: InfoOut,
    #[serde(rename = "url-list", skip_serializing_if = "Vec::is_empty")]
    url_list: Vec<String>,
}

#[derive(Serialize)]
struct InfoOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<FileOut>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    name: String,
    #[serde(rename = "piece length")]
    piece_length: u64,
    pieces: ByteBuf,
}

#[derive(Serialize)]
struct FileOut {
    length: u64,
    path: Vec<String>,
}

/// Descriptor bytes plus the content they describe.
#[derive(Debug, Clone)]
pub struct TestTorrent {
    pub descriptor: Vec<u8>,
    pub metainfo: Metainfo,
    /// All file contents concatenated in descriptor order
    pub content: Vec<u8>,
}

impl TestTorrent {
    pub fn info_hash(&self) -> InfoHash {
        self.metainfo.info_hash
    }

    /// Expected bytes of a piece.
    pub fn piece_data(&self, index: PieceIndex) -> &[u8] {
        let start = self.metainfo.piece_offset(index) as usize;
        let end = start + self.metainfo.piece_len(index) as usize;
        &self.content[start..end]
    }

    /// Expected bytes of the file with the given display path.
    pub fn file_data(&self, display_path: &str) -> Option<&[u8]> {
        let (_, file) = self.metainfo.file_by_display_path(display_path)?;
        let start = file.offset as usize;
        Some(&self.content[start..start + file.length as usize])
    }
}

/// Builder for single-file and multi-file test descriptors.
#[derive(Debug, Clone)]
pub struct TorrentBuilder {
    name: String,
    piece_length: u64,
    single: bool,
    files: Vec<(Vec<String>, Vec<u8>)>,
    web_seeds: Vec<String>,
    announce: Option<String>,
    creation_date: Option<i64>,
}

impl TorrentBuilder {
    /// Single-file torrent whose only file is named `name`.
    pub fn single(name: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            piece_length: 16_384,
            single: true,
            files: vec![(vec![name.to_string()], data)],
            web_seeds: Vec::new(),
            announce: None,
            creation_date: None,
        }
    }

    /// Multi-file torrent; add files with [`TorrentBuilder::file`].
    pub fn multi(name: &str) -> Self {
        Self {
            single: false,
            files: Vec::new(),
            ..Self::single(name, Vec::new())
        }
    }

    /// Adds a file at a slash separated path inside the torrent.
    pub fn file(mut self, path: &str, data: Vec<u8>) -> Self {
        let segments = path.split('/').map(str::to_string).collect();
        self.files.push((segments, data));
        self
    }

    pub fn piece_length(mut self, piece_length: u64) -> Self {
        self.piece_length = piece_length;
        self
    }

    pub fn web_seed(mut self, url: &str) -> Self {
        self.web_seeds.push(url.to_string());
        self
    }

    pub fn announce(mut self, url: &str) -> Self {
        self.announce = Some(url.to_string());
        self
    }

    pub fn creation_date(mut self, timestamp: i64) -> Self {
        self.creation_date = Some(timestamp);
        self
    }

    /// Encodes the descriptor and parses it back.
    ///
    /// # Panics
    ///
    /// Panics if the builder produced an unparseable descriptor, which only
    /// happens on a bug in this module.
    pub fn build(self) -> TestTorrent {
        let content: Vec<u8> = self
            .files
            .iter()
            .flat_map(|(_, data)| data.iter().copied())
            .collect();

        let pieces: Vec<u8> = content
            .chunks(self.piece_length as usize)
            .flat_map(|chunk| Sha1::digest(chunk).to_vec())
            .collect();

        let (files, length) = if self.single {
            (None, Some(content.len() as u64))
        } else {
            let files = self
                .files
                .iter()
                .map(|(path, data)| FileOut {
                    length: data.len() as u64,
                    path: path.clone(),
                })
                .collect();
            (Some(files), None)
        };

        let descriptor = DescriptorOut {
            announce: self.announce,
            creation_date: self.creation_date,
            info: InfoOut {
                files,
                length,
                name: self.name,
                piece_length: self.piece_length,
                pieces: ByteBuf::from(pieces),
            },
            url_list: self.web_seeds,
        };
        let descriptor = serde_bencode::to_bytes(&descriptor).expect("descriptor encodes");
        let metainfo = Metainfo::from_bytes(&descriptor).expect("descriptor parses");

        TestTorrent {
            descriptor,
            metainfo,
            content,
        }
    }
}

/// Deterministic non-repeating-ish content so misplaced bytes show up.
pub fn patterned_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i % 251) as u8).wrapping_mul(7).wrapping_add(seed))
        .collect()
}

/// In-memory piece source for engine tests.
///
/// Serves pieces of registered torrents and descriptors registered under a
/// URL. Counts piece fetches so tests can assert on cache hits.
#[derive(Default)]
pub struct MemorySource {
    content: Mutex<HashMap<InfoHash, Arc<TestTorrent>>>,
    descriptors: Mutex<HashMap<String, Bytes>>,
    corrupt: Mutex<Vec<(InfoHash, PieceIndex)>>,
    fetches: Mutex<usize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_torrent(&self, torrent: &TestTorrent) {
        self.content
            .lock()
            .insert(torrent.info_hash(), Arc::new(torrent.clone()));
    }

    pub fn add_descriptor(&self, url: &str, torrent: &TestTorrent) {
        self.descriptors
            .lock()
            .insert(url.to_string(), Bytes::from(torrent.descriptor.clone()));
    }

    /// Makes the given piece come back with flipped bytes.
    pub fn corrupt_piece(&self, info_hash: InfoHash, index: PieceIndex) {
        self.corrupt.lock().push((info_hash, index));
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetches.lock()
    }
}

#[async_trait]
impl PieceSource for MemorySource {
    async fn fetch_piece(&self, metainfo: &Metainfo, index: PieceIndex) -> Result<Bytes, TorrentError> {
        *self.fetches.lock() += 1;
        let torrent = self
            .content
            .lock()
            .get(&metainfo.info_hash)
            .cloned()
            .ok_or_else(|| TorrentError::PieceUnavailable {
                index,
                reason: "no content registered".to_string(),
            })?;

        let mut data = torrent.piece_data(index).to_vec();
        if self.corrupt.lock().contains(&(metainfo.info_hash, index)) {
            for byte in &mut data {
                *byte = !*byte;
            }
        }
        Ok(Bytes::from(data))
    }

    async fn fetch_metadata(&self, url: &str) -> Result<Bytes, TorrentError> {
        self.descriptors
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| TorrentError::InvalidTorrentFile {
                reason: format!("no descriptor at {url}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_content_matches_files() {
        let torrent = TorrentBuilder::multi("set")
            .file("a.mkv", patterned_bytes(100, 1))
            .file("dir/b.mkv", patterned_bytes(50, 2))
            .build();

        assert_eq!(torrent.content.len(), 150);
        assert_eq!(torrent.file_data("dir/b.mkv").unwrap(), &patterned_bytes(50, 2)[..]);
        assert!(torrent.file_data("missing").is_none());
    }

    #[tokio::test]
    async fn test_memory_source_serves_pieces() {
        let torrent = TorrentBuilder::single("a.mp4", patterned_bytes(40_000, 3)).build();
        let source = MemorySource::new();
        source.add_torrent(&torrent);

        let piece = source
            .fetch_piece(&torrent.metainfo, PieceIndex::new(1))
            .await
            .unwrap();
        assert!(torrent.metainfo.verify_piece(PieceIndex::new(1), &piece));
        assert_eq!(source.fetch_count(), 1);

        source.corrupt_piece(torrent.info_hash(), PieceIndex::new(1));
        let piece = source
            .fetch_piece(&torrent.metainfo, PieceIndex::new(1))
            .await
            .unwrap();
        assert!(!torrent.metainfo.verify_piece(PieceIndex::new(1), &piece));
    }
}
