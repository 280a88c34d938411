//! File entries, stream URLs and playlists for resolved torrents.

use std::cmp::Ordering;
use std::net::Ipv4Addr;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::address::{AddressError, LocalAddressResolver};
use crate::engine::TorrentSession;
use crate::torrent::{InfoHash, Metainfo, TorrentError};

/// Content type of playlist documents.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// One streamable file of a torrent, as listed by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileEntry {
    /// Final path segment
    pub name: String,
    #[serde(rename = "URL")]
    pub url: String,
    pub length: u64,
    pub mime_type: String,
    /// Number of path segments; top-level files have depth 1
    #[serde(skip)]
    pub depth: usize,
}

/// A torrent as listed by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TorrentSummary {
    pub name: String,
    pub info_hash: String,
    pub files: Vec<FileEntry>,
    pub length: u64,
    pub playlist: String,
}

/// Errors while projecting a torrent.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("Failed to resolve local address: {0}")]
    Address(#[from] AddressError),

    #[error(transparent)]
    Torrent(#[from] TorrentError),
}

/// MIME type for a path by extension, empty when unknown.
pub fn mime_type_for(path: &str) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_default()
}

fn compare_entries(a: &FileEntry, b: &FileEntry) -> Ordering {
    a.depth.cmp(&b.depth).then_with(|| a.name.cmp(&b.name))
}

/// Orders entries by depth, then name. Stable for equal keys.
pub fn sort_entries(entries: &mut [FileEntry]) {
    entries.sort_by(compare_entries);
}

/// Renders an `#EXTM3U` playlist of the video entries, in the given order.
pub fn build_playlist(entries: &[FileEntry]) -> String {
    let mut lines = vec!["#EXTM3U".to_string()];
    for entry in entries.iter().filter(|e| e.mime_type.starts_with("video")) {
        lines.push(format!("#EXTINF:0,{}", entry.name));
        lines.push(entry.url.clone());
    }
    lines.join("\n")
}

/// Builds stream URLs reachable from other hosts on the network.
#[derive(Debug, Clone)]
pub struct Projector {
    resolver: LocalAddressResolver,
    port: u16,
}

impl Projector {
    pub fn new(resolver: LocalAddressResolver, port: u16) -> Self {
        Self { resolver, port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stream URL with each path segment percent-encoded.
    pub fn stream_url(&self, host: Ipv4Addr, info_hash: InfoHash, display_path: &str) -> String {
        let path: Vec<String> = display_path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("http://{host}:{}/torrents/{info_hash}/{}", self.port, path.join("/"))
    }

    /// Sorted entries for every file of resolved metadata.
    ///
    /// # Errors
    ///
    /// - `ProjectionError::Address` - No local address could be resolved
    pub fn project_files(&self, metainfo: &Metainfo) -> Result<Vec<FileEntry>, ProjectionError> {
        let host = self.resolver.resolve()?;
        let mut entries: Vec<FileEntry> = metainfo
            .files
            .iter()
            .map(|file| {
                let display_path = file.display_path();
                FileEntry {
                    name: file.file_name().to_string(),
                    url: self.stream_url(host, metainfo.info_hash, &display_path),
                    length: file.length,
                    mime_type: mime_type_for(&display_path),
                    depth: file.path.len(),
                }
            })
            .collect();
        sort_entries(&mut entries);
        Ok(entries)
    }

    /// Waits for metadata, then projects the session's files.
    ///
    /// # Errors
    ///
    /// - `ProjectionError::Address` - No local address could be resolved
    /// - `ProjectionError::Torrent` - Metadata wait failed
    pub async fn project(&self, session: &TorrentSession) -> Result<Vec<FileEntry>, ProjectionError> {
        let metainfo = session.wait_for_metadata().await?;
        self.project_files(&metainfo)
    }

    /// Full listing record for one session, waiting for metadata.
    ///
    /// # Errors
    ///
    /// Same as [`Projector::project`].
    pub async fn summarize(&self, session: &TorrentSession) -> Result<TorrentSummary, ProjectionError> {
        let files = self.project(session).await?;
        Ok(TorrentSummary {
            name: session.name(),
            info_hash: session.info_hash().to_string(),
            length: files.iter().map(|f| f.length).sum(),
            playlist: build_playlist(&files),
            files,
        })
    }

    /// Summaries of all sessions, sorted by name.
    ///
    /// Waits for every session concurrently; dropping the future abandons
    /// the waits.
    ///
    /// # Errors
    ///
    /// First projection error encountered.
    pub async fn summarize_all<S>(&self, sessions: &[S]) -> Result<Vec<TorrentSummary>, ProjectionError>
    where
        S: AsRef<TorrentSession>,
    {
        let mut summaries =
            try_join_all(sessions.iter().map(|session| self.summarize(session.as_ref()))).await?;
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::address::AddressPreference;
    use crate::torrent::test_data::{TorrentBuilder, patterned_bytes};

    fn projector() -> Projector {
        let resolver = LocalAddressResolver::fixed(
            vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))],
            AddressPreference::default(),
        );
        Projector::new(resolver, 6969)
    }

    fn entry(name: &str, depth: usize, mime: &str) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            url: format!("http://h/{name}"),
            length: 1,
            mime_type: mime.to_string(),
            depth,
        }
    }

    #[test]
    fn test_entries_sorted_by_depth_then_name() {
        let torrent = TorrentBuilder::multi("Show")
            .file("Season 1/b.mkv", patterned_bytes(10, 1))
            .file("z.mp4", patterned_bytes(10, 2))
            .file("Season 1/a.mkv", patterned_bytes(10, 3))
            .file("a.nfo", patterned_bytes(10, 4))
            .build();

        let entries = projector().project_files(&torrent.metainfo).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.nfo", "z.mp4", "a.mkv", "b.mkv"]);
        assert_eq!(
            entries[2].url,
            format!("http://192.168.1.20:6969/torrents/{}/Season%201/a.mkv", torrent.info_hash())
        );
        assert_eq!(entries[1].mime_type, "video/mp4");
    }

    #[test]
    fn test_playlist_lists_only_videos() {
        let entries = vec![
            entry("a.mkv", 1, "video/x-matroska"),
            entry("notes.txt", 1, "text/plain"),
            entry("b.mp4", 2, "video/mp4"),
        ];
        assert_eq!(
            build_playlist(&entries),
            "#EXTM3U\n#EXTINF:0,a.mkv\nhttp://h/a.mkv\n#EXTINF:0,b.mp4\nhttp://h/b.mp4"
        );
        assert_eq!(build_playlist(&[]), "#EXTM3U");
    }

    #[test]
    fn test_single_file_uses_torrent_name() {
        let torrent = TorrentBuilder::single("Movie.mp4", patterned_bytes(10, 1)).build();
        let entries = projector().project_files(&torrent.metainfo).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].url.ends_with("/Movie.mp4"));
        assert_eq!(entries[0].depth, 1);
    }

    #[test]
    fn test_projection_fails_without_address() {
        let torrent = TorrentBuilder::single("Movie.mp4", patterned_bytes(10, 1)).build();
        let projector = Projector::new(
            LocalAddressResolver::fixed(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)], AddressPreference::First),
            6969,
        );
        assert!(matches!(
            projector.project_files(&torrent.metainfo),
            Err(ProjectionError::Address(AddressError::NoLocalAddressFound))
        ));
    }

    #[test]
    fn test_summary_json_shape() {
        let summary = TorrentSummary {
            name: "n".to_string(),
            info_hash: "ab".to_string(),
            files: vec![entry("a.mkv", 1, "video/x-matroska")],
            length: 1,
            playlist: "#EXTM3U".to_string(),
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["InfoHash"], "ab");
        assert_eq!(json["Files"][0]["URL"], "http://h/a.mkv");
        assert_eq!(json["Files"][0]["MimeType"], "video/x-matroska");
        assert!(json["Files"][0].get("Depth").is_none());
    }

    #[tokio::test]
    async fn test_summarize_all_sorts_by_name() {
        let b = TorrentBuilder::single("b.mp4", patterned_bytes(10, 1)).build();
        let a = TorrentBuilder::single("a.mp4", patterned_bytes(20, 2)).build();
        let sessions = vec![
            Arc::new(TorrentSession::resolved(b.metainfo)),
            Arc::new(TorrentSession::resolved(a.metainfo)),
        ];

        let summaries = projector().summarize_all(&sessions).await.unwrap();
        assert_eq!(summaries[0].name, "a.mp4");
        assert_eq!(summaries[0].length, 20);
        assert_eq!(summaries[1].playlist.lines().count(), 3);
    }

    fn arb_entry() -> impl Strategy<Value = FileEntry> {
        ("[a-c]{1,3}", 1usize..4, prop_oneof![Just("video/mp4"), Just("text/plain")])
            .prop_map(|(name, depth, mime)| entry(&name, depth, mime))
    }

    proptest! {
        #[test]
        fn test_sorting_is_idempotent_and_ordered(mut entries in prop::collection::vec(arb_entry(), 0..20)) {
            sort_entries(&mut entries);
            let once = entries.clone();
            sort_entries(&mut entries);
            prop_assert_eq!(&once, &entries);
            for pair in entries.windows(2) {
                prop_assert!(compare_entries(&pair[0], &pair[1]) != Ordering::Greater);
            }
            prop_assert_eq!(build_playlist(&once), build_playlist(&entries));
        }
    }
}
