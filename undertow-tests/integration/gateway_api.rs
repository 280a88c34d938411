//! Gateway API workflows: adding, listing, negotiating and deleting.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use undertow_core::engine::HttpSource;
use undertow_core::torrent::test_data::{MemorySource, TestTorrent, TorrentBuilder, patterned_bytes};
use undertow_core::TorrentSummary;

use crate::common::{LAN_ADDRESS, body_bytes, body_text, gateway};

fn show() -> TestTorrent {
    TorrentBuilder::multi("Show")
        .file("Season 1/E02.mkv", patterned_bytes(40_000, 1))
        .file("Season 1/E01.mkv", patterned_bytes(40_000, 2))
        .file("trailer.mp4", patterned_bytes(20_000, 3))
        .file("cover.jpg", patterned_bytes(500, 4))
        .piece_length(16_384)
        .build()
}

#[tokio::test]
async fn test_magnet_with_exact_source_returns_sorted_video_playlist() {
    let torrent = show();
    let mut server = mockito::Server::new_async().await;
    let descriptor = server
        .mock("GET", "/show.torrent")
        .with_status(200)
        .with_body(&torrent.descriptor)
        .create_async()
        .await;

    let source = HttpSource::new(4, None, std::time::Duration::from_secs(5)).unwrap();
    let gateway = gateway(Arc::new(source));
    let hash = torrent.info_hash();
    let magnet = format!(
        "magnet:?xt=urn:btih:{hash}&dn=Show&xs={}/show.torrent",
        server.url()
    );

    let response = gateway.add(&magnet).await;
    assert_eq!(response.status(), StatusCode::OK);
    descriptor.assert_async().await;

    let base = format!("http://{LAN_ADDRESS}:6969/torrents/{hash}");
    assert_eq!(
        body_text(response).await,
        format!(
            "#EXTM3U\n\
             #EXTINF:0,trailer.mp4\n{base}/trailer.mp4\n\
             #EXTINF:0,E01.mkv\n{base}/Season%201/E01.mkv\n\
             #EXTINF:0,E02.mkv\n{base}/Season%201/E02.mkv"
        )
    );
}

#[tokio::test]
async fn test_listing_uses_preferred_lan_address() {
    let torrent = show();
    let gateway = gateway(Arc::new(MemorySource::new()));
    assert_eq!(gateway.add_file(&torrent).await.status(), StatusCode::OK);

    let response = gateway.get("/torrents").await;
    assert_eq!(response.status(), StatusCode::OK);
    let summaries: Vec<TorrentSummary> = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].name, "Show");
    assert_eq!(summaries[0].length, 100_500);
    assert_eq!(summaries[0].files.len(), 4);
    for file in &summaries[0].files {
        assert!(file.url.starts_with(&format!("http://{LAN_ADDRESS}:6969/torrents/")), "{}", file.url);
    }
}

#[tokio::test]
async fn test_get_by_hash_negotiates_json() {
    let torrent = show();
    let gateway = gateway(Arc::new(MemorySource::new()));
    gateway.add_file(&torrent).await;
    let uri = format!("/torrents/{}", torrent.info_hash());

    let playlist = gateway.get(&uri).await;
    assert_eq!(playlist.headers()[header::CONTENT_TYPE], "application/vnd.apple.mpegurl");

    let request = Request::get(&uri)
        .header(header::ACCEPT, "application/json")
        .body(Body::empty())
        .unwrap();
    let response = gateway.send(request).await;
    let summary: TorrentSummary = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(summary.info_hash, torrent.info_hash().to_string());

    assert_eq!(gateway.get("/torrents/not-a-hash").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_identifier_is_bad_request() {
    let gateway = gateway(Arc::new(MemorySource::new()));
    let response = gateway.add("definitely not a torrent").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("definitely not a torrent"));
}

#[tokio::test]
async fn test_delete_without_flag_keeps_cache_and_allows_re_add() {
    let torrent = show();
    let source = Arc::new(MemorySource::new());
    source.add_torrent(&torrent);
    let gateway = gateway(source);
    let hash = torrent.info_hash();

    gateway.add_file(&torrent).await;
    let stream_uri = format!("/torrents/{hash}/trailer.mp4");
    let first = body_bytes(gateway.get(&stream_uri).await).await;
    assert_eq!(first, torrent.file_data("trailer.mp4").unwrap());
    let cached = gateway.cache.len();
    assert!(cached > 0);

    let response = gateway.delete(&format!("/torrents/{hash}")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(body_text(gateway.get("/torrents").await).await, "[]");
    assert_eq!(gateway.get(&stream_uri).await.status(), StatusCode::NOT_FOUND);
    assert!(gateway.cache.len() >= cached);
    assert!(gateway.state.store.path_for("Show").exists());

    assert_eq!(gateway.add_file(&torrent).await.status(), StatusCode::OK);
    let second = body_bytes(gateway.get(&stream_uri).await).await;
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_delete_with_files_purges_cache_and_descriptor() {
    let torrent = show();
    let source = Arc::new(MemorySource::new());
    source.add_torrent(&torrent);
    let gateway = gateway(source);
    let hash = torrent.info_hash();

    gateway.add_file(&torrent).await;
    body_bytes(gateway.get(&format!("/torrents/{hash}/cover.jpg")).await).await;
    assert!(gateway.state.store.path_for("Show").exists());

    let response = gateway.delete(&format!("/torrents/{hash}?DeleteFiles=1")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(gateway.cache.is_empty());
    assert!(!gateway.state.store.path_for("Show").exists());
    assert!(gateway.state.engine.session(&hash).is_none());

    let again = gateway.delete(&format!("/torrents/{hash}")).await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_exit_requests_shutdown() {
    let gateway = gateway(Arc::new(MemorySource::new()));
    let mut requested = gateway.state.shutdown_requested();

    let response = gateway.get("/exit").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_text(response).await, "Shutdown initiated");
    requested.wait_for(|flag| *flag).await.unwrap();
}
