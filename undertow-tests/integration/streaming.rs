//! Streaming over a real listener, with pieces fetched from a web seed.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, ETAG, RANGE};
use tokio::net::TcpListener;
use undertow_core::GatewayConfig;
use undertow_core::engine::HttpSource;
use undertow_core::torrent::test_data::{TorrentBuilder, patterned_bytes};
use undertow_web::serve;

use crate::common::gateway_with;

#[tokio::test]
async fn test_range_request_streams_from_web_seed() {
    let content = patterned_bytes(50_000, 9);
    let mut seed = mockito::Server::new_async().await;
    let _file = seed
        .mock("GET", "/Movie.mp4")
        .with_status(200)
        .with_body(&content)
        .create_async()
        .await;
    let torrent = TorrentBuilder::single("Movie.mp4", content.clone())
        .piece_length(16_384)
        .web_seed(&format!("{}/Movie.mp4", seed.url()))
        .build();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = GatewayConfig {
        port,
        resume_torrents: false,
        shutdown_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    let source = HttpSource::new(4, None, Duration::from_secs(5)).unwrap();
    let gateway = gateway_with(Arc::new(source), config);
    let descriptor = gateway.temp.path().join("movie.torrent");
    std::fs::write(&descriptor, &torrent.descriptor).unwrap();
    let cache = gateway.cache.clone();
    let server = tokio::spawn(serve(listener, gateway.state.clone(), false));

    let base = format!("http://127.0.0.1:{port}");
    let client = reqwest::Client::new();
    let added = client
        .post(format!("{base}/torrents"))
        .body(descriptor.display().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(added.status(), StatusCode::OK);

    let url = format!("{base}/torrents/{}/Movie.mp4", torrent.info_hash());
    let partial = client
        .get(&url)
        .header(RANGE, "bytes=16000-17999")
        .send()
        .await
        .unwrap();
    assert_eq!(partial.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(partial.headers()[CONTENT_RANGE], "bytes 16000-17999/50000");
    assert_eq!(partial.headers()[ACCEPT_RANGES], "bytes");
    assert_eq!(
        partial.headers()[ETAG].to_str().unwrap(),
        format!("\"{}-0\"", torrent.info_hash())
    );
    assert_eq!(partial.bytes().await.unwrap().as_ref(), &content[16_000..18_000]);

    let full = client.get(&url).send().await.unwrap();
    assert_eq!(full.status(), StatusCode::OK);
    assert_eq!(full.headers()[CONTENT_LENGTH], "50000");
    assert_eq!(full.bytes().await.unwrap().as_ref(), content.as_slice());

    let beyond = client
        .get(&url)
        .header(RANGE, "bytes=60000-")
        .send()
        .await
        .unwrap();
    assert_eq!(beyond.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(beyond.headers()[CONTENT_RANGE], "bytes */50000");

    let exit = client.get(format!("{base}/exit")).send().await.unwrap();
    assert_eq!(exit.status(), StatusCode::ACCEPTED);
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(cache.is_closed());
}
