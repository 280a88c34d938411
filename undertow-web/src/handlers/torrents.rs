//! Torrent collection handlers: list, add, get and delete.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use undertow_core::build_playlist;
use undertow_core::projection::PLAYLIST_CONTENT_TYPE;

use super::find_session;
use crate::cleanup::purge_torrent;
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(rename = "deleteFiles", alias = "DeleteFiles", default)]
    pub delete_files: Option<String>,
}

impl DeleteQuery {
    pub fn wants_data_deleted(&self) -> bool {
        self.delete_files
            .as_deref()
            .is_some_and(|value| value.eq_ignore_ascii_case("true") || value == "1")
    }
}

fn playlist_response(playlist: String) -> Response {
    ([(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)], playlist).into_response()
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"))
}

/// `GET /torrents`: every session, resolved and sorted by name.
pub async fn list_torrents(State(state): State<AppState>) -> Result<Response, ApiError> {
    let sessions = state.engine.sessions();
    let summaries = state.projector.summarize_all(&sessions).await?;
    Ok(Json(summaries).into_response())
}

/// `POST /torrents`: adds the identifier in the body and returns its playlist.
pub async fn add_torrent(State(state): State<AppState>, body: String) -> Result<Response, ApiError> {
    let session = state.ingestor.ingest(&body).await?;
    let files = state.projector.project(&session).await?;

    if state.config.resume_torrents {
        if let Err(e) = state.store.save(&session).await {
            tracing::error!(info_hash = %session.info_hash(), error = %e, "Failed to save torrent for resume");
        }
    }

    Ok(playlist_response(build_playlist(&files)))
}

/// `GET /torrents/{info_hash}`: the playlist, or the summary as JSON when asked for.
pub async fn get_torrent(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = find_session(&state, &info_hash)?;
    if wants_json(&headers) {
        let summary = state.projector.summarize(&session).await?;
        return Ok(Json(summary).into_response());
    }
    let files = state.projector.project(&session).await?;
    Ok(playlist_response(build_playlist(&files)))
}

/// `DELETE /torrents/{info_hash}`: drops the session, optionally purging its data.
///
/// Cleanup failures are logged; the response is `204` once the session is gone.
pub async fn delete_torrent(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    let session = find_session(&state, &info_hash)?;
    let session = state.engine.remove(&session.info_hash()).await?;

    if query.wants_data_deleted() || state.config.delete_data_on_drop {
        let cache = state.engine.piece_cache();
        let report = purge_torrent(cache.as_ref(), &state.store, &session).await;
        tracing::info!(
            info_hash = %session.info_hash(),
            pieces_removed = report.pieces_removed,
            descriptor_removed = report.descriptor_removed,
            "Deleted torrent data"
        );
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use bytes::Bytes;
    use tower::ServiceExt;
    use undertow_core::engine::Engine;
    use undertow_core::storage::{MemoryPieceCache, PieceKey};
    use undertow_core::torrent::test_data::{MemorySource, TestTorrent, TorrentBuilder, patterned_bytes};
    use undertow_core::{AddressPreference, GatewayConfig, LocalAddressResolver, PieceCache, PieceIndex, TorrentSummary};

    use super::*;
    use crate::server::router;

    struct Fixture {
        _temp: tempfile::TempDir,
        cache: Arc<MemoryPieceCache>,
        state: AppState,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryPieceCache::new());
        let engine = Engine::new(cache.clone(), Arc::new(MemorySource::new()));
        let resolver = LocalAddressResolver::fixed(
            vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))],
            AddressPreference::default(),
        );
        let config = GatewayConfig {
            download_dir: temp.path().to_path_buf(),
            ..Default::default()
        };
        let state = AppState::new(Arc::new(engine), config, resolver).unwrap();
        Fixture {
            _temp: temp,
            cache,
            state,
        }
    }

    fn show() -> TestTorrent {
        TorrentBuilder::multi("Show")
            .file("Season 1/b.mkv", patterned_bytes(20_000, 1))
            .file("a.mp4", patterned_bytes(10_000, 2))
            .file("notes.txt", patterned_bytes(100, 3))
            .build()
    }

    async fn send(state: &AppState, request: Request<Body>) -> Response {
        router(state.clone()).oneshot(request).await.unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn add(state: &AppState, torrent: &TestTorrent) -> Response {
        let path = state.config.download_dir.join("show.torrent");
        std::fs::write(&path, &torrent.descriptor).unwrap();
        let request = Request::post("/torrents")
            .body(Body::from(path.display().to_string()))
            .unwrap();
        send(state, request).await
    }

    #[tokio::test]
    async fn test_add_returns_playlist_and_saves_descriptor() {
        let fixture = fixture();
        let torrent = show();

        let response = add(&fixture.state, &torrent).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], PLAYLIST_CONTENT_TYPE);
        let hash = torrent.info_hash();
        assert_eq!(
            body_text(response).await,
            format!(
                "#EXTM3U\n#EXTINF:0,a.mp4\nhttp://192.168.1.20:6969/torrents/{hash}/a.mp4\n\
                 #EXTINF:0,b.mkv\nhttp://192.168.1.20:6969/torrents/{hash}/Season%201/b.mkv"
            )
        );
        assert!(fixture.state.store.path_for("Show").exists());
    }

    #[tokio::test]
    async fn test_add_invalid_identifier_is_bad_request() {
        let fixture = fixture();
        let response = send(
            &fixture.state,
            Request::post("/torrents").body(Body::from("not a torrent")).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("Invalid torrent identifier"));
    }

    #[tokio::test]
    async fn test_list_and_head() {
        let fixture = fixture();
        let torrent = show();
        add(&fixture.state, &torrent).await;

        let response = send(&fixture.state, Request::get("/torrents").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let summaries: Vec<TorrentSummary> = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].info_hash, torrent.info_hash().to_string());
        assert_eq!(summaries[0].files.len(), 3);
        assert_eq!(summaries[0].length, 30_100);

        let head = Request::builder()
            .method(Method::HEAD)
            .uri("/torrents")
            .body(Body::empty())
            .unwrap();
        let response = send(&fixture.state, head).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_get_unknown_and_malformed_hash_is_not_found() {
        let fixture = fixture();
        for uri in ["/torrents/ffffffffffffffffffffffffffffffffffffffff", "/torrents/zzz"] {
            let response = send(&fixture.state, Request::get(uri).body(Body::empty()).unwrap()).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn test_get_negotiates_json() {
        let fixture = fixture();
        let torrent = show();
        add(&fixture.state, &torrent).await;
        let uri = format!("/torrents/{}", torrent.info_hash());

        let response = send(&fixture.state, Request::get(&uri).body(Body::empty()).unwrap()).await;
        assert_eq!(response.headers()[header::CONTENT_TYPE], PLAYLIST_CONTENT_TYPE);

        let request = Request::get(&uri)
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .unwrap();
        let response = send(&fixture.state, request).await;
        let summary: TorrentSummary = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(summary.name, "Show");
    }

    #[tokio::test]
    async fn test_delete_keeps_data_without_flag() {
        let fixture = fixture();
        let torrent = show();
        add(&fixture.state, &torrent).await;
        let key = PieceKey::from_hash(&torrent.metainfo.piece_hashes[0]);
        fixture
            .cache
            .put(&key, Bytes::copy_from_slice(torrent.piece_data(PieceIndex::new(0))))
            .await
            .unwrap();

        let uri = format!("/torrents/{}", torrent.info_hash());
        let response = send(&fixture.state, Request::delete(&uri).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(fixture.state.engine.sessions().is_empty());
        assert!(fixture.cache.contains(&key).await.unwrap());
        assert!(fixture.state.store.path_for("Show").exists());

        let response = send(&fixture.state, Request::delete(&uri).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_with_files_purges_data() {
        let fixture = fixture();
        let torrent = show();
        add(&fixture.state, &torrent).await;
        let key = PieceKey::from_hash(&torrent.metainfo.piece_hashes[0]);
        fixture
            .cache
            .put(&key, Bytes::copy_from_slice(torrent.piece_data(PieceIndex::new(0))))
            .await
            .unwrap();

        let uri = format!("/torrents/{}?DeleteFiles=true", torrent.info_hash());
        let response = send(&fixture.state, Request::delete(&uri).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!fixture.cache.contains(&key).await.unwrap());
        assert!(!fixture.state.store.path_for("Show").exists());
    }

    #[tokio::test]
    async fn test_delete_succeeds_when_purge_fails() {
        let fixture = fixture();
        let torrent = show();
        add(&fixture.state, &torrent).await;
        let key = PieceKey::from_hash(&torrent.metainfo.piece_hashes[0]);
        fixture
            .cache
            .put(&key, Bytes::copy_from_slice(torrent.piece_data(PieceIndex::new(0))))
            .await
            .unwrap();
        fixture.cache.fail_delete_of(key.clone());

        let uri = format!("/torrents/{}?deleteFiles=true", torrent.info_hash());
        let response = send(&fixture.state, Request::delete(&uri).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(fixture.cache.contains(&key).await.unwrap());
    }

    #[test]
    fn test_delete_flag_parsing() {
        let query = |value: Option<&str>| DeleteQuery {
            delete_files: value.map(str::to_string),
        };
        assert!(query(Some("true")).wants_data_deleted());
        assert!(query(Some("TRUE")).wants_data_deleted());
        assert!(query(Some("1")).wants_data_deleted());
        assert!(!query(Some("false")).wants_data_deleted());
        assert!(!query(None).wants_data_deleted());
    }
}
