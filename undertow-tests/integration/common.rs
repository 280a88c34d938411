//! Shared fixtures for gateway integration tests

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::Request;
use axum::response::Response;
use tower::ServiceExt;
use undertow_core::engine::{Engine, PieceSource};
use undertow_core::storage::MemoryPieceCache;
use undertow_core::torrent::test_data::TestTorrent;
use undertow_core::{AddressPreference, GatewayConfig, LocalAddressResolver};
use undertow_web::{AppState, router};

pub const LAN_ADDRESS: &str = "192.168.1.20";

pub struct Gateway {
    pub temp: tempfile::TempDir,
    pub cache: Arc<MemoryPieceCache>,
    pub state: AppState,
}

/// Gateway over a memory cache whose resolver sees loopback, a 10/8
/// address and a 192.168/16 address, in that order.
pub fn gateway(source: Arc<dyn PieceSource>) -> Gateway {
    gateway_with(source, GatewayConfig::default())
}

pub fn gateway_with(source: Arc<dyn PieceSource>, config: GatewayConfig) -> Gateway {
    let temp = tempfile::tempdir().unwrap();
    let cache = Arc::new(MemoryPieceCache::new());
    let engine = Engine::new(cache.clone(), source);
    let resolver = LocalAddressResolver::fixed(
        vec![
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
        ],
        AddressPreference::default(),
    );
    let config = GatewayConfig {
        download_dir: temp.path().to_path_buf(),
        ..config
    };
    let state = AppState::new(Arc::new(engine), config, resolver).unwrap();
    Gateway { temp, cache, state }
}

impl Gateway {
    pub async fn send(&self, request: Request<Body>) -> Response {
        router(self.state.clone()).oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn add(&self, identifier: &str) -> Response {
        let request = Request::post("/torrents")
            .body(Body::from(identifier.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Writes the descriptor into the download dir and adds it by path.
    pub async fn add_file(&self, torrent: &TestTorrent) -> Response {
        let path = self
            .temp
            .path()
            .join(format!("{}.torrent", torrent.info_hash()));
        std::fs::write(&path, &torrent.descriptor).unwrap();
        self.add(path.to_str().unwrap()).await
    }

    pub async fn delete(&self, uri: &str) -> Response {
        self.send(Request::delete(uri).body(Body::empty()).unwrap()).await
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

pub async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}
