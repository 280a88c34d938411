//! Gateway HTTP server: state, routing, startup and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use undertow_core::engine::{Engine, HttpSource};
use undertow_core::{
    FilePieceCache, GatewayConfig, Ingestor, LocalAddressResolver, Projector, SessionStore,
    TorrentEngine,
};

use crate::error::GatewayError;
use crate::handlers::{
    add_torrent, debug_engine, delete_torrent, exit, get_torrent, list_torrents, stream_file,
};

const STARTUP_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn TorrentEngine>,
    pub ingestor: Ingestor,
    pub projector: Projector,
    pub store: SessionStore,
    pub config: Arc<GatewayConfig>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    /// # Errors
    ///
    /// - `GatewayError::Ingest` - HTTP client for descriptor downloads failed to build
    pub fn new(
        engine: Arc<dyn TorrentEngine>,
        config: GatewayConfig,
        resolver: LocalAddressResolver,
    ) -> Result<Self, GatewayError> {
        let ingestor = Ingestor::new(Arc::clone(&engine), config.fetch_timeout)?;
        let projector = Projector::new(resolver, config.port);
        let store = SessionStore::new(config.descriptor_dir());
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            engine,
            ingestor,
            projector,
            store,
            config: Arc::new(config),
            shutdown: Arc::new(shutdown),
        })
    }

    /// Asks the server to shut down gracefully.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_requested(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// Builds the gateway router.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/torrents", get(list_torrents).post(add_torrent))
        .route("/torrents/{info_hash}", get(get_torrent).delete(delete_torrent))
        .route("/torrents/{info_hash}/{*path}", get(stream_file))
        .route("/exit", get(exit));

    if state.config.profiling {
        router = router.route("/debug/engine", get(debug_engine));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Whether a gateway already answers on `port` of the loopback interface.
pub async fn gateway_running(port: u16) -> bool {
    let Ok(client) = reqwest::Client::builder().timeout(STARTUP_PROBE_TIMEOUT).build() else {
        return false;
    };
    client
        .get(format!("http://127.0.0.1:{port}/torrents"))
        .send()
        .await
        .is_ok()
}

/// Runs the gateway described by `config` until shutdown.
///
/// Refuses to start when another gateway answers on the same port. On exit
/// the engine is shut down and, if configured, the piece cache is destroyed.
///
/// # Errors
///
/// - `GatewayError::AlreadyRunning` - Port already served by a gateway
/// - `GatewayError::Bind` - Listener could not be bound
/// - `GatewayError::Storage` - Piece cache could not be opened
pub async fn run_server(config: GatewayConfig) -> Result<(), GatewayError> {
    if gateway_running(config.port).await {
        return Err(GatewayError::AlreadyRunning { port: config.port });
    }

    let cache = Arc::new(FilePieceCache::open(config.database_path()).await?);
    let source = Arc::new(HttpSource::new(
        config.max_conns_per_torrent,
        config.local_addr,
        config.fetch_timeout,
    )?);
    let engine: Arc<dyn TorrentEngine> = Arc::new(Engine::new(cache.clone(), source));
    let resolver = LocalAddressResolver::system(config.address_preference);

    let address = config.bind_addr();
    let listener = TcpListener::bind(address)
        .await
        .map_err(|source| GatewayError::Bind { address, source })?;
    let delete_database = config.delete_database_on_exit;
    let state = AppState::new(engine, config, resolver)?;

    tracing::info!(address = %address, download_dir = %state.config.download_dir.display(), "Gateway listening");
    serve(listener, state, true).await?;

    if delete_database {
        cache.destroy().await?;
        tracing::info!(path = %cache.root().display(), "Deleted piece cache database");
    }
    Ok(())
}

/// Serves `state` on `listener` until `/exit` or, with `os_signals`, an
/// interrupt or terminate signal.
///
/// Saved torrents are resumed first. In-flight requests get the configured
/// shutdown timeout to finish; the engine is shut down afterwards either way.
///
/// # Errors
///
/// - `GatewayError::Serve` - Accept loop failed
/// - `GatewayError::Torrent` - Engine shutdown failed
pub async fn serve(listener: TcpListener, state: AppState, os_signals: bool) -> Result<(), GatewayError> {
    if state.config.resume_torrents {
        let report = state.store.resume_all(state.engine.as_ref()).await;
        tracing::info!(resumed = report.resumed.len(), failed = report.failed.len(), "Resumed saved torrents");
    }

    let engine = Arc::clone(&state.engine);
    let drain_timeout = state.config.shutdown_timeout;
    let mut exit_requested = state.shutdown_requested();
    let (draining_tx, draining_rx) = tokio::sync::oneshot::channel::<()>();
    let app = router(state);

    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal(&mut exit_requested, os_signals).await;
                let _ = draining_tx.send(());
            })
            .await
    });

    let deadline = async {
        if draining_rx.await.is_ok() {
            tokio::time::sleep(drain_timeout).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        joined = &mut server => match joined {
            Ok(result) => result.map_err(GatewayError::Serve)?,
            Err(e) => tracing::error!(error = %e, "Server task failed"),
        },
        () = deadline => {
            tracing::warn!(timeout = ?drain_timeout, "Graceful shutdown timed out, closing open streams");
            server.abort();
        }
    }

    engine.shutdown().await?;
    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal(exit_requested: &mut watch::Receiver<bool>, os_signals: bool) {
    let exit = async {
        if exit_requested.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    if !os_signals {
        exit.await;
        tracing::info!("Shutdown requested");
        return;
    }

    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = exit => tracing::info!("Shutdown requested"),
        () = interrupt => tracing::info!("Interrupt received, shutting down"),
        () = terminate => tracing::info!("Terminate received, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use undertow_core::AddressPreference;
    use undertow_core::storage::MemoryPieceCache;
    use undertow_core::torrent::test_data::MemorySource;

    use super::*;

    fn state(config: GatewayConfig) -> AppState {
        let engine = Engine::new(Arc::new(MemoryPieceCache::new()), Arc::new(MemorySource::new()));
        let resolver = LocalAddressResolver::fixed(
            vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))],
            AddressPreference::default(),
        );
        AppState::new(Arc::new(engine), config, resolver).unwrap()
    }

    #[tokio::test]
    async fn test_debug_route_only_with_profiling() {
        let plain = router(state(GatewayConfig::default()));
        let response = plain
            .oneshot(Request::get("/debug/engine").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let profiling = router(state(GatewayConfig {
            profiling: true,
            ..Default::default()
        }));
        let response = profiling
            .oneshot(Request::get("/debug/engine").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_exit_stops_server_and_engine() {
        let temp = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = state(GatewayConfig {
            port,
            download_dir: temp.path().to_path_buf(),
            shutdown_timeout: Duration::from_secs(2),
            ..Default::default()
        });
        let engine = Arc::clone(&state.engine);
        let server = tokio::spawn(serve(listener, state, false));

        assert!(gateway_running(port).await);
        let response = reqwest::get(format!("http://127.0.0.1:{port}/exit")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
        assert_eq!(response.text().await.unwrap(), "Shutdown initiated");

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(
            engine.add_info_hash(undertow_core::InfoHash::new([1; 20])).await,
            Err(undertow_core::TorrentError::EngineShutdown)
        ));
    }
}
