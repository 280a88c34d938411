//! Supervisor starting, using and stopping an in-process gateway.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use undertow_core::engine::Engine;
use undertow_core::storage::MemoryPieceCache;
use undertow_core::torrent::test_data::{MemorySource, TorrentBuilder, patterned_bytes};
use undertow_core::{AddressPreference, GatewayConfig, LocalAddressResolver, SupervisorConfig};
use undertow_supervisor::{
    GatewayClient, GatewayState, LaunchError, Launcher, MenuAction, Player, PlayerError, Supervisor,
};
use undertow_web::{AppState, GatewayError, serve};

/// Launches the gateway as a task on a pre-bound listener instead of a process.
struct InProcessLauncher {
    listener: Mutex<Option<std::net::TcpListener>>,
    download_dir: std::path::PathBuf,
    launches: AtomicUsize,
    server: Mutex<Option<JoinHandle<Result<(), GatewayError>>>>,
}

impl InProcessLauncher {
    fn new(listener: std::net::TcpListener, download_dir: &Path) -> Self {
        Self {
            listener: Mutex::new(Some(listener)),
            download_dir: download_dir.to_path_buf(),
            launches: AtomicUsize::new(0),
            server: Mutex::new(None),
        }
    }

    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn take_server(&self) -> Option<JoinHandle<Result<(), GatewayError>>> {
        self.server.lock().take()
    }
}

impl Launcher for InProcessLauncher {
    fn launch(&self, _program: &Path, args: &[String]) -> Result<(), LaunchError> {
        assert_eq!(args.first().map(String::as_str), Some("serve"));
        self.launches.fetch_add(1, Ordering::SeqCst);

        let listener = self.listener.lock().take().expect("gateway launched twice");
        listener.set_nonblocking(true).unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();
        let port = listener.local_addr().unwrap().port();

        let cache = Arc::new(MemoryPieceCache::new());
        let engine = Engine::new(cache, Arc::new(MemorySource::new()));
        let config = GatewayConfig {
            port,
            download_dir: self.download_dir.clone(),
            shutdown_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let resolver = LocalAddressResolver::fixed(
            vec!["192.168.1.20".parse().unwrap()],
            AddressPreference::default(),
        );
        let state = AppState::new(Arc::new(engine), config, resolver).unwrap();
        *self.server.lock() = Some(tokio::spawn(serve(listener, state, false)));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPlayer {
    targets: Mutex<Vec<String>>,
    loaded: Mutex<Vec<String>>,
}

#[async_trait]
impl Player for RecordingPlayer {
    async fn load(&self, url: &str) -> Result<(), PlayerError> {
        self.loaded.lock().push(url.to_string());
        Ok(())
    }

    async fn replace_open_target(&self, target: &str) -> Result<(), PlayerError> {
        self.targets.lock().push(target.to_string());
        Ok(())
    }

    async fn show_text(&self, _text: &str) -> Result<(), PlayerError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_open_starts_gateway_once_and_stops_it_on_exit() {
    let temp = tempfile::tempdir().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let launcher = Arc::new(InProcessLauncher::new(listener, temp.path()));
    let player = Arc::new(RecordingPlayer::default());

    let config = SupervisorConfig {
        port,
        startup_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let api = Arc::new(GatewayClient::from_config(&config));
    let mut supervisor = Supervisor::new(config, api, launcher.clone(), player.clone());

    assert!(supervisor.start().await.unwrap());
    assert!(!supervisor.start().await.unwrap());
    assert_eq!(launcher.launches(), 1);
    assert_eq!(supervisor.state(), GatewayState::Running);
    assert!(supervisor.launched_by_us());

    let torrent = TorrentBuilder::multi("Show")
        .file("E01.mkv", patterned_bytes(3_000, 1))
        .file("E02.mkv", patterned_bytes(3_000, 2))
        .build();
    let path = temp.path().join("show.torrent");
    std::fs::write(&path, &torrent.descriptor).unwrap();

    assert!(supervisor.on_file_open(path.to_str().unwrap()).await.unwrap());
    assert_eq!(launcher.launches(), 1);
    let targets = player.targets.lock().clone();
    assert_eq!(targets.len(), 1);
    assert!(targets[0].starts_with("memory://#EXTM3U\n#EXTINF:0,E01.mkv\nhttp://192.168.1.20:"));

    let gateway_url = format!("http://127.0.0.1:{port}/torrents/{}/E01.mkv", torrent.info_hash());
    assert!(!supervisor.on_file_open(&gateway_url).await.unwrap());
    assert!(!supervisor.on_file_open("/home/user/movie.mkv").await.unwrap());

    let menu = supervisor.menu().await;
    let play = menu
        .choices()
        .into_iter()
        .find_map(|(label, action)| match action {
            MenuAction::Play { .. } if label.ends_with("E02.mkv") => Some(action),
            _ => None,
        })
        .unwrap();
    supervisor.select(&play).await.unwrap();
    assert!(player.loaded.lock()[0].ends_with("/E02.mkv"));

    supervisor.on_player_shutdown().await;
    assert_eq!(supervisor.state(), GatewayState::Stopped);
    let server = launcher.take_server().unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
