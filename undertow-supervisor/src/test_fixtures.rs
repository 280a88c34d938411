//! In-memory gateway, launcher and player for supervisor tests.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use undertow_core::{FileEntry, SupervisorConfig, TorrentSummary};

use crate::client::GatewayApi;
use crate::error::{LaunchError, PlayerError, SupervisorError};
use crate::launcher::Launcher;
use crate::player::Player;
use crate::supervisor::Supervisor;

#[derive(Default)]
pub struct FakeGateway {
    pub running: AtomicBool,
    pub fail_list: AtomicBool,
    pub reject_add: AtomicBool,
    pub torrents: Mutex<Vec<TorrentSummary>>,
    pub added: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<(String, bool)>>,
    pub exits: AtomicUsize,
}

#[async_trait]
impl GatewayApi for FakeGateway {
    async fn health(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn list(&self) -> Result<Vec<TorrentSummary>, SupervisorError> {
        if self.fail_list.load(Ordering::SeqCst) || !self.running.load(Ordering::SeqCst) {
            return Err(SupervisorError::Unreachable {
                url: "fake".into(),
                reason: "down".into(),
            });
        }
        Ok(self.torrents.lock().clone())
    }

    async fn add(&self, identifier: &str) -> Result<String, SupervisorError> {
        if self.reject_add.load(Ordering::SeqCst) {
            return Err(SupervisorError::Status {
                status: 400,
                message: "invalid torrent identifier".into(),
            });
        }
        self.added.lock().push(identifier.to_string());
        Ok("#EXTM3U\n#EXTINF:0,a.mp4\nhttp://h/a.mp4".to_string())
    }

    async fn remove(&self, info_hash: &str, delete_files: bool) -> Result<(), SupervisorError> {
        self.removed.lock().push((info_hash.to_string(), delete_files));
        Ok(())
    }

    async fn exit(&self) -> Result<(), SupervisorError> {
        self.exits.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Launcher that "starts" the fake gateway.
pub struct FakeLauncher {
    pub gateway: Arc<FakeGateway>,
    pub launches: AtomicUsize,
}

impl Launcher for FakeLauncher {
    fn launch(&self, _program: &Path, args: &[String]) -> Result<(), LaunchError> {
        assert_eq!(args[0], "serve");
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.gateway.running.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPlayer {
    pub loaded: Mutex<Vec<String>>,
    pub targets: Mutex<Vec<String>>,
    pub texts: Mutex<Vec<String>>,
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

    async fn show_text(&self, text: &str) -> Result<(), PlayerError> {
        self.texts.lock().push(text.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub gateway: Arc<FakeGateway>,
    pub launcher: Arc<FakeLauncher>,
    pub player: Arc<RecordingPlayer>,
    pub supervisor: Supervisor,
}

pub fn harness(config: SupervisorConfig) -> Harness {
    let gateway = Arc::new(FakeGateway::default());
    let launcher = Arc::new(FakeLauncher {
        gateway: Arc::clone(&gateway),
        launches: AtomicUsize::new(0),
    });
    let player = Arc::new(RecordingPlayer::default());
    let supervisor = Supervisor::new(config, gateway.clone(), launcher.clone(), player.clone());
    Harness {
        gateway,
        launcher,
        player,
        supervisor,
    }
}

pub fn summary(hash: &str, name: &str) -> TorrentSummary {
    TorrentSummary {
        name: name.to_string(),
        info_hash: hash.to_string(),
        files: vec![FileEntry {
            name: "a.mp4".to_string(),
            url: format!("http://h/{hash}/a.mp4"),
            length: 10,
            mime_type: "video/mp4".to_string(),
            depth: 1,
        }],
        length: 10,
        playlist: "#EXTM3U".to_string(),
    }
}
