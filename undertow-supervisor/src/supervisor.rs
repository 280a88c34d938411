//! Gateway lifecycle state machine driven from the player.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use undertow_core::{FileEntry, SupervisorConfig, TorrentSummary};

use crate::client::GatewayApi;
use crate::error::SupervisorError;
use crate::identifier::should_ingest;
use crate::launcher::Launcher;
use crate::menu::{Menu, MenuAction};
use crate::player::Player;

const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle of the supervised gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Stopped,
    Starting,
    Running,
}

/// A torrent as last seen by a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedTorrent {
    pub info_hash: String,
    pub name: String,
    pub length: u64,
    pub files: Vec<FileEntry>,
}

impl From<TorrentSummary> for TrackedTorrent {
    fn from(summary: TorrentSummary) -> Self {
        Self {
            info_hash: summary.info_hash,
            name: summary.name,
            length: summary.length,
            files: summary.files,
        }
    }
}

/// Keeps the gateway running while the player needs it and mirrors its torrents.
pub struct Supervisor {
    config: SupervisorConfig,
    api: Arc<dyn GatewayApi>,
    launcher: Arc<dyn Launcher>,
    player: Arc<dyn Player>,
    state: GatewayState,
    launched_by_us: bool,
    torrents: BTreeMap<String, TrackedTorrent>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        api: Arc<dyn GatewayApi>,
        launcher: Arc<dyn Launcher>,
        player: Arc<dyn Player>,
    ) -> Self {
        Self {
            config,
            api,
            launcher,
            player,
            state: GatewayState::Stopped,
            launched_by_us: false,
            torrents: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    pub fn launched_by_us(&self) -> bool {
        self.launched_by_us
    }

    /// Tracked torrents, sorted by name.
    pub fn torrents(&self) -> Vec<&TrackedTorrent> {
        let mut torrents: Vec<&TrackedTorrent> = self.torrents.values().collect();
        torrents.sort_by(|a, b| a.name.cmp(&b.name));
        torrents
    }

    /// Ensures a gateway is running, spawning one if the health probe fails.
    ///
    /// Returns `true` if this call spawned the process.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::Launch` - Process could not be spawned
    pub async fn start(&mut self) -> Result<bool, SupervisorError> {
        if self.api.health().await {
            tracing::debug!("Gateway already running");
            self.state = GatewayState::Running;
            return Ok(false);
        }

        self.state = GatewayState::Starting;
        if let Err(e) = self
            .launcher
            .launch(&self.config.gateway_program, &self.config.gateway_args())
        {
            self.state = GatewayState::Stopped;
            return Err(e.into());
        }
        self.launched_by_us = true;

        let deadline = Instant::now() + self.config.startup_timeout;
        while !self.api.health().await {
            if Instant::now() >= deadline {
                tracing::warn!(timeout = ?self.config.startup_timeout, "Gateway not answering yet");
                break;
            }
            sleep(STARTUP_POLL_INTERVAL).await;
        }

        self.state = GatewayState::Running;
        tracing::info!(url = %self.config.gateway_url(), "Gateway started");
        Ok(true)
    }

    /// Stops the gateway if this supervisor launched it.
    ///
    /// Keyed on the launch rather than the last poll, so a gateway that
    /// missed one poll is still shut down. Returns `true` if an exit was
    /// requested.
    pub async fn stop(&mut self) -> bool {
        if !self.launched_by_us {
            return false;
        }
        if let Err(e) = self.api.exit().await {
            tracing::warn!(error = %e, "Gateway exit request failed");
        }
        self.state = GatewayState::Stopped;
        self.launched_by_us = false;
        self.torrents.clear();
        tracing::info!("Gateway stopped");
        true
    }

    /// Replaces the tracked torrents with the gateway's current list.
    ///
    /// A failed poll marks the gateway as stopped and clears the list.
    pub async fn poll(&mut self) -> usize {
        match self.api.list().await {
            Ok(summaries) => {
                self.state = GatewayState::Running;
                self.torrents = summaries
                    .into_iter()
                    .map(|summary| (summary.info_hash.clone(), TrackedTorrent::from(summary)))
                    .collect();
            }
            Err(e) => {
                tracing::debug!(error = %e, "Poll failed, gateway presumed stopped");
                self.state = GatewayState::Stopped;
                self.torrents.clear();
            }
        }
        self.close_if_empty().await;
        self.torrents.len()
    }

    /// Polls, then builds the menu.
    pub async fn menu(&mut self) -> Menu {
        self.poll().await;
        self.current_menu()
    }

    /// Menu for the current state without polling.
    pub fn current_menu(&self) -> Menu {
        Menu::build(self.state, self.torrents())
    }

    /// Runs a menu action and returns the menu to show next.
    ///
    /// Removal requests are sent in the background and not awaited.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::Launch` - Toggle could not start the gateway
    /// - `SupervisorError::Player` - Player refused to load a stream
    pub async fn select(&mut self, action: &MenuAction) -> Result<Menu, SupervisorError> {
        match action {
            MenuAction::ToggleGateway => {
                if self.state == GatewayState::Running {
                    self.stop().await;
                } else {
                    self.start().await?;
                }
                Ok(self.menu().await)
            }
            MenuAction::Play { url } => {
                self.player.load(url).await?;
                Ok(self.current_menu())
            }
            MenuAction::Remove {
                info_hash,
                delete_files,
            } => {
                let api = Arc::clone(&self.api);
                let hash = info_hash.clone();
                let delete_files = *delete_files;
                tokio::spawn(async move {
                    if let Err(e) = api.remove(&hash, delete_files).await {
                        tracing::warn!(info_hash = %hash, error = %e, "Remove request failed");
                    }
                });
                if let Some(removed) = self.torrents.remove(info_hash) {
                    self.notify(&format!("Removed {}", removed.name)).await;
                }
                self.close_if_empty().await;
                Ok(self.current_menu())
            }
        }
    }

    /// Player hook for every file about to be opened.
    ///
    /// Torrent identifiers are submitted to the gateway, started if needed,
    /// and the pending open target is replaced by the returned playlist.
    /// Returns `true` when the target was substituted. Failures are also
    /// shown on the player's OSD.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::Launch` - Gateway could not be started
    /// - `SupervisorError::Status` - Gateway rejected the identifier
    /// - `SupervisorError::Player` - Substitution failed
    pub async fn on_file_open(&mut self, target: &str) -> Result<bool, SupervisorError> {
        let Some(playlist) = self.submit(target).await? else {
            return Ok(false);
        };
        let result = self.player.replace_open_target(&memory_url(&playlist)).await;
        self.report(result.map_err(SupervisorError::from)).await?;
        Ok(true)
    }

    /// Like [`Supervisor::on_file_open`], but starts playback with a new
    /// `load` instead of replacing a pending open.
    ///
    /// # Errors
    ///
    /// Same as [`Supervisor::on_file_open`].
    pub async fn open(&mut self, target: &str) -> Result<bool, SupervisorError> {
        let Some(playlist) = self.submit(target).await? else {
            return Ok(false);
        };
        let result = self.player.load(&memory_url(&playlist)).await;
        self.report(result.map_err(SupervisorError::from)).await?;
        Ok(true)
    }

    /// Adds `target` to the gateway, returning its playlist.
    ///
    /// `None` means the target is not a torrent identifier.
    async fn submit(&mut self, target: &str) -> Result<Option<String>, SupervisorError> {
        if !should_ingest(target) {
            return Ok(None);
        }
        tracing::info!(target, "Opening torrent through gateway");
        let started = self.start().await.map(|_| ());
        self.report(started).await?;
        let playlist = self.api.add(target.trim()).await;
        self.report(playlist).await.map(Some)
    }

    /// Shows a failed step on the OSD before handing the error back.
    async fn report<T>(&self, result: Result<T, SupervisorError>) -> Result<T, SupervisorError> {
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Failed to open torrent");
            self.notify(&format!("Failed to open torrent: {e}")).await;
        }
        result
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.player.show_text(text).await {
            tracing::debug!(error = %e, "Player message not shown");
        }
    }

    /// Player shutdown hook.
    pub async fn on_player_shutdown(&mut self) {
        if self.config.close_client_on_exit {
            self.stop().await;
        }
    }

    async fn close_if_empty(&mut self) {
        if self.config.close_client_on_empty && self.torrents.is_empty() && self.state == GatewayState::Running {
            tracing::info!("No torrents left, stopping gateway");
            self.stop().await;
        }
    }
}

/// mpv `memory://` URL carrying a playlist inline.
fn memory_url(playlist: &str) -> String {
    format!("memory://{playlist}")
}
