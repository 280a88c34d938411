//! Long-lived mpv IPC connection feeding player events to the supervisor.
//!
//! The session registers an `on_load` hook so every file mpv is about to
//! open passes through [`Supervisor::on_file_open`] before playback starts,
//! and turns mpv's `shutdown` event into [`Supervisor::on_player_shutdown`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::PlayerError;
use crate::supervisor::Supervisor;

const ON_LOAD_HOOK: &str = "on_load";
/// Userdata mpv echoes back as `id` in our hook events.
const HOOK_USERDATA: u64 = 1;
const HOOK_PRIORITY: i64 = 50;

/// Player events the supervisor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// mpv is about to open a file and waits for `hook-ack <hook_id>`.
    Load { hook_id: u64 },
    Shutdown,
}

impl PlayerEvent {
    fn parse(message: &Value) -> Option<Self> {
        match message.get("event")?.as_str()? {
            "hook" => message
                .get("hook_id")
                .and_then(Value::as_u64)
                .map(|hook_id| Self::Load { hook_id }),
            "shutdown" => Some(Self::Shutdown),
            _ => None,
        }
    }
}

/// One persistent connection to mpv's `--input-ipc-server` socket.
pub struct MpvSession {
    socket: PathBuf,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    next_request: u64,
    /// Events read while waiting for a command reply
    pending: VecDeque<PlayerEvent>,
}

impl MpvSession {
    /// Connects and registers the `on_load` hook.
    ///
    /// # Errors
    ///
    /// - `PlayerError::Connect` - Socket not reachable
    /// - `PlayerError::Command` - mpv refused the hook registration
    pub async fn connect(socket: impl Into<PathBuf>) -> Result<Self, PlayerError> {
        let socket = socket.into();
        let stream = UnixStream::connect(&socket)
            .await
            .map_err(|source| PlayerError::Connect {
                path: socket.clone(),
                source,
            })?;
        let (read_half, writer) = stream.into_split();
        let mut session = Self {
            socket,
            lines: BufReader::new(read_half).lines(),
            writer,
            next_request: 1,
            pending: VecDeque::new(),
        };
        session
            .request(vec![
                json!("hook-add"),
                json!(ON_LOAD_HOOK),
                json!(HOOK_USERDATA),
                json!(HOOK_PRIORITY),
            ])
            .await?;
        tracing::debug!(socket = %session.socket.display(), "Registered mpv on_load hook");
        Ok(session)
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Next relevant event, or `None` once mpv closes the socket.
    ///
    /// # Errors
    ///
    /// Socket read failure or malformed message.
    pub async fn next_event(&mut self) -> Result<Option<PlayerEvent>, PlayerError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        while let Some(line) = self.lines.next_line().await? {
            let message: Value = serde_json::from_str(&line)?;
            if let Some(event) = PlayerEvent::parse(&message) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Target of the file mpv is currently opening.
    ///
    /// # Errors
    ///
    /// Property unavailable or connection lost.
    pub async fn open_target(&mut self) -> Result<String, PlayerError> {
        let data = self
            .request(vec![json!("get_property"), json!("stream-open-filename")])
            .await?;
        data.as_str().map(str::to_string).ok_or_else(|| PlayerError::Command {
            command: "get_property".to_string(),
            error: "stream-open-filename is not a string".to_string(),
        })
    }

    /// Lets mpv continue past a hook.
    ///
    /// # Errors
    ///
    /// Connection lost or hook id unknown to mpv.
    pub async fn ack(&mut self, hook_id: u64) -> Result<(), PlayerError> {
        self.request(vec![json!("hook-ack"), json!(hook_id)]).await?;
        Ok(())
    }

    /// Feeds events to `supervisor` until the player shuts down or disconnects.
    ///
    /// A failed open is logged and the hook is still acknowledged so mpv
    /// never stalls on a file.
    ///
    /// # Errors
    ///
    /// Socket failure while talking to mpv.
    pub async fn run(mut self, supervisor: &mut Supervisor) -> Result<(), PlayerError> {
        loop {
            match self.next_event().await? {
                Some(PlayerEvent::Load { hook_id }) => {
                    match self.open_target().await {
                        Ok(target) => {
                            if let Err(e) = supervisor.on_file_open(&target).await {
                                tracing::warn!(target = %target, error = %e, "Open hook failed");
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Could not read open target"),
                    }
                    self.ack(hook_id).await?;
                }
                Some(PlayerEvent::Shutdown) | None => {
                    tracing::info!("Player exited");
                    supervisor.on_player_shutdown().await;
                    return Ok(());
                }
            }
        }
    }

    /// Sends a command and returns its `data`, queueing events seen meanwhile.
    async fn request(&mut self, args: Vec<Value>) -> Result<Value, PlayerError> {
        let request_id = self.next_request;
        self.next_request += 1;
        let command = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut line = serde_json::to_string(&json!({ "command": args, "request_id": request_id }))?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;

        while let Some(line) = self.lines.next_line().await? {
            let message: Value = serde_json::from_str(&line)?;
            if let Some(event) = PlayerEvent::parse(&message) {
                self.pending.push_back(event);
                continue;
            }
            if message.get("request_id").and_then(Value::as_u64) != Some(request_id) {
                continue;
            }
            return match message.get("error").and_then(Value::as_str) {
                Some("success") => Ok(message.get("data").cloned().unwrap_or(Value::Null)),
                Some(error) => Err(PlayerError::Command {
                    command,
                    error: error.to_string(),
                }),
                None => Err(PlayerError::Command {
                    command,
                    error: "reply without status".to_string(),
                }),
            };
        }
        Err(PlayerError::Command {
            command,
            error: "connection closed before reply".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;
    use tokio::net::unix::OwnedWriteHalf;
    use undertow_core::SupervisorConfig;

    use super::*;
    use crate::supervisor::GatewayState;
    use crate::test_fixtures::harness;

    const MAGNET: &str = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567";

    struct FakeMpv {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl FakeMpv {
        async fn accept(listener: &UnixListener) -> Self {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, writer) = stream.into_split();
            Self {
                lines: BufReader::new(read_half).lines(),
                writer,
            }
        }

        async fn expect_command(&mut self) -> (Value, u64) {
            let line = self.lines.next_line().await.unwrap().unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            let id = request["request_id"].as_u64().unwrap();
            (request["command"].clone(), id)
        }

        async fn send(&mut self, message: Value) {
            let mut line = message.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }

        async fn reply(&mut self, request_id: u64, data: Value) {
            self.send(json!({ "data": data, "error": "success", "request_id": request_id }))
                .await;
        }
    }

    #[test]
    fn test_event_parsing() {
        assert_eq!(
            PlayerEvent::parse(&json!({ "event": "hook", "id": 1, "hook_id": 9 })),
            Some(PlayerEvent::Load { hook_id: 9 })
        );
        assert_eq!(
            PlayerEvent::parse(&json!({ "event": "shutdown" })),
            Some(PlayerEvent::Shutdown)
        );
        assert_eq!(PlayerEvent::parse(&json!({ "event": "start-file" })), None);
        assert_eq!(PlayerEvent::parse(&json!({ "error": "success", "request_id": 1 })), None);
    }

    #[tokio::test]
    async fn test_hook_substitutes_target_and_shutdown_stops_gateway() {
        let temp = tempfile::tempdir().unwrap();
        let socket = temp.path().join("mpv.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let mut h = harness(SupervisorConfig::default());

        let mpv = tokio::spawn(async move {
            let mut mpv = FakeMpv::accept(&listener).await;

            let (command, id) = mpv.expect_command().await;
            assert_eq!(command, json!(["hook-add", "on_load", 1, 50]));
            mpv.reply(id, Value::Null).await;

            mpv.send(json!({ "event": "start-file" })).await;
            mpv.send(json!({ "event": "hook", "id": 1, "hook_id": 7 })).await;

            let (command, id) = mpv.expect_command().await;
            assert_eq!(command, json!(["get_property", "stream-open-filename"]));
            mpv.reply(id, json!(MAGNET)).await;

            let (command, id) = mpv.expect_command().await;
            assert_eq!(command, json!(["hook-ack", 7]));
            mpv.reply(id, Value::Null).await;

            mpv.send(json!({ "event": "shutdown" })).await;
        });

        let session = MpvSession::connect(&socket).await.unwrap();
        session.run(&mut h.supervisor).await.unwrap();
        mpv.await.unwrap();

        assert_eq!(h.gateway.added.lock().clone(), vec![MAGNET.to_string()]);
        assert_eq!(
            h.player.targets.lock()[0],
            "memory://#EXTM3U\n#EXTINF:0,a.mp4\nhttp://h/a.mp4"
        );
        assert_eq!(h.gateway.exits.load(Ordering::SeqCst), 1);
        assert_eq!(h.supervisor.state(), GatewayState::Stopped);
    }

    #[tokio::test]
    async fn test_hook_acked_even_when_open_fails() {
        let temp = tempfile::tempdir().unwrap();
        let socket = temp.path().join("mpv.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let mut h = harness(SupervisorConfig::default());
        h.gateway.reject_add.store(true, Ordering::SeqCst);

        let mpv = tokio::spawn(async move {
            let mut mpv = FakeMpv::accept(&listener).await;
            let (_, id) = mpv.expect_command().await;
            mpv.reply(id, Value::Null).await;

            mpv.send(json!({ "event": "hook", "id": 1, "hook_id": 3 })).await;
            let (_, id) = mpv.expect_command().await;
            mpv.reply(id, json!(MAGNET)).await;

            let (command, id) = mpv.expect_command().await;
            mpv.reply(id, Value::Null).await;
            command
        });

        let session = MpvSession::connect(&socket).await.unwrap();
        session.run(&mut h.supervisor).await.unwrap();

        assert_eq!(mpv.await.unwrap(), json!(["hook-ack", 3]));
        assert!(h.player.targets.lock().is_empty());
        assert_eq!(h.player.texts.lock().len(), 1);
        // Socket closed without a shutdown event still counts as player exit.
        assert_eq!(h.gateway.exits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refused_hook_registration_is_error() {
        let temp = tempfile::tempdir().unwrap();
        let socket = temp.path().join("mpv.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        tokio::spawn(async move {
            let mut mpv = FakeMpv::accept(&listener).await;
            let (_, id) = mpv.expect_command().await;
            mpv.send(json!({ "error": "invalid parameter", "request_id": id })).await;
        });

        let result = MpvSession::connect(&socket).await;
        assert!(matches!(result, Err(PlayerError::Command { error, .. }) if error == "invalid parameter"));
    }
}
