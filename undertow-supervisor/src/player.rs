//! Media player control.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::PlayerError;

/// Player operations the supervisor drives.
#[async_trait]
pub trait Player: Send + Sync {
    /// Starts playing `url`, replacing the current item.
    ///
    /// # Errors
    ///
    /// Player unreachable or command rejected.
    async fn load(&self, url: &str) -> Result<(), PlayerError>;

    /// Substitutes the target the player is about to open.
    ///
    /// mpv only honours this while an `on_load` hook is pending, see
    /// [`crate::session::MpvSession`].
    ///
    /// # Errors
    ///
    /// Player unreachable or command rejected.
    async fn replace_open_target(&self, target: &str) -> Result<(), PlayerError>;

    /// Shows a short on-screen message.
    ///
    /// # Errors
    ///
    /// Player unreachable or command rejected.
    async fn show_text(&self, text: &str) -> Result<(), PlayerError>;
}

#[derive(Debug, Deserialize)]
struct IpcReply {
    error: Option<String>,
    request_id: Option<u64>,
}

/// mpv controlled over its JSON IPC socket (`--input-ipc-server`).
///
/// One connection per command; events arriving before the reply are skipped.
#[derive(Debug)]
pub struct MpvIpcPlayer {
    socket: PathBuf,
    next_request: AtomicU64,
}

impl MpvIpcPlayer {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            next_request: AtomicU64::new(1),
        }
    }

    pub fn socket(&self) -> &std::path::Path {
        &self.socket
    }

    #[cfg(unix)]
    async fn command(&self, args: Vec<Value>) -> Result<(), PlayerError> {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::UnixStream;

        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let name = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut line = serde_json::to_string(&json!({ "command": args, "request_id": request_id }))?;
        line.push('\n');

        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|source| PlayerError::Connect {
                path: self.socket.clone(),
                source,
            })?;
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(line.as_bytes()).await?;

        let mut lines = BufReader::new(read_half).lines();
        while let Some(reply) = lines.next_line().await? {
            let reply: IpcReply = serde_json::from_str(&reply)?;
            let Some(error) = reply.error else {
                continue;
            };
            if reply.request_id.is_some_and(|id| id != request_id) {
                continue;
            }
            if error == "success" {
                tracing::debug!(command = %name, "Player command succeeded");
                return Ok(());
            }
            return Err(PlayerError::Command { command: name, error });
        }
        Err(PlayerError::Command {
            command: name,
            error: "connection closed before reply".to_string(),
        })
    }

    #[cfg(not(unix))]
    async fn command(&self, _args: Vec<Value>) -> Result<(), PlayerError> {
        let _ = self.next_request.fetch_add(1, Ordering::Relaxed);
        Err(PlayerError::Unsupported)
    }
}

#[async_trait]
impl Player for MpvIpcPlayer {
    async fn load(&self, url: &str) -> Result<(), PlayerError> {
        self.command(vec![json!("loadfile"), json!(url), json!("replace")]).await
    }

    async fn replace_open_target(&self, target: &str) -> Result<(), PlayerError> {
        self.command(vec![
            json!("set_property"),
            json!("stream-open-filename"),
            json!(target),
        ])
        .await
    }

    async fn show_text(&self, text: &str) -> Result<(), PlayerError> {
        self.command(vec![json!("show-text"), json!(text), json!(3000)]).await
    }
}

/// Prints what a player would do; used when no player is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrintPlayer;

#[async_trait]
impl Player for PrintPlayer {
    async fn load(&self, url: &str) -> Result<(), PlayerError> {
        println!("{}", url.strip_prefix("memory://").unwrap_or(url));
        Ok(())
    }

    async fn replace_open_target(&self, target: &str) -> Result<(), PlayerError> {
        println!("{}", target.strip_prefix("memory://").unwrap_or(target));
        Ok(())
    }

    async fn show_text(&self, text: &str) -> Result<(), PlayerError> {
        println!("{text}");
        Ok(())
    }
}
