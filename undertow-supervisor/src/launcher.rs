//! Starting the gateway as a detached subprocess.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::LaunchError;

/// Starts gateway processes.
pub trait Launcher: Send + Sync {
    /// Spawns `program` with `args` without waiting for it.
    ///
    /// # Errors
    ///
    /// - `LaunchError::Spawn` - Process could not be started
    fn launch(&self, program: &Path, args: &[String]) -> Result<(), LaunchError>;
}

/// Spawns the gateway detached from the player: null stdio and, on unix,
/// its own process group so player signals do not reach it.
///
/// Must be called inside a tokio runtime; the child is reaped by a
/// background task.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubprocessLauncher;

impl Launcher for SubprocessLauncher {
    fn launch(&self, program: &Path, args: &[String]) -> Result<(), LaunchError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;
        let pid = child.id();
        tracing::info!(program = %program.display(), ?args, ?pid, "Started gateway process");

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!(?pid, %status, "Gateway process exited"),
                Err(e) => tracing::warn!(?pid, error = %e, "Failed to wait for gateway process"),
            }
        });
        Ok(())
    }
}
