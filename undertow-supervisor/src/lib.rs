//! Undertow Supervisor - gateway lifecycle from inside a media player
//!
//! Starts the streaming gateway as a detached subprocess when needed, keeps
//! a polled view of its torrents, builds the selection menu and hooks the
//! player's file opening so torrent identifiers play as gateway playlists.
//! On unix, [`MpvSession`] wires those hooks to a running mpv.

pub mod client;
pub mod error;
pub mod identifier;
pub mod launcher;
pub mod menu;
pub mod player;
#[cfg(unix)]
pub mod session;
pub mod supervisor;

#[cfg(test)]
mod test_fixtures;

// Re-export main types
pub use client::{GatewayApi, GatewayClient};
pub use error::{LaunchError, PlayerError, SupervisorError};
pub use launcher::{Launcher, SubprocessLauncher};
pub use menu::{Menu, MenuAction, MenuItem};
pub use player::{MpvIpcPlayer, Player, PrintPlayer};
#[cfg(unix)]
pub use session::{MpvSession, PlayerEvent};
pub use supervisor::{GatewayState, Supervisor, TrackedTorrent};
