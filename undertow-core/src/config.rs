//! Configuration for the gateway and the supervisor.
//!
//! Values come from defaults, then `UNDERTOW_*` environment variables; the
//! CLI applies its flags on top.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::address::AddressPreference;
use crate::engine::{DEFAULT_READAHEAD, ReadOptions};

/// Default HTTP port of the gateway.
pub const DEFAULT_PORT: u16 = 6969;

/// Streaming gateway settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Root for the piece cache database and saved descriptors
    pub download_dir: PathBuf,
    /// Host the HTTP listener binds to
    pub listen_addr: IpAddr,
    /// Outgoing address for engine fetches
    pub local_addr: Option<IpAddr>,
    pub max_conns_per_torrent: usize,
    pub port: u16,
    /// Readahead in bytes; negative selects the engine default
    pub readahead: i64,
    pub responsive: bool,
    pub resume_torrents: bool,
    pub profiling: bool,
    /// Purge cached data on every delete, even without `deleteFiles`
    pub delete_data_on_drop: bool,
    pub delete_database_on_exit: bool,
    pub address_preference: AddressPreference,
    pub shutdown_timeout: Duration,
    pub fetch_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            download_dir: std::env::temp_dir(),
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            local_addr: None,
            max_conns_per_torrent: 200,
            port: DEFAULT_PORT,
            readahead: DEFAULT_READAHEAD as i64,
            responsive: false,
            resume_torrents: true,
            profiling: false,
            delete_data_on_drop: false,
            delete_database_on_exit: false,
            address_preference: AddressPreference::default(),
            shutdown_timeout: Duration::from_secs(9),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    /// Read options for stream requests.
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            responsive: self.responsive,
            readahead: u64::try_from(self.readahead).ok(),
        }
    }

    /// Directory holding saved `.torrent` descriptors.
    pub fn descriptor_dir(&self) -> PathBuf {
        self.download_dir.join("torrents")
    }

    /// Location of the piece cache database.
    pub fn database_path(&self) -> PathBuf {
        self.download_dir.join("torrents.db")
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.port)
    }
}

/// Companion supervisor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub port: u16,
    /// Program started as the gateway, invoked with `serve`
    pub gateway_program: PathBuf,
    /// Download root handed to the spawned gateway
    pub download_dir: Option<PathBuf>,
    pub health_timeout: Duration,
    pub poll_timeout: Duration,
    /// How long to wait for a freshly spawned gateway to answer
    pub startup_timeout: Duration,
    pub close_client_on_empty: bool,
    pub close_client_on_exit: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            gateway_program: std::env::current_exe().unwrap_or_else(|_| PathBuf::from("undertow")),
            download_dir: None,
            health_timeout: Duration::from_millis(500),
            poll_timeout: Duration::from_secs(5),
            startup_timeout: Duration::from_secs(5),
            close_client_on_empty: false,
            close_client_on_exit: true,
        }
    }
}

impl SupervisorConfig {
    /// Command line arguments for the spawned gateway.
    pub fn gateway_args(&self) -> Vec<String> {
        let mut args = vec![
            "serve".to_string(),
            "--port".to_string(),
            self.port.to_string(),
        ];
        if let Some(dir) = &self.download_dir {
            args.push("--download-dir".to_string());
            args.push(dir.display().to_string());
        }
        args
    }

    /// Base URL of the gateway on the loopback interface.
    pub fn gateway_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// Complete configuration for both processes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UndertowConfig {
    pub gateway: GatewayConfig,
    pub supervisor: SupervisorConfig,
}

impl UndertowConfig {
    /// Defaults overridden by `UNDERTOW_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("UNDERTOW_DOWNLOAD_DIR") {
            config.gateway.download_dir = PathBuf::from(&dir);
            config.supervisor.download_dir = Some(PathBuf::from(dir));
        }
        if let Some(addr) = env_parse("UNDERTOW_LISTEN_ADDR") {
            config.gateway.listen_addr = addr;
        }
        if let Some(addr) = env_parse("UNDERTOW_LOCAL_ADDR") {
            config.gateway.local_addr = Some(addr);
        }
        if let Some(conns) = env_parse("UNDERTOW_MAX_CONNS") {
            config.gateway.max_conns_per_torrent = conns;
        }
        if let Some(port) = env_parse("UNDERTOW_PORT") {
            config.gateway.port = port;
            config.supervisor.port = port;
        }
        if let Some(readahead) = env_parse("UNDERTOW_READAHEAD") {
            config.gateway.readahead = readahead;
        }
        if let Some(responsive) = env_parse("UNDERTOW_RESPONSIVE") {
            config.gateway.responsive = responsive;
        }
        if let Some(resume) = env_parse("UNDERTOW_RESUME") {
            config.gateway.resume_torrents = resume;
        }
        if let Some(profiling) = env_parse("UNDERTOW_PROFILING") {
            config.gateway.profiling = profiling;
        }
        if let Some(delete) = env_parse("UNDERTOW_DELETE_DATA_ON_DROP") {
            config.gateway.delete_data_on_drop = delete;
        }
        if let Some(delete) = env_parse("UNDERTOW_DELETE_DATABASE_ON_EXIT") {
            config.gateway.delete_database_on_exit = delete;
        }
        if let Some(preference) = env_parse("UNDERTOW_ADDRESS_PREFERENCE") {
            config.gateway.address_preference = preference;
        }
        if let Some(seconds) = env_parse("UNDERTOW_SHUTDOWN_TIMEOUT") {
            config.gateway.shutdown_timeout = Duration::from_secs(seconds);
        }
        if let Some(seconds) = env_parse("UNDERTOW_FETCH_TIMEOUT") {
            config.gateway.fetch_timeout = Duration::from_secs(seconds);
        }
        if let Ok(program) = std::env::var("UNDERTOW_GATEWAY_PROGRAM") {
            config.supervisor.gateway_program = PathBuf::from(program);
        }
        if let Some(millis) = env_parse("UNDERTOW_HEALTH_TIMEOUT_MS") {
            config.supervisor.health_timeout = Duration::from_millis(millis);
        }
        if let Some(millis) = env_parse("UNDERTOW_POLL_TIMEOUT_MS") {
            config.supervisor.poll_timeout = Duration::from_millis(millis);
        }
        if let Some(millis) = env_parse("UNDERTOW_STARTUP_TIMEOUT_MS") {
            config.supervisor.startup_timeout = Duration::from_millis(millis);
        }
        if let Some(close) = env_parse("UNDERTOW_CLOSE_ON_EMPTY") {
            config.supervisor.close_client_on_empty = close;
        }
        if let Some(close) = env_parse("UNDERTOW_CLOSE_ON_EXIT") {
            config.supervisor.close_client_on_exit = close;
        }

        config
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(variable = name, value = %value, "Ignoring unparseable environment variable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = UndertowConfig::default();

        assert_eq!(config.gateway.port, 6969);
        assert_eq!(config.gateway.max_conns_per_torrent, 200);
        assert_eq!(config.gateway.readahead, 32 * 1024 * 1024);
        assert_eq!(config.gateway.readahead, DEFAULT_READAHEAD as i64);
        assert!(config.gateway.resume_torrents);
        assert!(!config.gateway.responsive);
        assert_eq!(config.gateway.shutdown_timeout, Duration::from_secs(9));
        assert_eq!(config.gateway.address_preference, AddressPreference::PreferFirstOctet(192));
        assert_eq!(config.supervisor.health_timeout, Duration::from_millis(500));
        assert!(config.supervisor.close_client_on_exit);
        assert!(!config.supervisor.close_client_on_empty);
    }

    #[test]
    fn test_negative_readahead_uses_engine_default() {
        let config = GatewayConfig {
            readahead: -1,
            responsive: true,
            ..Default::default()
        };
        assert_eq!(
            config.read_options(),
            ReadOptions {
                responsive: true,
                readahead: None
            }
        );
        assert_eq!(GatewayConfig::default().read_options().readahead, Some(32 * 1024 * 1024));
    }

    #[test]
    fn test_engine_default_matches_configured_readahead() {
        let configured = GatewayConfig::default().read_options().readahead;
        let fallback = GatewayConfig {
            readahead: -1,
            ..Default::default()
        }
        .read_options()
        .readahead
        .unwrap_or(DEFAULT_READAHEAD);
        assert_eq!(configured, Some(fallback));
    }

    #[test]
    fn test_layout_paths() {
        let config = GatewayConfig {
            download_dir: PathBuf::from("/data"),
            ..Default::default()
        };
        assert_eq!(config.descriptor_dir(), PathBuf::from("/data/torrents"));
        assert_eq!(config.database_path(), PathBuf::from("/data/torrents.db"));
        assert_eq!(config.bind_addr().to_string(), "0.0.0.0:6969");
    }

    #[test]
    fn test_gateway_args_carry_port_and_download_dir() {
        let config = SupervisorConfig {
            port: 7000,
            download_dir: Some(PathBuf::from("/data")),
            ..Default::default()
        };
        assert_eq!(
            config.gateway_args(),
            vec!["serve", "--port", "7000", "--download-dir", "/data"]
        );
        assert_eq!(config.gateway_url(), "http://127.0.0.1:7000");
    }

    #[test]
    fn test_env_overrides() {
        // SAFETY: only this test touches these variables
        unsafe {
            std::env::set_var("UNDERTOW_PORT", "7070");
            std::env::set_var("UNDERTOW_RESPONSIVE", "true");
            std::env::set_var("UNDERTOW_MAX_CONNS", "not-a-number");
            std::env::set_var("UNDERTOW_ADDRESS_PREFERENCE", "first");
        }

        let config = UndertowConfig::from_env();
        assert_eq!(config.gateway.port, 7070);
        assert_eq!(config.supervisor.port, 7070);
        assert!(config.gateway.responsive);
        assert_eq!(config.gateway.max_conns_per_torrent, 200);
        assert_eq!(config.gateway.address_preference, AddressPreference::First);

        unsafe {
            std::env::remove_var("UNDERTOW_PORT");
            std::env::remove_var("UNDERTOW_RESPONSIVE");
            std::env::remove_var("UNDERTOW_MAX_CONNS");
            std::env::remove_var("UNDERTOW_ADDRESS_PREFERENCE");
        }
    }
}
