//! CLI command implementations

use std::io::{BufRead, Write};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Subcommand};
use undertow_core::{AddressPreference, GatewayConfig, SupervisorConfig, UndertowConfig};
use undertow_supervisor::menu::human_size;
use undertow_supervisor::{
    GatewayApi, GatewayClient, MpvIpcPlayer, Player, PrintPlayer, SubprocessLauncher, Supervisor,
};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the streaming gateway
    Serve(ServeArgs),
    /// Open a torrent through the gateway, starting it if needed
    Open {
        /// Magnet link, info-hash, .torrent path or URL
        identifier: String,
        #[command(flatten)]
        client: ClientArgs,
        #[command(flatten)]
        player: PlayerArgs,
    },
    /// List torrents known to the gateway
    List {
        #[command(flatten)]
        client: ClientArgs,
    },
    /// Show the torrent menu and run one entry
    Menu {
        /// Entry number to run without prompting
        #[arg(long)]
        choice: Option<usize>,
        #[command(flatten)]
        client: ClientArgs,
        #[command(flatten)]
        player: PlayerArgs,
    },
    /// Remove a torrent from the gateway
    Remove {
        /// Torrent info hash
        info_hash: String,
        /// Also delete cached data and the saved descriptor
        #[arg(long)]
        delete_files: bool,
        #[command(flatten)]
        client: ClientArgs,
    },
    /// Ask the gateway to shut down
    Stop {
        #[command(flatten)]
        client: ClientArgs,
    },
    /// Stay connected to mpv, routing torrents it opens through the gateway
    Attach {
        /// mpv IPC socket (`--input-ipc-server`)
        #[arg(long)]
        mpv_socket: PathBuf,
        #[command(flatten)]
        client: ClientArgs,
    },
}

/// Gateway settings; each flag overrides the matching `UNDERTOW_*` variable.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Root for the piece cache and saved torrents
    #[arg(long)]
    pub download_dir: Option<PathBuf>,
    /// Address the HTTP listener binds to
    #[arg(long)]
    pub listen_addr: Option<IpAddr>,
    /// Outgoing address for piece downloads
    #[arg(long)]
    pub local_addr: Option<IpAddr>,
    /// Maximum concurrent downloads per torrent
    #[arg(long)]
    pub max_conns: Option<usize>,
    /// HTTP port
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Readahead in bytes; negative uses the engine default
    #[arg(long, allow_negative_numbers = true)]
    pub readahead: Option<i64>,
    /// Return data before verification
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub responsive: Option<bool>,
    /// Resume saved torrents on start and save added ones
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub resume: Option<bool>,
    /// Mount /debug/engine
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub profiling: Option<bool>,
    /// Purge cached data on every delete
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub delete_data_on_drop: Option<bool>,
    /// Delete the piece cache database on exit
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub delete_database_on_exit: Option<bool>,
    /// Local address choice: `first`, `prefer-<octet>` or an octet
    #[arg(long)]
    pub address_preference: Option<AddressPreference>,
    /// Seconds in-flight requests get to finish on shutdown
    #[arg(long)]
    pub shutdown_timeout: Option<u64>,
    /// Seconds allowed for each remote descriptor or piece request
    #[arg(long)]
    pub fetch_timeout: Option<u64>,
}

impl ServeArgs {
    pub fn apply(self, config: &mut GatewayConfig) {
        if let Some(dir) = self.download_dir {
            config.download_dir = dir;
        }
        if let Some(addr) = self.listen_addr {
            config.listen_addr = addr;
        }
        if self.local_addr.is_some() {
            config.local_addr = self.local_addr;
        }
        if let Some(conns) = self.max_conns {
            config.max_conns_per_torrent = conns;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(readahead) = self.readahead {
            config.readahead = readahead;
        }
        if let Some(responsive) = self.responsive {
            config.responsive = responsive;
        }
        if let Some(resume) = self.resume {
            config.resume_torrents = resume;
        }
        if let Some(profiling) = self.profiling {
            config.profiling = profiling;
        }
        if let Some(delete) = self.delete_data_on_drop {
            config.delete_data_on_drop = delete;
        }
        if let Some(delete) = self.delete_database_on_exit {
            config.delete_database_on_exit = delete;
        }
        if let Some(preference) = self.address_preference {
            config.address_preference = preference;
        }
        if let Some(seconds) = self.shutdown_timeout {
            config.shutdown_timeout = Duration::from_secs(seconds);
        }
        if let Some(seconds) = self.fetch_timeout {
            config.fetch_timeout = Duration::from_secs(seconds);
        }
    }
}

/// How to reach, and if needed start, the gateway.
#[derive(Args, Debug, Default)]
pub struct ClientArgs {
    /// Gateway port
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Program started as the gateway
    #[arg(long)]
    pub gateway_program: Option<PathBuf>,
    /// Download root passed to a started gateway
    #[arg(long)]
    pub download_dir: Option<PathBuf>,
    /// Health probe timeout in milliseconds
    #[arg(long)]
    pub health_timeout_ms: Option<u64>,
    /// Torrent list poll timeout in milliseconds
    #[arg(long)]
    pub poll_timeout_ms: Option<u64>,
    /// Milliseconds to wait for a started gateway to answer
    #[arg(long)]
    pub startup_timeout_ms: Option<u64>,
    /// Stop a gateway we started once no torrents remain
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub close_on_empty: Option<bool>,
    /// Stop a gateway we started when the player exits
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub close_on_exit: Option<bool>,
}

impl ClientArgs {
    pub fn apply(self, config: &mut SupervisorConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(program) = self.gateway_program {
            config.gateway_program = program;
        }
        if self.download_dir.is_some() {
            config.download_dir = self.download_dir;
        }
        if let Some(millis) = self.health_timeout_ms {
            config.health_timeout = Duration::from_millis(millis);
        }
        if let Some(millis) = self.poll_timeout_ms {
            config.poll_timeout = Duration::from_millis(millis);
        }
        if let Some(millis) = self.startup_timeout_ms {
            config.startup_timeout = Duration::from_millis(millis);
        }
        if let Some(close) = self.close_on_empty {
            config.close_client_on_empty = close;
        }
        if let Some(close) = self.close_on_exit {
            config.close_client_on_exit = close;
        }
    }

    fn config(self) -> SupervisorConfig {
        let mut config = UndertowConfig::from_env().supervisor;
        self.apply(&mut config);
        config
    }
}

#[derive(Args, Debug, Default)]
pub struct PlayerArgs {
    /// mpv IPC socket; without it results are printed
    #[arg(long)]
    pub mpv_socket: Option<PathBuf>,
}

impl PlayerArgs {
    fn player(self) -> Arc<dyn Player> {
        match self.mpv_socket {
            Some(socket) => Arc::new(MpvIpcPlayer::new(socket)),
            None => Arc::new(PrintPlayer),
        }
    }
}

fn supervisor(config: SupervisorConfig, player: Arc<dyn Player>) -> Supervisor {
    let api = Arc::new(GatewayClient::from_config(&config));
    Supervisor::new(config, api, Arc::new(SubprocessLauncher), player)
}

/// Handle the CLI command
///
/// # Errors
/// Returns the failure of the command that ran
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve(args) => serve(args).await,
        Commands::Open {
            identifier,
            client,
            player,
        } => open(identifier, client, player).await,
        Commands::List { client } => list(client).await,
        Commands::Menu {
            choice,
            client,
            player,
        } => menu(choice, client, player).await,
        Commands::Remove {
            info_hash,
            delete_files,
            client,
        } => remove(info_hash, delete_files, client).await,
        Commands::Stop { client } => stop(client).await,
        Commands::Attach { mpv_socket, client } => attach(mpv_socket, client).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = UndertowConfig::from_env().gateway;
    args.apply(&mut config);
    tracing::debug!(?config, "Starting gateway");
    undertow_web::run_server(config).await.context("gateway failed")
}

async fn open(identifier: String, client: ClientArgs, player: PlayerArgs) -> anyhow::Result<()> {
    let mut supervisor = supervisor(client.config(), player.player());
    if !supervisor.open(&identifier).await? {
        bail!("not a torrent identifier: {identifier}");
    }
    Ok(())
}

async fn list(client: ClientArgs) -> anyhow::Result<()> {
    let api = GatewayClient::from_config(&client.config());
    let torrents = api.list().await?;
    if torrents.is_empty() {
        println!("No torrents.");
        return Ok(());
    }
    for torrent in torrents {
        println!("{}  {} [{}]", torrent.info_hash, torrent.name, human_size(torrent.length));
        for file in torrent.files {
            println!("    {} [{}]  {}", file.name, human_size(file.length), file.url);
        }
    }
    Ok(())
}

async fn menu(choice: Option<usize>, client: ClientArgs, player: PlayerArgs) -> anyhow::Result<()> {
    let mut supervisor = supervisor(client.config(), player.player());
    let menu = supervisor.menu().await;
    let choices = menu.choices();
    for (number, (label, _)) in choices.iter().enumerate() {
        println!("{:>3}. {label}", number + 1);
    }

    let number = match choice {
        Some(number) => number,
        None => {
            print!("> ");
            std::io::stdout().flush()?;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            match line.trim() {
                "" => return Ok(()),
                input => input.parse().context("expected an entry number")?,
            }
        }
    };
    let Some((_, action)) = number.checked_sub(1).and_then(|index| choices.get(index)) else {
        bail!("no menu entry {number}");
    };

    tracing::debug!(?action, "Running menu entry");
    let next = supervisor.select(action).await?;
    print!("{}", next.render());
    Ok(())
}

async fn remove(info_hash: String, delete_files: bool, client: ClientArgs) -> anyhow::Result<()> {
    let api = GatewayClient::from_config(&client.config());
    api.remove(&info_hash, delete_files).await?;
    println!("Removed {info_hash}");
    Ok(())
}

async fn stop(client: ClientArgs) -> anyhow::Result<()> {
    let api = GatewayClient::from_config(&client.config());
    if !api.health().await {
        println!("Gateway is not running.");
        return Ok(());
    }
    api.exit().await?;
    println!("Shutdown initiated");
    Ok(())
}

#[cfg(unix)]
async fn attach(mpv_socket: PathBuf, client: ClientArgs) -> anyhow::Result<()> {
    let player = Arc::new(MpvIpcPlayer::new(&mpv_socket));
    let mut supervisor = supervisor(client.config(), player);
    let session = undertow_supervisor::MpvSession::connect(&mpv_socket)
        .await
        .with_context(|| format!("cannot attach to mpv at {}", mpv_socket.display()))?;
    tracing::info!(socket = %mpv_socket.display(), "Attached to mpv");
    session.run(&mut supervisor).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn attach(_mpv_socket: PathBuf, _client: ClientArgs) -> anyhow::Result<()> {
    bail!("attaching to mpv needs unix domain sockets")
}
