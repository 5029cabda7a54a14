mod api;
mod config;
mod connection;
mod filters;
mod license;
mod sessions;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use mystnode_logging::LogFormat;
use mystnode_sessions::Database;

use crate::config::{FileConfig, NodeConfig, Overrides, CONFIG_FILE_NAME};
use crate::connection::{ConfiguredLocation, StatusBoard};
use crate::sessions::SessionsAction;

#[derive(Parser, Debug)]
#[command(
    name = "mystnode",
    about = "Decentralized VPN node with session accounting",
    version
)]
struct Cli {
    /// Path to config file (default: <data-dir>/mystnode.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the session database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    log_format: LogFormatChoice,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write JSON logs to a daily-rotated file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the node HTTP API
    Serve {
        /// IP address of interface to listen for incoming connections
        #[arg(long)]
        tequilapi_address: Option<IpAddr>,

        /// Port for listening incoming API requests
        #[arg(long)]
        tequilapi_port: Option<u16>,

        /// OpenVPN binary to use for tunnel connections
        #[arg(long)]
        openvpn_binary: Option<PathBuf>,
    },

    /// Query and manage recorded sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Show license information
    License {
        /// Show warranty
        #[arg(long)]
        warranty: bool,

        /// Show conditions
        #[arg(long)]
        conditions: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::License {
        warranty,
        conditions,
    } = cli.command
    {
        if warranty {
            println!("{}", license::WARRANTY);
        }
        if conditions || !warranty {
            println!("{}", license::CONDITIONS);
        }
        return Ok(());
    }

    let config = load_config(&cli)?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = match config.log_dir {
        Some(ref log_dir) => Some(mystnode_logging::init_tracing_with_file(
            &config.log_level,
            cli.log_format.into(),
            log_dir,
        )),
        None => {
            mystnode_logging::init_tracing(&config.log_level, cli.log_format.into());
            None
        }
    };

    let db = Database::open_at(&Database::path_in(&config.data_dir))
        .context("Failed to open session database")?;

    match cli.command {
        Command::Serve { .. } => serve(&config, db).await,
        Command::Sessions { action } => sessions::handle_sessions_command(&db, action),
        Command::License { .. } => Ok(()),
    }
}

fn load_config(cli: &Cli) -> Result<NodeConfig> {
    let config_path = match cli.config {
        Some(ref path) => path.clone(),
        None => cli
            .data_dir
            .clone()
            .unwrap_or_else(NodeConfig::default_data_dir)
            .join(CONFIG_FILE_NAME),
    };

    let file = match FileConfig::load(&config_path)? {
        Some(file) => file,
        None if cli.config.is_some() => {
            anyhow::bail!("Config file not found: {}", config_path.display())
        }
        None => FileConfig::default(),
    };

    let (tequilapi_address, tequilapi_port, openvpn_binary) = match cli.command {
        Command::Serve {
            tequilapi_address,
            tequilapi_port,
            ref openvpn_binary,
        } => (tequilapi_address, tequilapi_port, openvpn_binary.clone()),
        _ => (None, None, None),
    };

    Ok(NodeConfig::resolve(
        file,
        Overrides {
            data_dir: cli.data_dir.clone(),
            log_level: cli.log_level.clone(),
            log_dir: cli.log_dir.clone(),
            openvpn_binary,
            tequilapi_address,
            tequilapi_port,
        },
    ))
}

async fn serve(config: &NodeConfig, db: Database) -> Result<()> {
    eprintln!("{}", license::summary());
    eprintln!();

    let state = api::AppState {
        db: Arc::new(db),
        connection: Arc::new(StatusBoard::new()),
        location: Arc::new(ConfiguredLocation::new(config.location.clone())),
    };
    let router = api::create_router(state);

    let addr = SocketAddr::new(config.tequilapi.address, config.tequilapi.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API server to {}", addr))?;

    info!(
        %addr,
        data_dir = %config.data_dir.display(),
        openvpn_binary = %config.openvpn_binary.display(),
        "Tequilapi listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
