use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use kanpe_bridge::BridgeServer;
use kanpe_caster::{CasterEvent, CasterSession, SessionConfig};
use kanpe_hub::{Hub, HubConfig, HubEvent};

mod config;

use config::{FileConfig, load_config};

#[derive(Parser)]
#[command(name = "bikanpe")]
#[command(about = "LAN cue card fabric for live event production")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to bikanpe.toml (defaults to the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the director hub that broadcasts cue cards
    Director(DirectorArgs),

    /// Run a caster that displays cue cards for its monitors
    Caster(CasterArgs),
}

#[derive(Parser)]
struct DirectorArgs {
    /// Port for the hub WebSocket server
    #[arg(short, long)]
    port: Option<u16>,

    /// Server name shown to connecting casters
    #[arg(long)]
    name: Option<String>,

    /// Start with an empty monitor registry
    #[arg(long)]
    no_default_monitors: bool,
}

#[derive(Parser)]
struct CasterArgs {
    /// Hub address (host:port or a full ws:// URL)
    #[arg(short, long)]
    server: Option<String>,

    /// Name this caster reports in its hello
    #[arg(short, long)]
    name: Option<String>,

    /// Monitor IDs to display (comma-separated)
    #[arg(long, value_delimiter = ',')]
    display: Vec<String>,

    /// Port for the local Stream Deck / web caster bridge
    #[arg(long)]
    bridge_port: Option<u16>,

    /// Skip starting the local control bridge
    #[arg(long)]
    no_bridge: bool,
}

fn init_logging(debug: bool) {
    let default_directive = if debug { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config: FileConfig = load_config(cli.config.as_deref())
        .extract()
        .context("invalid configuration")?;

    match cli.command {
        Commands::Director(args) => run_director(args, config).await,
        Commands::Caster(args) => run_caster(args, config).await,
    }
}

async fn run_director(args: DirectorArgs, config: FileConfig) -> Result<()> {
    let hub_config = HubConfig {
        server_name: args.name.unwrap_or(config.hub.server_name),
        ..HubConfig::default()
    };
    let hub = Hub::new(hub_config);

    let mut events = hub.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_hub_event(event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("hub event log lagged by {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if config.hub.seed_default_monitors && !args.no_default_monitors {
        hub.seed_default_monitors()
            .await
            .context("failed to seed default monitors")?;
    }

    let port = hub
        .start(args.port.unwrap_or(config.hub.port))
        .await
        .context("failed to start hub")?;
    info!(port, "director running; Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    hub.stop().await.context("failed to stop hub")?;
    Ok(())
}

async fn run_caster(args: CasterArgs, config: FileConfig) -> Result<()> {
    let session_config = SessionConfig {
        auto_reconnect: config.caster.auto_reconnect,
        ..SessionConfig::default()
    };
    let session = CasterSession::new(session_config);

    let mut events = session.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_caster_event(event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("caster event log lagged by {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let server_address = args
        .server
        .or(config.caster.server_address)
        .context("no hub address (use --server or [caster] server_address)")?;
    let client_name = args
        .name
        .or(config.caster.client_name)
        .or_else(|| std::env::var("USER").or_else(|_| std::env::var("USERNAME")).ok())
        .unwrap_or_else(|| "caster".to_string());
    let display = if args.display.is_empty() {
        config.caster.display_monitor_ids
    } else {
        args.display
    };

    session
        .connect(server_address, client_name, display)
        .await
        .context("failed to connect")?;

    let bridge = if args.no_bridge || !config.bridge.enabled {
        None
    } else {
        let port = args.bridge_port.unwrap_or(config.bridge.port);
        Some(
            BridgeServer::start(port, session.clone())
                .await
                .context("failed to start control bridge")?,
        )
    };
    info!("caster running; Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    if let Some(bridge) = bridge {
        bridge.stop().await;
    }
    session.disconnect().await;
    Ok(())
}

fn log_hub_event(event: HubEvent) {
    match event {
        HubEvent::ServerStarted { port } => info!(port, "server started"),
        HubEvent::ServerStopped => info!("server stopped"),
        HubEvent::ClientConnected { client } => {
            info!(
                client_id = %client.client_id,
                name = %client.name,
                monitors = ?client.display_monitor_ids,
                "caster connected"
            );
        }
        HubEvent::ClientDisconnected { client_id, reason } => {
            info!(client_id = %client_id, reason = %reason, "caster disconnected");
        }
        HubEvent::FeedbackReceived {
            client_id, payload, ..
        } => {
            info!(
                client_id = %client_id,
                from = %payload.client_name,
                feedback_type = ?payload.feedback_type,
                content = %payload.content,
                "feedback"
            );
        }
        HubEvent::MonitorAdded { monitor } => {
            info!(monitor_id = %monitor.id, name = %monitor.name, "monitor added");
        }
        HubEvent::MonitorRemoved { monitor_id } => info!(monitor_id = %monitor_id, "monitor removed"),
        HubEvent::MonitorUpdated { monitor } => {
            info!(monitor_id = %monitor.id, name = %monitor.name, "monitor updated");
        }
    }
}

fn log_caster_event(event: CasterEvent) {
    match event {
        CasterEvent::ConnectionEstablished { server_address } => {
            info!(server = %server_address, "connection established");
        }
        CasterEvent::ConnectionLost { reason } => info!(reason = %reason, "connection lost"),
        CasterEvent::ServerWelcomeReceived {
            server_name,
            assigned_client_id,
        } => {
            info!(server = %server_name, client_id = %assigned_client_id, "welcomed");
        }
        CasterEvent::KanpeMessageReceived {
            payload, displayed, ..
        } => {
            if displayed {
                info!(
                    priority = ?payload.priority,
                    targets = ?payload.target_monitor_ids,
                    "cue: {}",
                    payload.content
                );
            }
        }
        CasterEvent::FlashReceived { displayed, .. } => {
            if displayed {
                info!("flash");
            }
        }
        CasterEvent::ClearReceived { displayed, .. } => {
            if displayed {
                info!("clear");
            }
        }
        CasterEvent::MonitorListReceived { monitors } => {
            info!(count = monitors.len(), "monitor list synced");
        }
        CasterEvent::MonitorAdded { monitor } => {
            info!(monitor_id = %monitor.id, name = %monitor.name, "monitor added");
        }
        CasterEvent::MonitorRemoved { monitor_id } => {
            info!(monitor_id = %monitor_id, "monitor removed");
        }
        CasterEvent::MonitorUpdated { monitor } => {
            info!(monitor_id = %monitor.id, name = %monitor.name, "monitor updated");
        }
    }
}
