use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::prelude::*;

use workspace_sync::{ConnectionProvider, Connector, Scope, SyncController, SyncState, load_snapshot};

mod config;
mod links;
mod render;
mod rpc;

use crate::config::{FileConfig, GatewayConfig};
use crate::rpc::RpcConnector;

#[derive(Parser)]
#[command(name = "gateway-sync")]
#[command(about = "Live view of your remote workspaces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.gateway-sync)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Workspace host (overrides config)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the configured host and whether credentials are present
    Status,

    /// Fetch and print workspaces once
    List(ListArgs),

    /// Keep a live workspace table; press Enter to refresh, Ctrl-C to quit
    Watch,

    /// Print the dashboard link that creates a workspace for a context URL
    New(NewArgs),
}

#[derive(Parser)]
struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct NewArgs {
    /// Repository or branch URL to start from
    context_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    // A provider may already be installed by a dependency; either way one exists.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = GatewayConfig::new(cli.data_dir.clone())?;
    let file = config.load(cli.host.as_deref())?;
    debug!(host = %file.host, data_dir = ?config.data_dir, "configuration loaded");

    match cli.command {
        Commands::Status => status_command(&config, &file),
        Commands::List(args) => list_command(&config, &file, args.json).await,
        Commands::Watch => watch_command(&config, &file).await,
        Commands::New(args) => new_command(&file, &args.context_url),
    }
}

fn init_logging(debug: bool) {
    let default_directive = if debug {
        "gateway_sync=debug,workspace_sync=debug,info"
    } else {
        "gateway_sync=info,workspace_sync=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn connector_for(file: &FileConfig) -> RpcConnector {
    RpcConnector::new(
        file.token().map(String::from),
        file.transport.tls,
        file.request_timeout(),
    )
}

fn not_connected_hint(config: &GatewayConfig) -> String {
    format!(
        "no access token configured; set `token` in {:?} or GATEWAY_TOKEN",
        config.config_toml_path()
    )
}

fn status_command(config: &GatewayConfig, file: &FileConfig) -> Result<()> {
    let connector = connector_for(file);
    println!("Host:       {}", file.host);
    println!("Dashboard:  {}", links::dashboard_url(&file.host));
    if connector.is_connected(&file.host) {
        println!("Connected:  yes");
    } else {
        println!("Connected:  no ({})", not_connected_hint(config));
    }
    Ok(())
}

async fn list_command(config: &GatewayConfig, file: &FileConfig, json: bool) -> Result<()> {
    let options = file.sync_options();
    let provider = ConnectionProvider::new(connector_for(file));
    if !provider.is_connected(&options.host) {
        bail!(not_connected_hint(config));
    }

    let client = provider
        .obtain_client(&options.host)
        .await
        .with_context(|| format!("Failed to connect to {}", options.host))?;
    let sessions = load_snapshot(&*client, options.snapshot_limit)
        .await
        .context("Failed to fetch workspaces")?;

    if json {
        let rows = render::rows(&sessions, &options.host);
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print!("{}", render::render_table(&sessions));
    }
    Ok(())
}

async fn watch_command(config: &GatewayConfig, file: &FileConfig) -> Result<()> {
    let options = file.sync_options();
    let host = options.host.clone();
    let provider = Arc::new(ConnectionProvider::new(connector_for(file)));
    let (controller, mut tables) = SyncController::new(Scope::root(), provider, options)?;

    if !controller.is_connected() {
        eprintln!("{}", not_connected_hint(config));
    }
    let mut states = controller.subscribe_state();
    controller.refresh().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }

            Some(table) = tables.recv() => {
                print!("{}", render::render_table(table.iter()));
            }

            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                eprintln!("{}", render::state_line(state, &host));
                if state == SyncState::Disposed {
                    break;
                }
            }

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(_)) => controller.refresh().await,
                Ok(None) => {
                    debug!("stdin closed; refresh on Enter disabled");
                    stdin_open = false;
                }
                Err(e) => {
                    debug!(error = %e, "stdin read failed");
                    stdin_open = false;
                }
            },
        }
    }

    controller.dispose();
    Ok(())
}

fn new_command(file: &FileConfig, context_url: &str) -> Result<()> {
    match links::new_workspace_url(&file.host, context_url) {
        Some(url) => {
            println!("{url}");
            Ok(())
        }
        None => bail!("context URL is empty"),
    }
}
