use anyhow::{Context, Result};
use chat_session::{DurableState, FileStore, SessionManager, WsConnector};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;

mod config;
mod repl;

use crate::config::{ChatConfig, FileConfig};

#[derive(Parser)]
#[command(name = "chat")]
#[command(about = "Terminal client for a realtime support chat")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.chat_plugin)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Base WebSocket URL of the chat server (overrides server.ws_url)
    #[arg(long)]
    endpoint: Option<String>,

    /// Chat to resume (defaults to the stored one)
    #[arg(long)]
    chat_id: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Leave printed messages unread
    #[arg(long)]
    no_auto_read: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the stored chat id and registration flag
    State,

    /// Forget the stored chat id and registration
    Forget,

    /// Mark this user as registered
    Register,
}

#[derive(Serialize)]
struct StateReport {
    data_dir: PathBuf,
    chat_id: Option<String>,
    registered: bool,
}

fn init_logging(debug: bool) {
    let default_directive = if debug {
        "chat=debug,chat_session=debug,info"
    } else {
        "chat=info,chat_session=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = ChatConfig::new(cli.data_dir.clone())?;
    let store = FileStore::open(&config.state_path)
        .with_context(|| format!("Failed to open state file: {:?}", config.state_path))?;
    let durable = DurableState::new(Arc::new(store));

    match cli.command {
        Some(Commands::State) => state_command(&config, &durable, cli.json),
        Some(Commands::Forget) => {
            durable.clear_chat_id();
            durable.clear_registration();
            println!("Forgot stored chat and registration.");
            Ok(())
        }
        Some(Commands::Register) => {
            durable.set_registered(true);
            println!("Marked as registered.");
            Ok(())
        }
        None => chat_command(&config, durable, &cli).await,
    }
}

fn state_command(config: &ChatConfig, durable: &DurableState, json: bool) -> Result<()> {
    let report = StateReport {
        data_dir: config.data_dir.clone(),
        chat_id: durable.chat_id(),
        registered: durable.is_registered(),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("data dir:   {}", report.data_dir.display());
        println!("chat id:    {}", report.chat_id.as_deref().unwrap_or("-"));
        println!("registered: {}", report.registered);
    }
    Ok(())
}

async fn chat_command(config: &ChatConfig, durable: DurableState, cli: &Cli) -> Result<()> {
    let file_config: FileConfig = config::load_config(&config.data_dir)
        .extract()
        .with_context(|| format!("Invalid configuration in {:?}", config.config_toml_path()))?;
    let session_config = config::session_config_from_file(&file_config, cli.endpoint.as_deref())?;

    info!("Connecting to {}", session_config.endpoint);
    let manager = SessionManager::new(session_config, WsConnector::new(), durable);

    repl::run(
        manager,
        repl::ReplOptions {
            json: cli.json,
            auto_read: !cli.no_auto_read,
            chat_id: cli.chat_id.clone(),
        },
    )
    .await
}
