//! Cadence CLI entry point — runs the follow-up engine and its gateway.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cadence_channels::WhatsAppMessenger;
use cadence_core::CadenceConfig;
use cadence_engine::{FollowupEngine, spawn_engine};
use cadence_gateway::AppState;
use cadence_store::FollowupStore;

#[derive(Parser)]
#[command(name = "cadence", version, about = "Follow-up automation engine for WhatsApp agents")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config.toml (defaults to ~/.cadence/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine loop and the HTTP gateway (default)
    Serve,
    /// Write a default config.toml to ~/.cadence/
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CadenceConfig::load_from(path)?,
        None => CadenceConfig::load()?,
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Init => {
            CadenceConfig::default().save()?;
            println!("Wrote {}", CadenceConfig::default_path().display());
        }
        Command::Serve => serve(config).await?,
    }
    Ok(())
}

async fn serve(config: CadenceConfig) -> anyhow::Result<()> {
    let store = Arc::new(FollowupStore::open(Path::new(&config.database.path))?);

    let messenger = Arc::new(WhatsAppMessenger::new(config.whatsapp.clone())?);
    if let Err(e) = messenger.connect().await {
        // Credentials may still be propagating in Meta Business Suite;
        // sends will surface failures in the operator log either way.
        tracing::warn!("⚠️ WhatsApp verification failed: {e}");
    }

    let engine = Arc::new(FollowupEngine::new(
        store.clone(),
        store,
        messenger,
        &config.engine,
    ));

    tokio::spawn(spawn_engine(engine.clone(), config.engine.tick_interval_secs));

    cadence_gateway::serve(
        AppState {
            engine,
            webhook_verify_token: config.whatsapp.webhook_verify_token.clone(),
            start_time: std::time::Instant::now(),
        },
        &config.gateway.host,
        config.gateway.port,
    )
    .await?;
    Ok(())
}
