//! Channel forwarder CLI - main entry point

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

use channel_forwarder::{commands, metrics, Config, MessageId};
use tracing::warn;

#[derive(Parser)]
#[command(name = "channel_forwarder")]
#[command(about = "Forward a Telegram channel to another chat, one message at a time", long_about = None)]
#[command(version)]
struct Cli {
    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and wait for operator commands (default)
    Run {
        /// Start forwarding immediately instead of waiting for `start-loop`
        #[arg(long, default_value_t = false)]
        autostart: bool,
    },

    /// Show the persisted cursor and where the next run would begin
    Progress {
        /// Overwrite the cursor (last forwarded message id)
        #[arg(long)]
        set: Option<MessageId>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("channel_forwarder=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let config = Config::from_env()?;

    match cli.command.unwrap_or(Commands::Run { autostart: false }) {
        Commands::Run { autostart } => commands::run::run(config, autostart).await?,
        Commands::Progress { set } => commands::progress::run(&config, set)?,
    }

    Ok(())
}
