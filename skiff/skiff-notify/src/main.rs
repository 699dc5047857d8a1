//! skiff-notify - shared change broker for Skiff servers.
//!
//! # Usage
//!
//! ```bash
//! # Serve the bridge and the storage webhook
//! skiff-notify serve --bind 0.0.0.0:50051 --webhook-token-file /run/secrets/webhook
//!
//! # Print version information
//! skiff-notify version
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use skiff_core::config::SkiffConfig;
use skiff_core::shutdown;
use skiff_notify::NotifyServer;
use std::path::PathBuf;
use std::process;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "skiff-notify")]
#[command(about = "Skiff notify service - shared change broker", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SKIFF_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the broker bridge
    Serve {
        /// Address to listen on
        #[arg(short, long)]
        bind: Option<String>,

        /// File holding the bearer token expected by the storage webhook
        #[arg(long)]
        webhook_token_file: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            bind,
            webhook_token_file,
        } => {
            let mut config = SkiffConfig::load_or_default(cli.config.as_deref())
                .await
                .context("Failed to load configuration")?;
            if let Some(bind) = bind {
                config.notify.bind = bind;
            }
            if let Some(path) = webhook_token_file {
                config.notify.webhook_token_file = Some(path);
            }

            init_logging(cli.verbose, &config.general.log_level, cli.log_format);

            let server = NotifyServer::from_config(&config).await?;
            let root = CancellationToken::new();
            shutdown::cancel_on_signal(root.clone());
            server.serve(root).await
        }
        Commands::Version => {
            println!("skiff-notify {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: bool, log_level: &str, format: LogFormat) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose {
        EnvFilter::new("skiff_notify=debug,skiff_core=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "skiff_notify={level},skiff_core={level},warn",
                level = log_level
            ))
        })
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}
