//! Skiff - live-synchronized file browser over an object store.
//!
//! # Usage
//!
//! ```bash
//! # Serve an in-memory bucket on the default ports
//! skiff serve
//!
//! # Serve a directory, sharing changes through a notify service
//! skiff serve --storage-root /var/lib/skiff --notify http://notify:50051
//!
//! # Print version information
//! skiff version
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use skiff_core::config::{SkiffConfig, StorageBackend};
use skiff_core::shutdown;
use skiff_server::SkiffServer;
use std::path::PathBuf;
use std::process;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "skiff")]
#[command(about = "Skiff - live-synchronized object store browser", long_about = None)]
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
    /// Serve files and streaming sessions
    Serve {
        /// Public address to listen on
        #[arg(short, long)]
        bind: Option<String>,

        /// Serve this directory instead of an in-memory bucket
        #[arg(long)]
        storage_root: Option<PathBuf>,

        /// Base URL of the notify service
        #[arg(long)]
        notify: Option<String>,
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
            storage_root,
            notify,
        } => {
            let mut config = SkiffConfig::load_or_default(cli.config.as_deref())
                .await
                .context("Failed to load configuration")?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(root) = storage_root {
                config.storage.backend = StorageBackend::Fs;
                config.storage.root = Some(root);
            }
            if let Some(endpoint) = notify {
                config.notify.endpoint = Some(endpoint);
            }
            config.validate()?;

            init_logging(cli.verbose, &config.general.log_level, cli.log_format);

            let root = CancellationToken::new();
            shutdown::cancel_on_signal(root.clone());
            let server = SkiffServer::from_config(&config, root).await?;
            server.serve().await
        }
        Commands::Version => {
            println!("skiff {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: bool, log_level: &str, format: LogFormat) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose {
        EnvFilter::new("skiff=debug,skiff_server=debug,skiff_notify=debug,skiff_core=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "skiff={level},skiff_server={level},skiff_notify={level},skiff_core={level},warn",
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
