//! Drive the offline caching engine against a live origin.
//!
//! Cache contents persist between runs in a JSON snapshot, so an install in
//! one invocation serves fetches in the next.
//!
//! ## Usage
//!
//! ```bash
//! # Precache the manifest and activate the configured version
//! swctl --config sw.json install
//!
//! # Resolve a navigation through the engine
//! swctl --config sw.json fetch http://localhost:8080/reports --navigate
//!
//! # Simulate a push and a background sync
//! swctl push '{"title":"Laporan baru","url":"/reports/7"}'
//! swctl sync refresh-data
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use pwa_common::{init_logging, LogConfig, LogFormat, SwConfig};
use pwa_net::{HttpFetcher, LoaderConfig, Request};
use pwa_sw::{CacheStorage, EventOutcome, FetchDecision, HostCommand, OfflineWorker, SwEvent};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use url::Url;

#[derive(Parser)]
#[command(name = "swctl")]
#[command(about = "Drive the offline caching engine against a live origin")]
struct Cli {
    /// Engine configuration (JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cache snapshot read before and written after each command
    #[arg(short, long, default_value = "sw-state.json")]
    state: PathBuf,

    /// Log output format (pretty, compact, json)
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// Log filter directive, e.g. "pwa_sw=trace"
    #[arg(long)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Precache the manifest and activate the configured version
    Install,

    /// Resolve one GET request through the engine
    Fetch {
        /// Absolute URL to request
        url: Url,
        /// Treat the request as a top-level navigation
        #[arg(long)]
        navigate: bool,
    },

    /// Deliver a push message
    Push {
        /// JSON payload; omitted means an empty push
        payload: Option<String>,
    },

    /// Fire a background sync
    Sync {
        /// Sync tag
        #[arg(default_value = "refresh-data")]
        tag: String,
        /// Deliver as a periodic sync
        #[arg(long)]
        periodic: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::default().with_format(cli.log_format);
    if let Some(filter) = cli.log {
        log_config = log_config.with_filter(filter);
    }
    init_logging(log_config)?;

    let config = match &cli.config {
        Some(path) => SwConfig::from_file(path)?,
        None => SwConfig::default(),
    };
    let storage = Arc::new(load_storage(&cli.state).await?);
    let fetcher = Arc::new(HttpFetcher::new(
        LoaderConfig::default().with_timeout(Duration::from_secs(config.request_timeout_secs)),
    )?);

    let (worker, mut host_rx) = OfflineWorker::new(config, fetcher, Arc::clone(&storage))?;

    if !matches!(cli.command, Commands::Install) {
        if let Err(e) = worker.restore().await {
            warn!(error = %e, "No installed version, requests will pass through");
        }
    }

    match cli.command {
        Commands::Install => {
            worker.dispatch(SwEvent::Install).await?;
            if let EventOutcome::Activated(report) = worker.dispatch(SwEvent::Activate).await? {
                println!("Activated {}", report.tag);
                println!("  Deleted stores: {:?}", report.deleted);
                println!("  Claimed clients: {}", report.claimed);
            }
        }

        Commands::Fetch { url, navigate } => {
            let request = if navigate {
                Request::navigate(url)
            } else {
                Request::get(url)
            };
            match worker.dispatch(SwEvent::Fetch(request)).await? {
                EventOutcome::Fetch(FetchDecision::Respond(response)) => {
                    println!("Status:       {}", response.status());
                    println!("Content-Type: {}", response.content_type().unwrap_or("-"));
                    println!("Redirected:   {}", response.redirected());
                    println!("Body bytes:   {}", response.bytes().len());
                }
                EventOutcome::Fetch(FetchDecision::PassThrough(request)) => {
                    println!("Not intercepted: {}", request.url);
                }
                other => println!("{other:?}"),
            }
        }

        Commands::Push { payload } => {
            let data = payload.map(Bytes::from);
            if let EventOutcome::NotificationShown(notification) =
                worker.dispatch(SwEvent::Push { data }).await?
            {
                println!("{}", serde_json::to_string_pretty(&notification)?);
            }
        }

        Commands::Sync { tag, periodic } => {
            let event = if periodic {
                SwEvent::PeriodicSync { tag }
            } else {
                SwEvent::Sync { tag }
            };
            println!("{:?}", worker.dispatch(event).await?);
        }
    }

    worker.drain().await;
    print_host_commands(&mut host_rx);

    storage.save_snapshot(&cli.state).await?;
    info!(path = %cli.state.display(), "State saved");
    Ok(())
}

async fn load_storage(path: &Path) -> pwa_common::Result<CacheStorage> {
    if path.exists() {
        CacheStorage::load_snapshot(path).await
    } else {
        Ok(CacheStorage::new())
    }
}

fn print_host_commands(rx: &mut UnboundedReceiver<HostCommand>) {
    while let Ok(command) = rx.try_recv() {
        match command {
            HostCommand::ShowNotification(n) => println!("[host] show notification {:?}", n.title),
            HostCommand::CloseNotification { title, .. } => {
                println!("[host] close notification {title:?}")
            }
            HostCommand::Focus { client_id } => println!("[host] focus {client_id}"),
            HostCommand::OpenWindow { url, .. } => println!("[host] open window {url}"),
            HostCommand::PostMessage { client_id, message } => {
                println!("[host] post {} to {client_id}", message.kind)
            }
        }
    }
}
