use std::{fs, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use inspectr_detail::{
    config::{self, DetailConfig},
    operation::OperationSummary,
    signal::{Signal, SignalBus},
    stream::StreamUpdate,
    DetailStore, FetchOptions, HttpClient,
};
use tokio::{
    sync::broadcast::{error::RecvError, Receiver},
    task::JoinHandle,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Fetch an operation from Inspectr and replay stream updates against it.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[clap(long = "config")]
    config_path: Option<PathBuf>,
    #[clap(long = "base-url")]
    base_url: Option<String>,
    /// JSON-lines file of stream updates to apply after the initial fetch.
    #[clap(long = "updates")]
    updates_path: Option<PathBuf>,
    /// Print a one-line summary instead of the full record.
    #[clap(long)]
    summary: bool,
    operation_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config_path {
        Some(path) => {
            let src = fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            config::parse_config(&src)
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => DetailConfig::default(),
    };
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }

    let bus = SignalBus::new(config.bus_capacity);
    let notifications = log_notifications(bus.subscribe());
    let client = Arc::new(HttpClient::new(&config.base_url, config.request_timeout)?);
    let store = DetailStore::with_options(
        client,
        bus.clone(),
        config.cache_capacity,
        config.terminal_policy.clone(),
    );

    let fetched = store
        .fetch_detail(&args.operation_id, FetchOptions::default())
        .await;
    if let Err(err) = fetched {
        drop(store);
        close_notifications(bus, notifications).await?;
        return Err(err.into());
    }

    if let Some(path) = &args.updates_path {
        let src = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        for (index, line) in src.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let update: StreamUpdate = serde_json::from_str(line)
                .with_context(|| format!("{}:{}", path.display(), index + 1))?;
            let outcome = store.handle_stream_update(&update).await;
            info!(event_type = %update.event_type, ?outcome, "applied stream update");
        }
    }

    let detail = store
        .snapshot()
        .detail
        .context("no operation detail loaded")?;
    if args.summary {
        println!("{}", OperationSummary::from_record(&detail));
    } else {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    }

    drop(store);
    close_notifications(bus, notifications).await?;
    Ok(())
}

/// Closes the bus and waits until every pending notification is logged.
/// The store must already be dropped, since it holds a sender.
async fn close_notifications(
    bus: SignalBus,
    notifications: JoinHandle<usize>,
) -> anyhow::Result<usize> {
    drop(bus);
    Ok(notifications.await?)
}

fn log_notifications(mut signals: Receiver<Signal>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut logged = 0;
        loop {
            match signals.recv().await {
                Ok(Signal::Notify(notification)) => {
                    warn!(
                        sub_message = notification.sub_message.as_deref().unwrap_or_default(),
                        "{}",
                        notification.message
                    );
                    logged += 1;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
        logged
    })
}
