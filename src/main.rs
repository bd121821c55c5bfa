mod cli;
mod config;
mod database;
mod ethereum;
mod format;
mod models;
mod notifier;
mod parse;
mod search;
mod subscriptions;
mod watcher;

use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Commands};
use crate::config::{load_subscribers, seed_subscriptions, sync_subscriptions, Config};
use crate::database::{Database, Repository};
use crate::ethereum::{ChainClient, EthereumClient};
use crate::format::format_history;
use crate::notifier::run_delivery_loop;
use crate::search::search_transaction;
use crate::subscriptions::SubscriptionStore;
use crate::watcher::{Watcher, WatcherConfig};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let database = Arc::new(Database::new(&config.database_url).await?);

    match cli.command {
        Commands::Watch {
            workers,
            tasks_buffer,
            notify_buffer,
            subscribers,
        } => {
            let watcher_config = WatcherConfig {
                workers: workers.unwrap_or(config.watcher_workers),
                tasks_buffer: tasks_buffer.unwrap_or(config.tasks_buffer),
            };
            let notify_buffer = notify_buffer.unwrap_or(config.notify_buffer).max(1);
            let subscribers = subscribers.unwrap_or_else(|| config.subscribers_file.clone());

            run_watch(&config, database, watcher_config, notify_buffer, subscribers).await?;
        }
        Commands::Search { chat_id, hash } => {
            let client = EthereumClient::new(&config.eth_ws_url).await?;
            let chain_id = client.chain_id().await?;
            let summary = search_transaction(&client, database.as_ref(), chain_id, chat_id, &hash).await?;
            println!("{}", summary);
        }
        Commands::History { chat_id, limit, json } => {
            let items = database.list_history(chat_id, limit.unwrap_or(10)).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                print!("{}", format_history(&items));
            }
        }
    }

    Ok(())
}

async fn run_watch(
    config: &Config,
    database: Arc<Database>,
    watcher_config: WatcherConfig,
    notify_buffer: usize,
    subscribers: PathBuf,
) -> Result<()> {
    let client = Arc::new(EthereumClient::new(&config.eth_ws_url).await?);
    let chain_id = client.chain_id().await?;

    let subs = Arc::new(SubscriptionStore::new());
    let seeds = load_subscribers(&subscribers)?;
    let applied = seed_subscriptions(&subs, &seeds);
    info!("Loaded {} of {} subscribers from {}", applied, seeds.len(), subscribers.display());
    if subs.is_empty() {
        warn!("No subscribers configured, nothing will match until the subscriber file is reloaded");
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));
    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(Arc::clone(&subs), subscribers, cancel.clone()));

    let (notify_tx, notify_rx) = mpsc::channel(notify_buffer);
    let delivery = tokio::spawn(run_delivery_loop(notify_rx, std::io::stdout()));

    let watcher = Watcher::new(client, chain_id, subs, database, notify_tx, watcher_config);
    let result = watcher.start(cancel.clone()).await;

    // last notification sender goes away with the watcher; delivery then flushes what is queued and exits
    drop(watcher);
    delivery.await?;

    Ok(result?)
}

/// Re-reads the subscriber file on SIGHUP and makes the registry mirror it.
#[cfg(unix)]
async fn reload_on_hangup(subs: Arc<SubscriptionStore>, path: PathBuf, cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("Cannot listen for SIGHUP, subscriber reload disabled: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            received = hangup.recv() => {
                if received.is_none() {
                    return;
                }
            }
        }

        match load_subscribers(&path) {
            Ok(seeds) => {
                let applied = sync_subscriptions(&subs, &seeds);
                info!(
                    "Reloaded {} of {} subscribers from {}, {} active",
                    applied,
                    seeds.len(),
                    path.display(),
                    subs.len()
                );
            }
            Err(e) => error!("Failed to reload subscribers from {}: {}", path.display(), e),
        }
    }
}

async fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown signal received");
    cancel.cancel();
}
