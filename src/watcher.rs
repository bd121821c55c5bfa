use chrono::DateTime;
use ethers_core::types::{Address, SignatureError, Transaction, H256, U256};
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    database::Repository,
    ethereum::ChainClient,
    format::{format_address, format_tx_notification},
    models::{Notification, TxEventType, TxRecord, TxTask},
    subscriptions::SubscriptionStore,
};

const DEFAULT_WORKERS: usize = 8;
const DEFAULT_TASKS_BUFFER: usize = 1024;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("failed to subscribe to new heads: {0}")]
    Subscribe(#[source] anyhow::Error),

    #[error("new heads subscription closed")]
    SubscriptionClosed,
}

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("transaction signed for chain {got}, expected {expected}")]
    ChainIdMismatch { expected: U256, got: U256 },

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    pub workers: usize,
    pub tasks_buffer: usize,
}

impl WatcherConfig {
    /// Replaces zero values with the defaults.
    pub fn normalized(self) -> Self {
        Self {
            workers: if self.workers == 0 { DEFAULT_WORKERS } else { self.workers },
            tasks_buffer: if self.tasks_buffer == 0 { DEFAULT_TASKS_BUFFER } else { self.tasks_buffer },
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            tasks_buffer: DEFAULT_TASKS_BUFFER,
        }
    }
}

/// Recovers the signer of `tx`, rejecting transactions signed for another chain.
pub fn recover_sender(tx: &Transaction, chain_id: U256) -> Result<Address, SenderError> {
    let v = tx.v.as_u64();
    // EIP-155 replay protection encodes the chain id into v
    let signed_chain = tx
        .chain_id
        .or_else(|| (v >= 35).then(|| U256::from((v - 35) / 2)));

    if let Some(got) = signed_chain {
        if got != chain_id {
            return Err(SenderError::ChainIdMismatch { expected: chain_id, got });
        }
    }

    if signed_chain == tx.chain_id {
        return Ok(tx.recover_from()?);
    }
    let mut tx = tx.clone();
    tx.chain_id = signed_chain;
    Ok(tx.recover_from()?)
}

/// Narrows a transaction quantity to an SQLite INTEGER, saturating at `i64::MAX`.
pub fn db_integer(value: U256, field: &str, hash: H256) -> i64 {
    let fits = value.bits() <= 64;
    match i64::try_from(value.low_u64()) {
        Ok(n) if fits => n,
        _ => {
            warn!("Tx 0x{:x}: {} {} out of range, storing {}", hash, field, value, i64::MAX);
            i64::MAX
        }
    }
}

/// EIP-2718 type tag; legacy transactions without one are type 0.
pub fn tx_type_tag(tx: &Transaction) -> u8 {
    let Some(kind) = tx.transaction_type else {
        return 0;
    };
    u8::try_from(kind.as_u64()).unwrap_or_else(|_| {
        warn!("Tx 0x{:x}: type {} out of range, storing {}", tx.hash, kind, u8::MAX);
        u8::MAX
    })
}

fn tx_record(tx: &Transaction, chain_id: U256, from: Address, task: &TxTask) -> TxRecord {
    TxRecord {
        hash: format!("0x{:x}", tx.hash),
        chain_id: chain_id.to_string(),
        block_number: Some(task.block_number),
        block_time: i64::try_from(task.block_time)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        from_address: format_address(from),
        to_address: tx.to.map(format_address),
        value_wei: tx.value.to_string(),
        nonce: db_integer(tx.nonce, "nonce", tx.hash),
        tx_type: tx_type_tag(tx),
        gas: db_integer(tx.gas, "gas", tx.hash),
        gas_price_wei: tx.gas_price.map(|p| p.to_string()),
        status: None,
    }
}

/// Per-transaction work done by each pool worker.
pub struct TaskHandler<R: Repository + ?Sized> {
    chain_id: U256,
    subs: Arc<SubscriptionStore>,
    repo: Arc<R>,
    notify_tx: mpsc::Sender<Notification>,
    cancel: CancellationToken,
}

impl<R: Repository + ?Sized> TaskHandler<R> {
    pub fn new(
        chain_id: U256,
        subs: Arc<SubscriptionStore>,
        repo: Arc<R>,
        notify_tx: mpsc::Sender<Notification>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            chain_id,
            subs,
            repo,
            notify_tx,
            cancel,
        }
    }

    pub async fn handle_task(&self, task: TxTask) {
        let tx = &task.tx;

        let from = match recover_sender(tx, self.chain_id) {
            Ok(from) => from,
            Err(e) => {
                debug!("Skipping tx 0x{:x}: {}", tx.hash, e);
                return;
            }
        };

        let recipients = self.subs.match_tx(from, tx.to, tx.value);
        if recipients.is_empty() {
            return;
        }

        let record = tx_record(tx, self.chain_id, from, &task);
        if let Err(e) = self.repo.upsert_tx(&record).await {
            error!("Failed to upsert tx {}: {}", record.hash, e);
        }

        let text = format_tx_notification(tx.hash, from, tx.to, tx.value, task.block_number, task.block_time);

        for chat_id in recipients {
            if let Err(e) = self.repo.add_chat_event(chat_id, &record.hash, TxEventType::Notify).await {
                warn!("Failed to record notify event for chat {}: {}", chat_id, e);
            }

            let notification = Notification {
                chat_id,
                text: text.clone(),
            };
            tokio::select! {
                biased;

                sent = self.notify_tx.send(notification) => {
                    if sent.is_err() {
                        warn!("Notification sink closed, dropping remaining notifications for {}", record.hash);
                        return;
                    }
                }
                _ = self.cancel.cancelled() => return,
            }
        }
    }
}

/// Turns new chain heads into per-transaction tasks and runs them through a
/// fixed worker pool.
pub struct Watcher<C: ChainClient + ?Sized, R: Repository + ?Sized> {
    client: Arc<C>,
    chain_id: U256,
    subs: Arc<SubscriptionStore>,
    repo: Arc<R>,
    notify_tx: mpsc::Sender<Notification>,
    config: WatcherConfig,
}

impl<C, R> Watcher<C, R>
where
    C: ChainClient + ?Sized,
    R: Repository + ?Sized + 'static,
{
    pub fn new(
        client: Arc<C>,
        chain_id: U256,
        subs: Arc<SubscriptionStore>,
        repo: Arc<R>,
        notify_tx: mpsc::Sender<Notification>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            client,
            chain_id,
            subs,
            repo,
            notify_tx,
            config: config.normalized(),
        }
    }

    /// Runs until `cancel` fires (`Ok`) or the head subscription fails (`Err`).
    /// Either way the task queue is closed and drained before returning.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), WatchError> {
        let (tasks_tx, tasks_rx) = mpsc::channel(self.config.tasks_buffer);
        let mut workers = self.spawn_workers(tasks_rx, cancel.clone());
        info!(
            "Watcher started: chain_id={} workers={} tasks_buffer={}",
            self.chain_id, self.config.workers, self.config.tasks_buffer
        );

        let result = self.ingest(tasks_tx, &cancel).await;

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Watcher worker failed: {}", e);
            }
        }

        match &result {
            Ok(()) => info!("Watcher stopped"),
            Err(e) => error!("Watcher stopped: {}", e),
        }
        result
    }

    fn spawn_workers(&self, tasks: mpsc::Receiver<TxTask>, cancel: CancellationToken) -> JoinSet<()> {
        let tasks = Arc::new(Mutex::new(tasks));
        let handler = Arc::new(TaskHandler::new(
            self.chain_id,
            Arc::clone(&self.subs),
            Arc::clone(&self.repo),
            self.notify_tx.clone(),
            cancel,
        ));

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.workers {
            let tasks = Arc::clone(&tasks);
            let handler = Arc::clone(&handler);
            workers.spawn(async move {
                loop {
                    let next = tasks.lock().await.recv().await;
                    match next {
                        Some(task) => handler.handle_task(task).await,
                        None => break,
                    }
                }
                debug!("Worker {} drained", worker_id);
            });
        }
        workers
    }

    // Consumes `tasks`; dropping it on return closes the queue for the workers.
    async fn ingest(&self, tasks: mpsc::Sender<TxTask>, cancel: &CancellationToken) -> Result<(), WatchError> {
        let mut headers = self
            .client
            .subscribe_new_heads()
            .await
            .map_err(WatchError::Subscribe)?;

        loop {
            let header = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Cancellation requested, stopping block ingestion");
                    return Ok(());
                }
                next = headers.next() => match next {
                    Some(header) => header,
                    None => return Err(WatchError::SubscriptionClosed),
                },
            };

            let Some(hash) = header.hash else {
                continue;
            };

            let block = match self.client.block_with_txs(hash).await {
                Ok(Some(block)) => block,
                Ok(None) => {
                    warn!("Block 0x{:x} not found", hash);
                    continue;
                }
                Err(e) => {
                    error!("Failed to fetch block 0x{:x}: {}", hash, e);
                    continue;
                }
            };

            let block_number = block.number.map(|n| n.as_u64()).unwrap_or_default();
            let block_time = block.timestamp.low_u64();
            debug!("Block #{} with {} transactions", block_number, block.transactions.len());

            for tx in block.transactions {
                let task = TxTask {
                    tx,
                    block_number,
                    block_time,
                };
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        info!("Cancellation requested, stopping block ingestion");
                        return Ok(());
                    }
                    sent = tasks.send(task) => {
                        if sent.is_err() {
                            warn!("Task queue closed, stopping block ingestion");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
