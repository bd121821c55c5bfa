use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::models::{ChatId, HistoryItem, TxEventType, TxRecord, TxStatus};

const DEFAULT_HISTORY_LIMIT: i64 = 10;

/// Durable record of transactions and of which chat saw which transaction.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn ensure_schema(&self) -> Result<()>;

    /// Inserts the transaction or refreshes it. Optional fields already stored are
    /// never replaced by an absent value.
    async fn upsert_tx(&self, tx: &TxRecord) -> Result<()>;

    /// Idempotent: a repeated (chat, hash, kind) triple is ignored.
    async fn add_chat_event(&self, chat_id: ChatId, tx_hash: &str, event_type: TxEventType) -> Result<()>;

    /// Most recent first. A non-positive `limit` falls back to 10.
    async fn list_history(&self, chat_id: ChatId, limit: i64) -> Result<Vec<HistoryItem>>;
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }
}

#[async_trait]
impl Repository for Database {
    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                hash TEXT PRIMARY KEY,
                chain_id TEXT NOT NULL,
                block_number INTEGER NULL,
                block_time TEXT NULL,
                from_addr TEXT NOT NULL,
                to_addr TEXT NULL,
                value_wei TEXT NOT NULL,
                nonce INTEGER NOT NULL,
                tx_type INTEGER NOT NULL,
                gas INTEGER NOT NULL,
                gas_price_wei TEXT NULL,
                status INTEGER NULL,
                first_seen_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_tx (
                chat_id INTEGER NOT NULL,
                tx_hash TEXT NOT NULL REFERENCES transactions(hash) ON DELETE CASCADE,
                event_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (chat_id, tx_hash, event_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chat_tx_chat_created ON chat_tx(chat_id, created_at DESC)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn upsert_tx(&self, tx: &TxRecord) -> Result<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO transactions
            (hash, chain_id, block_number, block_time, from_addr, to_addr, value_wei,
             nonce, tx_type, gas, gas_price_wei, status, first_seen_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(hash) DO UPDATE SET
                chain_id = excluded.chain_id,
                block_number = COALESCE(excluded.block_number, transactions.block_number),
                block_time = COALESCE(excluded.block_time, transactions.block_time),
                from_addr = excluded.from_addr,
                to_addr = COALESCE(excluded.to_addr, transactions.to_addr),
                value_wei = excluded.value_wei,
                nonce = excluded.nonce,
                tx_type = excluded.tx_type,
                gas = excluded.gas,
                gas_price_wei = COALESCE(excluded.gas_price_wei, transactions.gas_price_wei),
                status = COALESCE(excluded.status, transactions.status),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&tx.hash)
        .bind(&tx.chain_id)
        .bind(tx.block_number.and_then(|n| i64::try_from(n).ok()))
        .bind(tx.block_time)
        .bind(&tx.from_address)
        .bind(&tx.to_address)
        .bind(&tx.value_wei)
        .bind(tx.nonce)
        .bind(i64::from(tx.tx_type))
        .bind(tx.gas)
        .bind(&tx.gas_price_wei)
        .bind(tx.status.map(TxStatus::code))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn add_chat_event(&self, chat_id: ChatId, tx_hash: &str, event_type: TxEventType) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO chat_tx (chat_id, tx_hash, event_type, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(chat_id)
        .bind(tx_hash)
        .bind(event_type.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_history(&self, chat_id: ChatId, limit: i64) -> Result<Vec<HistoryItem>> {
        let limit = if limit <= 0 { DEFAULT_HISTORY_LIMIT } else { limit };

        let rows = sqlx::query(
            r#"
            SELECT c.created_at, c.event_type, t.hash, t.block_number, t.block_time,
                   t.from_addr, t.to_addr, t.value_wei, t.status
            FROM chat_tx c
            JOIN transactions t ON t.hash = c.tx_hash
            WHERE c.chat_id = ?
            ORDER BY c.created_at DESC, c.rowid DESC
            LIMIT ?
            "#,
        )
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let event_type: String = row.try_get("event_type")?;
            let event_type = TxEventType::parse(&event_type)
                .ok_or_else(|| anyhow::anyhow!("Unknown event type {:?}", event_type))?;

            items.push(HistoryItem {
                at: row.try_get::<DateTime<Utc>, _>("created_at")?,
                event_type,
                hash: row.try_get("hash")?,
                block_number: row
                    .try_get::<Option<i64>, _>("block_number")?
                    .and_then(|n| u64::try_from(n).ok()),
                block_time: row.try_get("block_time")?,
                from_address: row.try_get("from_addr")?,
                to_address: row.try_get("to_addr")?,
                value_wei: row.try_get("value_wei")?,
                status: row
                    .try_get::<Option<i64>, _>("status")?
                    .and_then(TxStatus::from_code),
            });
        }

        Ok(items)
    }
}
