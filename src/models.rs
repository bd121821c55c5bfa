use chrono::{DateTime, Utc};
use ethers_core::types::Transaction;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type ChatId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Failed,
    Success,
}

impl TxStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TxStatus::Failed),
            1 => Some(TxStatus::Success),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            TxStatus::Failed => 0,
            TxStatus::Success => 1,
        }
    }
}

/// A chain transaction as it is persisted. `hash` is the identity and never changes;
/// the optional fields stay `None` until the transaction is observed in a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
    pub hash: String,
    pub chain_id: String,
    pub block_number: Option<u64>,
    pub block_time: Option<DateTime<Utc>>,
    pub from_address: String,
    pub to_address: Option<String>,
    pub value_wei: String,
    pub nonce: i64,
    pub tx_type: u8,
    pub gas: i64,
    pub gas_price_wei: Option<String>,
    pub status: Option<TxStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxEventType {
    Search,
    Notify,
}

impl TxEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            TxEventType::Search => "search",
            TxEventType::Notify => "notify",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "search" => Some(TxEventType::Search),
            "notify" => Some(TxEventType::Notify),
            _ => None,
        }
    }
}

impl fmt::Display for TxEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An association event joined with the transaction it points at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryItem {
    pub at: DateTime<Utc>,
    pub event_type: TxEventType,
    pub hash: String,
    pub block_number: Option<u64>,
    pub block_time: Option<DateTime<Utc>>,
    pub from_address: String,
    pub to_address: Option<String>,
    pub value_wei: String,
    pub status: Option<TxStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub chat_id: ChatId,
    pub text: String,
}

/// One unit of work for the watcher pool.
#[derive(Debug, Clone)]
pub struct TxTask {
    pub tx: Transaction,
    pub block_number: u64,
    pub block_time: u64,
}
