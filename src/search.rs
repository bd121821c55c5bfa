use anyhow::{anyhow, Result};
use chrono::DateTime;
use ethers_core::types::{TransactionReceipt, U256};
use log::{error, warn};

use crate::{
    database::Repository,
    ethereum::ChainClient,
    format::{format_address, format_unix_time, wei_to_eth_string, CONTRACT_CREATION},
    models::{ChatId, TxEventType, TxRecord, TxStatus},
    parse::parse_tx_hash,
    watcher::{db_integer, recover_sender, tx_type_tag},
};

/// Looks up a transaction on behalf of `chat_id`, records it together with a
/// `search` event and returns a human-readable summary.
pub async fn search_transaction<C, R>(
    chain: &C,
    repo: &R,
    chain_id: U256,
    chat_id: ChatId,
    hash: &str,
) -> Result<String>
where
    C: ChainClient + ?Sized,
    R: Repository + ?Sized,
{
    let hash = parse_tx_hash(hash)?;
    let tx = chain
        .transaction(hash)
        .await?
        .ok_or_else(|| anyhow!("Transaction 0x{:x} not found", hash))?;

    let from = recover_sender(&tx, chain_id).unwrap_or_else(|e| {
        warn!("Falling back to node-reported sender for 0x{:x}: {}", hash, e);
        tx.from
    });
    let pending = tx.block_number.is_none();

    let (receipt, block_time) = if pending {
        (None, None)
    } else {
        let receipt = match chain.receipt(hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!("Failed to fetch receipt for 0x{:x}: {}", hash, e);
                None
            }
        };
        let mined_in = receipt.as_ref().and_then(|r| r.block_number).or(tx.block_number);
        let block_time = match mined_in {
            Some(number) => chain.block_timestamp(number.as_u64()).await.unwrap_or_else(|e| {
                warn!("Failed to fetch block #{}: {}", number, e);
                None
            }),
            None => None,
        };
        (receipt, block_time)
    };

    let record = TxRecord {
        hash: format!("0x{:x}", tx.hash),
        chain_id: chain_id.to_string(),
        block_number: receipt
            .as_ref()
            .and_then(|r| r.block_number)
            .or(tx.block_number)
            .map(|n| n.as_u64()),
        block_time: block_time
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        from_address: format_address(from),
        to_address: tx.to.map(format_address),
        value_wei: tx.value.to_string(),
        nonce: db_integer(tx.nonce, "nonce", tx.hash),
        tx_type: tx_type_tag(&tx),
        gas: db_integer(tx.gas, "gas", tx.hash),
        gas_price_wei: tx.gas_price.map(|p| p.to_string()),
        status: receipt.as_ref().and_then(receipt_status),
    };

    if let Err(e) = repo.upsert_tx(&record).await {
        error!("Failed to upsert searched tx {}: {}", record.hash, e);
    }
    if let Err(e) = repo.add_chat_event(chat_id, &record.hash, TxEventType::Search).await {
        warn!("Failed to record search event for chat {}: {}", chat_id, e);
    }

    let mut msg = format!(
        "✅ Transaction found\n\nHash: {}\nFrom: {}\nTo: {}\nValue: {} ETH\nNonce: {}\nType: {}\nPending: {}\nGas: {}",
        record.hash,
        record.from_address,
        record.to_address.as_deref().unwrap_or(CONTRACT_CREATION),
        wei_to_eth_string(tx.value),
        record.nonce,
        record.tx_type,
        pending,
        record.gas,
    );

    if let Some(receipt) = &receipt {
        let status = match record.status {
            Some(TxStatus::Success) => "SUCCESS",
            Some(TxStatus::Failed) => "FAILED",
            None => "UNKNOWN",
        };
        let block = record
            .block_number
            .map(|n| n.to_string())
            .unwrap_or_default();
        msg.push_str(&format!(
            "\nStatus: {}\nBlock: #{}\nTime: {}\nGasUsed: {}",
            status,
            block,
            block_time.map(format_unix_time).unwrap_or_default(),
            receipt.gas_used.unwrap_or_default(),
        ));
    }

    Ok(msg)
}

fn receipt_status(receipt: &TransactionReceipt) -> Option<TxStatus> {
    receipt
        .status
        .and_then(|s| i64::try_from(s.as_u64()).ok())
        .and_then(TxStatus::from_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::ethereum::HeaderStream;
    use async_trait::async_trait;
    use ethers_core::types::{Address, Block, Transaction, H256, U64};

    struct OneTxChain {
        tx: Transaction,
        receipt: Option<TransactionReceipt>,
    }

    #[async_trait]
    impl ChainClient for OneTxChain {
        async fn subscribe_new_heads<'a>(&'a self) -> anyhow::Result<HeaderStream<'a>> {
            anyhow::bail!("not used")
        }

        async fn block_with_txs(&self, _hash: H256) -> anyhow::Result<Option<Block<Transaction>>> {
            Ok(None)
        }

        async fn chain_id(&self) -> anyhow::Result<U256> {
            Ok(U256::one())
        }

        async fn transaction(&self, hash: H256) -> anyhow::Result<Option<Transaction>> {
            Ok((hash == self.tx.hash).then(|| self.tx.clone()))
        }

        async fn receipt(&self, _hash: H256) -> anyhow::Result<Option<TransactionReceipt>> {
            Ok(self.receipt.clone())
        }

        async fn block_timestamp(&self, _number: u64) -> anyhow::Result<Option<u64>> {
            Ok(Some(1_700_000_000))
        }
    }

    fn node_tx(block_number: Option<u64>) -> Transaction {
        // unsigned: sender recovery fails and the node-reported `from` is used
        Transaction {
            hash: H256::repeat_byte(0x42),
            from: Address::repeat_byte(0xaa),
            to: Some(Address::repeat_byte(0xbb)),
            value: U256::exp10(18),
            block_number: block_number.map(U64::from),
            ..Default::default()
        }
    }

    fn hash_str() -> String {
        format!("0x{}", "42".repeat(32))
    }

    #[tokio::test]
    async fn mined_transaction_is_recorded_with_status() {
        let chain = OneTxChain {
            tx: node_tx(Some(500)),
            receipt: Some(TransactionReceipt {
                block_number: Some(U64::from(500)),
                status: Some(U64::from(1)),
                gas_used: Some(U256::from(21_000)),
                ..Default::default()
            }),
        };
        let db = Database::in_memory().await.unwrap();

        let msg = search_transaction(&chain, &db, U256::one(), 3, &hash_str()).await.unwrap();
        assert!(msg.contains("Pending: false"));
        assert!(msg.contains("Status: SUCCESS"));
        assert!(msg.contains("Block: #500"));
        assert!(msg.contains("Time: 2023-11-14T22:13:20Z"));
        assert!(msg.contains("Value: 1.000000 ETH"));

        let history = db.list_history(3, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type, TxEventType::Search);
        assert_eq!(history[0].status, Some(TxStatus::Success));
        assert_eq!(history[0].block_number, Some(500));
        assert_eq!(history[0].from_address, format_address(Address::repeat_byte(0xaa)));
    }

    #[tokio::test]
    async fn pending_transaction_has_no_block_details() {
        let chain = OneTxChain {
            tx: node_tx(None),
            receipt: None,
        };
        let db = Database::in_memory().await.unwrap();

        let msg = search_transaction(&chain, &db, U256::one(), 3, &hash_str()).await.unwrap();
        assert!(msg.contains("Pending: true"));
        assert!(!msg.contains("Status:"));

        let history = db.list_history(3, 10).await.unwrap();
        assert_eq!(history[0].block_number, None);
        assert_eq!(history[0].status, None);
    }

    #[tokio::test]
    async fn block_time_comes_from_transaction_when_receipt_is_missing() {
        let chain = OneTxChain {
            tx: node_tx(Some(500)),
            receipt: None,
        };
        let db = Database::in_memory().await.unwrap();

        let msg = search_transaction(&chain, &db, U256::one(), 3, &hash_str()).await.unwrap();
        assert!(msg.contains("Pending: false"));

        let history = db.list_history(3, 10).await.unwrap();
        assert_eq!(history[0].block_number, Some(500));
        assert_eq!(
            history[0].block_time,
            DateTime::from_timestamp(1_700_000_000, 0)
        );
        assert_eq!(history[0].status, None);
    }

    #[tokio::test]
    async fn rejects_malformed_or_unknown_hashes() {
        let chain = OneTxChain {
            tx: node_tx(None),
            receipt: None,
        };
        let db = Database::in_memory().await.unwrap();

        assert!(search_transaction(&chain, &db, U256::one(), 3, "0x1234").await.is_err());
        let unknown = format!("0x{}", "43".repeat(32));
        assert!(search_transaction(&chain, &db, U256::one(), 3, &unknown).await.is_err());
        assert!(db.list_history(3, 10).await.unwrap().is_empty());
    }
}
