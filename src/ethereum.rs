use anyhow::Result;
use async_trait::async_trait;
use ethers_core::types::{Block, BlockId, BlockNumber, Transaction, TransactionReceipt, TxHash, H256, U256, U64};
use ethers_providers::{Middleware, Provider, Ws};
use futures::stream::{BoxStream, StreamExt};
use log::info;
use std::sync::Arc;

/// Stream of new chain heads. Ends when the underlying subscription dies.
pub type HeaderStream<'a> = BoxStream<'a, Block<TxHash>>;

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn subscribe_new_heads<'a>(&'a self) -> Result<HeaderStream<'a>>;

    async fn block_with_txs(&self, hash: H256) -> Result<Option<Block<Transaction>>>;

    async fn chain_id(&self) -> Result<U256>;

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>>;

    async fn receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>>;

    /// Unix timestamp of the block at `number`, if the node knows it.
    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>>;
}

pub struct EthereumClient {
    provider: Arc<Provider<Ws>>,
}

impl EthereumClient {
    pub async fn new(ws_url: &str) -> Result<Self> {
        let provider = Provider::<Ws>::connect(ws_url).await?;
        info!("Connected to Ethereum node over WebSocket");

        Ok(Self {
            provider: Arc::new(provider),
        })
    }
}

#[async_trait]
impl ChainClient for EthereumClient {
    async fn subscribe_new_heads<'a>(&'a self) -> Result<HeaderStream<'a>> {
        let stream = self.provider.subscribe_blocks().await?;
        Ok(stream.boxed())
    }

    async fn block_with_txs(&self, hash: H256) -> Result<Option<Block<Transaction>>> {
        Ok(self.provider.get_block_with_txs(BlockId::Hash(hash)).await?)
    }

    async fn chain_id(&self) -> Result<U256> {
        Ok(self.provider.get_chainid().await?)
    }

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>> {
        Ok(self.provider.get_transaction(hash).await?)
    }

    async fn receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        Ok(self.provider.get_transaction_receipt(hash).await?)
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>> {
        let block = self
            .provider
            .get_block(BlockId::Number(BlockNumber::Number(U64::from(number))))
            .await?;

        Ok(block.map(|b| b.timestamp.low_u64()))
    }
}
