use crate::error::ChainError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::{
    prelude::*,
    providers::{Http, Provider, Ws},
    types::{Block, Filter, Log, Transaction, TransactionReceipt},
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Read-only view of an EVM chain. Shared by the observer and the verifier.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ChainError>;

    async fn block_number(&self) -> Result<u64, ChainError>;

    async fn block_with_transactions(
        &self,
        number: u64,
    ) -> Result<Option<Block<Transaction>>, ChainError>;

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError>;

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, ChainError>;

    async fn receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError>;
}

/// `ChainReader` over any ethers middleware, with an optional fallback
/// endpoint and a hard per-call timeout.
pub struct EvmChain<M> {
    primary: Arc<M>,
    fallback: Option<Arc<M>>,
    timeout: Duration,
}

impl<M: Middleware + 'static> EvmChain<M> {
    pub fn new(primary: M, fallback: Option<M>, timeout: Duration) -> Self {
        Self {
            primary: Arc::new(primary),
            fallback: fallback.map(Arc::new),
            timeout,
        }
    }

    async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, ChainError>
    where
        F: Fn(Arc<M>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, M::Error>> + Send,
        T: Send,
    {
        match self.call_once(op, &self.primary, &f).await {
            Ok(value) => Ok(value),
            Err(e) => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!(op, error = %e, "Primary RPC failed, trying fallback");
                    self.call_once(op, fallback, &f).await
                }
                None => Err(e),
            },
        }
    }

    async fn call_once<T, F, Fut>(
        &self,
        op: &'static str,
        provider: &Arc<M>,
        f: &F,
    ) -> Result<T, ChainError>
    where
        F: Fn(Arc<M>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, M::Error>> + Send,
        T: Send,
    {
        match tokio::time::timeout(self.timeout, f(provider.clone())).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ChainError::Rpc(format!("{}: {}", op, e))),
            Err(_) => Err(ChainError::Timeout(op, self.timeout)),
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainReader for EvmChain<M> {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.call("eth_chainId", |p| async move { p.get_chainid().await })
            .await
            .map(|id| id.as_u64())
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.call("eth_blockNumber", |p| async move { p.get_block_number().await })
            .await
            .map(|n| n.as_u64())
    }

    async fn block_with_transactions(
        &self,
        number: u64,
    ) -> Result<Option<Block<Transaction>>, ChainError> {
        self.call("eth_getBlockByNumber", move |p| async move {
            p.get_block_with_txs(number).await
        })
        .await
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError> {
        self.call("eth_getLogs", |p| {
            let filter = filter.clone();
            async move { p.get_logs(&filter).await }
        })
        .await
    }

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, ChainError> {
        self.call("eth_getTransactionByHash", move |p| async move {
            p.get_transaction(hash).await
        })
        .await
    }

    async fn receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError> {
        self.call("eth_getTransactionReceipt", move |p| async move {
            p.get_transaction_receipt(hash).await
        })
        .await
    }
}

/// Connects to the configured endpoint, picking the transport by URL scheme.
pub async fn connect(
    rpc_url: &str,
    fallback_url: Option<&str>,
    timeout: Duration,
) -> Result<Arc<dyn ChainReader>> {
    if rpc_url.starts_with("ws") {
        let primary = Provider::<Ws>::connect(rpc_url)
            .await
            .with_context(|| format!("Failed to connect to {}", rpc_url))?;
        let fallback = match fallback_url {
            Some(url) => Some(
                Provider::<Ws>::connect(url)
                    .await
                    .with_context(|| format!("Failed to connect to {}", url))?,
            ),
            None => None,
        };
        tracing::info!("EVM RPC connected over WebSocket");
        Ok(Arc::new(EvmChain::new(primary, fallback, timeout)))
    } else {
        let primary = Provider::<Http>::try_from(rpc_url)
            .with_context(|| format!("Invalid RPC URL {}", rpc_url))?;
        let fallback = fallback_url
            .map(|url| Provider::<Http>::try_from(url))
            .transpose()
            .context("Invalid fallback RPC URL")?;
        tracing::info!("EVM RPC configured over HTTP");
        Ok(Arc::new(EvmChain::new(primary, fallback, timeout)))
    }
}
