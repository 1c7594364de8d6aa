//! L1 provider with multi-RPC support and automatic failover

use super::L1Client;
use crate::config::L1Config;
use crate::error::{classify_rpc_error, TxMgrError, TxMgrResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// L1 configuration
    config: L1Config,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: L1Config) -> TxMgrResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(TxMgrError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }

    fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.config.network_timeout_ms)
    }

    /// Bound a single RPC call by the network timeout. A timeout or transport
    /// failure rotates to the next provider so the following call goes
    /// elsewhere.
    async fn call<T, E, F>(&self, operation: &str, fut: F) -> TxMgrResult<T>
    where
        E: std::fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        match timeout(self.network_timeout(), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                let err = classify_rpc_error(e.to_string());
                if matches!(err, TxMgrError::Rpc(_)) && self.http_providers.len() > 1 {
                    self.failover();
                }
                Err(err)
            }
            Err(_) => {
                self.failover();
                Err(TxMgrError::ChainConnection {
                    chain_id: self.config.chain_id,
                    message: format!("{} timed out", operation),
                })
            }
        }
    }
}

#[async_trait]
impl L1Client for ChainProvider {
    async fn block_number(&self) -> TxMgrResult<u64> {
        let block = self
            .call("eth_blockNumber", self.http().get_block_number())
            .await?;
        Ok(block.as_u64())
    }

    async fn nonce_at(&self, address: Address, block: Option<BlockId>) -> TxMgrResult<u64> {
        let nonce = self
            .call(
                "eth_getTransactionCount",
                self.http().get_transaction_count(address, block),
            )
            .await?;
        Ok(nonce.as_u64())
    }

    async fn estimate_gas(&self, msg: &TypedTransaction) -> TxMgrResult<U256> {
        self.call("eth_estimateGas", self.http().estimate_gas(msg, None))
            .await
            .map_err(|e| match e {
                TxMgrError::Rpc(msg) => TxMgrError::GasEstimation(msg),
                other => other,
            })
    }

    async fn send_transaction(&self, raw: Bytes) -> TxMgrResult<()> {
        let pending = self
            .call(
                "eth_sendRawTransaction",
                self.http().send_raw_transaction(raw),
            )
            .await?;
        debug!(
            "Chain {} accepted transaction {:?}",
            self.config.chain_id,
            pending.tx_hash()
        );
        Ok(())
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> TxMgrResult<Option<TransactionReceipt>> {
        self.call(
            "eth_getTransactionReceipt",
            self.http().get_transaction_receipt(tx_hash),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l1_config(rpc_urls: Vec<&str>) -> L1Config {
        L1Config {
            chain_id: 31337,
            rpc_urls: rpc_urls.into_iter().map(String::from).collect(),
            network_timeout_ms: 1_000,
        }
    }

    #[test]
    fn test_rejects_config_without_valid_urls() {
        let err = ChainProvider::new(l1_config(vec!["not a url"])).err().unwrap();
        assert!(matches!(err, TxMgrError::ChainConnection { chain_id: 31337, .. }));
    }

    #[test]
    fn test_failover_rotates_providers() {
        let provider =
            ChainProvider::new(l1_config(vec!["http://127.0.0.1:1", "http://127.0.0.1:2"])).unwrap();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 1);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
        assert_eq!(provider.chain_id(), 31337);
    }
}
