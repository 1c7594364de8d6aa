//! Chain module - the L1 RPC surface consumed by the transaction manager
//!
//! This module provides:
//! - The [`L1Client`] capability trait used by the sender, watcher and reconciler
//! - An ethers-backed implementation with multi-RPC failover

pub mod provider;

pub use provider::ChainProvider;

use crate::error::TxMgrResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockId, Bytes, TransactionReceipt, H256, U256};

/// Minimal L1 node interface.
///
/// Cancellation is by drop: callers race these futures against a
/// [`Scope`](crate::scope::Scope) and discard the loser.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait L1Client: Send + Sync {
    /// Height of the current chain tip
    async fn block_number(&self) -> TxMgrResult<u64>;

    /// Account nonce at `block`; `None` selects the latest block
    async fn nonce_at(&self, address: Address, block: Option<BlockId>) -> TxMgrResult<u64>;

    /// Gas required to execute `msg`
    async fn estimate_gas(&self, msg: &TypedTransaction) -> TxMgrResult<U256>;

    /// Broadcast a signed, RLP-encoded transaction
    async fn send_transaction(&self, raw: Bytes) -> TxMgrResult<()>;

    /// Receipt for `tx_hash`. `Ok(None)` means the transaction is not mined yet.
    async fn transaction_receipt(&self, tx_hash: H256) -> TxMgrResult<Option<TransactionReceipt>>;
}
