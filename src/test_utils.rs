//! In-memory L1 backend shared by the unit tests

use crate::chain::L1Client;
use crate::error::{TxMgrError, TxMgrResult};

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockId, Bytes, TransactionReceipt, H256, U256, U64};
use ethers::utils::keccak256;
use ethers::utils::rlp::Rlp;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct MinedTx {
    fee: U256,
    block_number: u64,
}

#[derive(Debug, Default)]
struct ChainState {
    block_height: u64,
    mined: HashMap<H256, MinedTx>,
    nonce: u64,
    ghost_on_next_send: bool,
    estimate_failures: usize,
    sent_nonces: Vec<u64>,
}

/// Tracks mined transactions along with the fee they paid. The fee is
/// reported back through the receipt's `gas_used` so tests can tell which
/// attempt confirmed.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<ChainState>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mine a block, optionally including `tx_hash`
    pub fn mine(&self, tx_hash: Option<H256>, fee: U256) {
        let mut state = self.state.lock().unwrap();
        state.block_height += 1;
        if let Some(hash) = tx_hash {
            let block_number = state.block_height;
            state.mined.insert(hash, MinedTx { fee, block_number });
        }
    }

    /// Mine `tx_hash` after `delay`
    pub fn mine_after(self: &Arc<Self>, tx_hash: H256, fee: U256, delay: Duration) {
        let backend = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            backend.mine(Some(tx_hash), fee);
        });
    }

    /// Drop a mined transaction as a re-org would
    pub fn reorg_out(&self, tx_hash: H256) {
        self.state.lock().unwrap().mined.remove(&tx_hash);
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.state.lock().unwrap().nonce = nonce;
    }

    pub fn nonce(&self) -> u64 {
        self.state.lock().unwrap().nonce
    }

    /// Confirm a leftover transaction at the current nonce right before the
    /// next broadcast is processed
    pub fn confirm_ghost_on_next_send(&self) {
        self.state.lock().unwrap().ghost_on_next_send = true;
    }

    pub fn fail_next_estimates(&self, count: usize) {
        self.state.lock().unwrap().estimate_failures = count;
    }

    /// Nonces of every broadcast that reached the node
    pub fn sent_nonces(&self) -> Vec<u64> {
        self.state.lock().unwrap().sent_nonces.clone()
    }
}

#[async_trait]
impl L1Client for MockBackend {
    async fn block_number(&self) -> TxMgrResult<u64> {
        Ok(self.state.lock().unwrap().block_height)
    }

    async fn nonce_at(&self, _address: Address, _block: Option<BlockId>) -> TxMgrResult<u64> {
        Ok(self.state.lock().unwrap().nonce)
    }

    async fn estimate_gas(&self, _msg: &TypedTransaction) -> TxMgrResult<U256> {
        let mut state = self.state.lock().unwrap();
        if state.estimate_failures > 0 {
            state.estimate_failures -= 1;
            return Err(TxMgrError::GasEstimation("execution reverted".into()));
        }
        Ok(U256::from(21_000))
    }

    async fn send_transaction(&self, raw: Bytes) -> TxMgrResult<()> {
        let (tx, _sig) = TypedTransaction::decode_signed(&Rlp::new(&raw))
            .map_err(|e| TxMgrError::Rpc(e.to_string()))?;
        let nonce = tx.nonce().map(|n| n.as_u64()).unwrap_or_default();
        let fee = tx.gas_price().unwrap_or_default();

        let mut state = self.state.lock().unwrap();
        if state.ghost_on_next_send {
            state.ghost_on_next_send = false;
            state.nonce += 1;
            state.block_height += 1;
        }
        if nonce < state.nonce {
            return Err(TxMgrError::NonceTooLow("nonce too low".into()));
        }

        state.sent_nonces.push(nonce);
        state.nonce = nonce + 1;
        state.block_height += 1;
        let block_number = state.block_height;
        state
            .mined
            .insert(H256::from(keccak256(&raw)), MinedTx { fee, block_number });
        Ok(())
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> TxMgrResult<Option<TransactionReceipt>> {
        let state = self.state.lock().unwrap();
        Ok(state.mined.get(&tx_hash).map(|mined| TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(U64::from(mined.block_number)),
            gas_used: Some(mined.fee),
            status: Some(U64::from(1)),
            ..Default::default()
        }))
    }
}
