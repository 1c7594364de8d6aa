//! Pending-mempool reconciler
//!
//! After a crash the wallet may have signed transactions floating in L1
//! mempools with no owner. Publishing a no-op self-transfer at the next unused
//! nonce, through the normal fee-escalation loop, forces them out:
//! - the no-op confirms: the mempool is drained up to that nonce
//! - the node answers "nonce too low": an older transaction at that nonce has
//!   confirmed in the meantime, so the caller must run the reconciler again
//!   against the new nonce ([`TxMgrError::RetryClear`])

use super::fee::FeeBid;
use super::sender::TransactionSender;
use crate::chain::L1Client;
use crate::error::{TxMgrError, TxMgrResult};
use crate::scope::Scope;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, TransactionReceipt, TransactionRequest, H256, U256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Pause between clearing runs so a node serving a stale nonce is not hammered
pub const CLEAR_RETRY_DELAY: Duration = Duration::from_secs(1);

/// A signed clearing transaction ready for broadcast
#[derive(Debug, Clone)]
pub struct ClearingTx {
    pub tx_hash: H256,
    pub raw: Bytes,
}

/// Sign a zero-value, empty-calldata self-transfer at `nonce` paying `gas_price`.
///
/// The gas limit comes from estimating the same call against the node; an
/// estimation failure fails the whole step.
pub async fn craft_clearing_tx(
    scope: &Scope,
    client: &dyn L1Client,
    wallet: &LocalWallet,
    chain_id: u64,
    nonce: u64,
    gas_price: FeeBid,
) -> TxMgrResult<ClearingTx> {
    let address = wallet.address();

    let call: TypedTransaction = TransactionRequest::new()
        .from(address)
        .to(address)
        .gas_price(gas_price)
        .into();
    let gas_limit = scope.run(client.estimate_gas(&call)).await??;

    let tx: TypedTransaction = TransactionRequest::new()
        .from(address)
        .to(address)
        .value(U256::zero())
        .nonce(nonce)
        .gas(gas_limit)
        .gas_price(gas_price)
        .chain_id(chain_id)
        .into();

    let wallet = wallet.clone().with_chain_id(chain_id);
    let signature = wallet
        .sign_transaction(&tx)
        .await
        .map_err(|e| TxMgrError::Wallet(e.to_string()))?;

    Ok(ClearingTx {
        tx_hash: tx.hash(&signature),
        raw: tx.rlp_signed(&signature),
    })
}

/// Publish a clearing transaction at the wallet's next unused nonce.
///
/// Returns the clearing receipt once it confirms, [`TxMgrError::RetryClear`]
/// if a previously published transaction at that nonce confirmed first, or
/// whatever error the sender surfaced.
pub async fn clear_pending(
    scope: &Scope,
    sender: &TransactionSender,
    wallet: &LocalWallet,
    chain_id: u64,
) -> TxMgrResult<TransactionReceipt> {
    let name = sender.config().name.clone();
    let client = sender.client().clone();
    let address = wallet.address();

    let nonce = scope.run(client.nonce_at(address, None)).await??;
    info!("{}: clearing pending transactions at nonce {}", name, nonce);

    let clear_scope = scope.child();
    let nonce_too_low = Arc::new(AtomicBool::new(false));

    let send_fn = {
        let client = client.clone();
        let wallet = wallet.clone();
        let clear_scope = clear_scope.clone();
        let nonce_too_low = nonce_too_low.clone();
        let name = name.clone();

        move |attempt_scope: Scope, gas_price: FeeBid| {
            let client = client.clone();
            let wallet = wallet.clone();
            let clear_scope = clear_scope.clone();
            let nonce_too_low = nonce_too_low.clone();
            let name = name.clone();

            async move {
                let tx = craft_clearing_tx(
                    &attempt_scope,
                    client.as_ref(),
                    &wallet,
                    chain_id,
                    nonce,
                    gas_price,
                )
                .await?;

                match attempt_scope.run(client.send_transaction(tx.raw)).await? {
                    Ok(()) => Ok(tx.tx_hash),
                    Err(e) if e.is_nonce_too_low() => {
                        info!(
                            "{}: transaction at nonce {} already confirmed, retrying clear",
                            name, nonce
                        );
                        nonce_too_low.store(true, Ordering::SeqCst);
                        clear_scope.cancel();
                        Err(TxMgrError::Canceled)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    };

    match sender.send(&clear_scope, send_fn).await {
        Ok(receipt) => {
            info!(
                "{}: cleared pending transactions with {:?}",
                name, receipt.transaction_hash
            );
            Ok(receipt)
        }
        Err(TxMgrError::Canceled) if nonce_too_low.load(Ordering::SeqCst) => {
            crate::metrics::record_clear_retry(&name);
            Err(TxMgrError::RetryClear)
        }
        Err(e) => {
            warn!("{}: unable to clear pending transactions: {}", name, e);
            Err(e)
        }
    }
}

/// Run [`clear_pending`] until it proves the mempool is clean
pub async fn clear_pending_until_clean(
    scope: &Scope,
    sender: &TransactionSender,
    wallet: &LocalWallet,
    chain_id: u64,
) -> TxMgrResult<TransactionReceipt> {
    loop {
        match clear_pending(scope, sender, wallet, chain_id).await {
            Err(TxMgrError::RetryClear) => {
                scope.run(tokio::time::sleep(CLEAR_RETRY_DELAY)).await?;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockBackend;
    use crate::tx::SenderConfig;

    const CHAIN_ID: u64 = 31337;
    // anvil's first dev account
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn harness() -> (TransactionSender, Arc<MockBackend>, LocalWallet) {
        let backend = MockBackend::new();
        let config = SenderConfig {
            name: "TEST".to_string(),
            min_fee: U256::from(5),
            max_fee: U256::from(50),
            fee_step: U256::from(5),
            resubmit_interval: Duration::from_secs(1),
            receipt_poll_interval: Duration::from_millis(50),
            num_confirmations: 1,
        };
        let sender = TransactionSender::new(config, backend.clone());
        let wallet: LocalWallet = DEV_KEY.parse().unwrap();
        (sender, backend, wallet)
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_pending_confirms_noop() {
        let (sender, backend, wallet) = harness();
        backend.set_nonce(7);

        let receipt = clear_pending(&Scope::new(), &sender, &wallet, CHAIN_ID)
            .await
            .unwrap();

        assert_eq!(receipt.gas_used, Some(U256::from(5)));
        assert_eq!(backend.sent_nonces(), vec![7]);
        assert_eq!(backend.nonce(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_pending_retries_when_ghost_confirms() {
        let (sender, backend, wallet) = harness();
        backend.set_nonce(3);
        backend.confirm_ghost_on_next_send();

        let res = clear_pending(&Scope::new(), &sender, &wallet, CHAIN_ID).await;
        assert!(matches!(res, Err(TxMgrError::RetryClear)));
        assert!(backend.sent_nonces().is_empty());

        // the driver re-queries and clears the next nonce
        let receipt = clear_pending(&Scope::new(), &sender, &wallet, CHAIN_ID)
            .await
            .unwrap();
        assert!(receipt.block_number.is_some());
        assert_eq!(backend.sent_nonces(), vec![4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_pending_is_idempotent_on_clean_mempool() {
        let (sender, backend, wallet) = harness();

        let first = clear_pending(&Scope::new(), &sender, &wallet, CHAIN_ID)
            .await
            .unwrap();
        let second = clear_pending(&Scope::new(), &sender, &wallet, CHAIN_ID)
            .await
            .unwrap();

        assert_ne!(first.transaction_hash, second.transaction_hash);
        assert_eq!(backend.sent_nonces(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_pending_until_clean_loops_past_retry() {
        let (sender, backend, wallet) = harness();
        backend.set_nonce(10);
        backend.confirm_ghost_on_next_send();

        let receipt = clear_pending_until_clean(&Scope::new(), &sender, &wallet, CHAIN_ID)
            .await
            .unwrap();

        assert!(receipt.block_number.is_some());
        assert_eq!(backend.sent_nonces(), vec![11]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_pending_until_clean_pauses_between_runs() {
        let (sender, backend, wallet) = harness();
        backend.confirm_ghost_on_next_send();

        let started = tokio::time::Instant::now();
        clear_pending_until_clean(&Scope::new(), &sender, &wallet, CHAIN_ID)
            .await
            .unwrap();
        assert!(started.elapsed() >= CLEAR_RETRY_DELAY);

        // the pause gives way to the scope
        backend.confirm_ghost_on_next_send();
        let scope = Scope::new().with_timeout(CLEAR_RETRY_DELAY / 2);
        let res = clear_pending_until_clean(&scope, &sender, &wallet, CHAIN_ID).await;
        assert!(matches!(res, Err(TxMgrError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_estimation_failure_retried_next_tick() {
        let (sender, backend, wallet) = harness();
        backend.fail_next_estimates(2);

        let receipt = clear_pending(&Scope::new(), &sender, &wallet, CHAIN_ID)
            .await
            .unwrap();

        // third rung is the first one that could be signed
        assert_eq!(receipt.gas_used, Some(U256::from(15)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_pending_surfaces_publish_timeout() {
        let (sender, backend, wallet) = harness();
        backend.fail_next_estimates(usize::MAX);

        let res = clear_pending(&Scope::new(), &sender, &wallet, CHAIN_ID).await;
        assert!(matches!(res, Err(TxMgrError::PublishTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crafted_tx_is_self_transfer_at_nonce() {
        let (_sender, backend, wallet) = harness();

        let tx = craft_clearing_tx(
            &Scope::new(),
            backend.as_ref(),
            &wallet,
            CHAIN_ID,
            42,
            U256::from(9),
        )
        .await
        .unwrap();

        let (decoded, signature) =
            TypedTransaction::decode_signed(&ethers::utils::rlp::Rlp::new(&tx.raw)).unwrap();
        assert_eq!(decoded.nonce(), Some(&U256::from(42)));
        assert_eq!(decoded.to_addr(), Some(&wallet.address()));
        assert_eq!(decoded.value().cloned().unwrap_or_default(), U256::zero());
        assert_eq!(decoded.gas_price(), Some(U256::from(9)));
        assert_eq!(decoded.gas(), Some(&U256::from(21_000)));
        assert_eq!(signature.recover(decoded.sighash()).unwrap(), wallet.address());
        assert_eq!(tx.tx_hash, H256::from(ethers::utils::keccak256(&tx.raw)));
    }
}
