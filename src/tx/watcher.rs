//! Confirmation watcher
//!
//! Polls the L1 node until a transaction is included and buried under the
//! configured number of blocks. A receipt that disappears after a re-org is
//! simply treated as pending again; lookups are by hash so a transaction that
//! moves to a different block is picked up transparently.

use crate::chain::L1Client;
use crate::error::TxMgrResult;
use crate::scope::Scope;

use ethers::types::{TransactionReceipt, H256, U64};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Whether a transaction mined at `tx_height` has `num_confirmations` blocks
/// at `tip_height`.
///
/// Written as `tx + confs <= tip + 1` so it cannot underflow when the tip
/// lags behind the receipt.
pub fn is_confirmed(tx_height: u64, tip_height: u64, num_confirmations: u64) -> bool {
    tx_height.saturating_add(num_confirmations) <= tip_height.saturating_add(1)
}

/// Wait until `tx_hash` has `num_confirmations` confirmations, or the scope
/// ends. Transport errors never stop the poller.
pub async fn wait_mined<C>(
    scope: &Scope,
    client: &C,
    tx_hash: H256,
    poll_interval: Duration,
    num_confirmations: u64,
) -> TxMgrResult<TransactionReceipt>
where
    C: L1Client + ?Sized,
{
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            err = scope.done() => return Err(err),
            _ = ticker.tick() => {}
        }

        let receipt = match scope.run(client.transaction_receipt(tx_hash)).await? {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                trace!("Transaction {:?} not yet mined", tx_hash);
                continue;
            }
            Err(e) => {
                trace!("Receipt retrieval for {:?} failed: {}", tx_hash, e);
                continue;
            }
        };

        let Some(tx_height) = receipt.block_number.map(|b| b.as_u64()) else {
            trace!("Receipt for {:?} has no block number yet", tx_hash);
            continue;
        };

        let tip_height = match scope.run(client.block_number()).await? {
            Ok(tip) => tip,
            Err(e) => {
                trace!("Unable to fetch block number: {}", e);
                continue;
            }
        };

        if is_confirmed(tx_height, tip_height, num_confirmations) {
            if receipt.status == Some(U64::zero()) {
                warn!(
                    "Transaction {:?} confirmed at block {} but reverted",
                    tx_hash, tx_height
                );
            }
            return Ok(receipt);
        }

        debug!(
            "Transaction {:?} at block {} awaiting {} more confirmations (tip {})",
            tx_hash,
            tx_height,
            tx_height
                .saturating_add(num_confirmations)
                .saturating_sub(tip_height.saturating_add(1)),
            tip_height
        );
    }
}
