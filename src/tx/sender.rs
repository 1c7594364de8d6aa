//! Fee-escalation sender
//!
//! Publishes the same logical transaction at increasing fees until one of the
//! publications confirms. Every publication gets its own task that invokes
//! the caller's send closure and then watches the resulting hash; the first
//! receipt to arrive wins and every other task is cancelled.

use super::fee::{next_bid, wei_to_gwei, FeeBid};
use super::watcher::wait_mined;
use crate::chain::L1Client;
use crate::error::{TxMgrError, TxMgrResult};
use crate::scope::Scope;

use ethers::types::{TransactionReceipt, H256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Immutable sender configuration
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Tag used to correlate log lines
    pub name: String,
    /// Fee of the first publication
    pub min_fee: FeeBid,
    /// Fee ceiling
    pub max_fee: FeeBid,
    /// Increment applied on every resubmission
    pub fee_step: FeeBid,
    /// Time between resubmissions
    pub resubmit_interval: Duration,
    /// Time between receipt queries
    pub receipt_poll_interval: Duration,
    /// Blocks a transaction must be buried under, including its own
    pub num_confirmations: u64,
}

impl SenderConfig {
    /// Check the operator-provided bounds
    pub fn validate(&self) -> TxMgrResult<()> {
        if self.num_confirmations == 0 {
            return Err(TxMgrError::Config(
                "num_confirmations must not be 0".to_string(),
            ));
        }
        if self.min_fee > self.max_fee {
            return Err(TxMgrError::Config(format!(
                "min_fee {} exceeds max_fee {}",
                self.min_fee, self.max_fee
            )));
        }
        if self.fee_step.is_zero() {
            return Err(TxMgrError::Config("fee_step must not be 0".to_string()));
        }
        if self.resubmit_interval.is_zero() {
            return Err(TxMgrError::Config(
                "must provide resubmit_interval".to_string(),
            ));
        }
        if self.receipt_poll_interval.is_zero() {
            return Err(TxMgrError::Config(
                "must provide receipt_poll_interval".to_string(),
            ));
        }
        Ok(())
    }
}

/// One publication of the logical transaction
#[derive(Debug, Clone)]
pub struct SendAttempt {
    pub index: u32,
    pub fee: FeeBid,
    pub started_at: Instant,
}

impl SendAttempt {
    fn new(index: u32, fee: FeeBid) -> Self {
        Self {
            index,
            fee,
            started_at: Instant::now(),
        }
    }
}

/// Lands a transaction on L1 by resubmitting it at escalating fees.
///
/// `send` must not be called concurrently on the same sender.
pub struct TransactionSender {
    config: SenderConfig,
    client: Arc<dyn L1Client>,
}

impl TransactionSender {
    /// Create a new transaction sender
    ///
    /// # Panics
    ///
    /// If `config.num_confirmations` is zero, or on any other bound
    /// [`SenderConfig::validate`] rejects.
    pub fn new(config: SenderConfig, client: Arc<dyn L1Client>) -> Self {
        assert!(
            config.num_confirmations > 0,
            "{}: num_confirmations cannot be zero",
            config.name
        );
        if let Err(e) = config.validate() {
            panic!("{}: {}", config.name, e);
        }

        info!(
            "Transaction sender {} initialized: fee {}..{} step {}, {} confirmations",
            config.name, config.min_fee, config.max_fee, config.fee_step, config.num_confirmations
        );

        Self { config, client }
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<dyn L1Client> {
        &self.client
    }

    /// Publish via `send_fn` at escalating fees until a publication confirms.
    ///
    /// `send_fn` receives a child scope and the bid for this attempt, and
    /// returns the hash of the broadcast transaction. It is called once per
    /// escalation step. Returns [`TxMgrError::PublishTimeout`] if the fee
    /// ceiling was reached and a full resubmission interval passed without a
    /// confirmation, or the scope's cancellation cause.
    pub async fn send<F, Fut>(&self, scope: &Scope, send_fn: F) -> TxMgrResult<TransactionReceipt>
    where
        F: Fn(Scope, FeeBid) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TxMgrResult<H256>> + Send + 'static,
    {
        let send_scope = scope.child();
        let _cancel_on_exit = send_scope.drop_guard();

        let send_fn = Arc::new(send_fn);
        let (receipt_tx, mut receipt_rx) = mpsc::channel(1);
        let mut attempts = JoinSet::new();

        let mut index = 0;
        let mut bid = self.config.min_fee;
        self.spawn_attempt(
            &mut attempts,
            &send_scope,
            &send_fn,
            SendAttempt::new(index, bid),
            &receipt_tx,
        );

        let period = self.config.resubmit_interval;
        let mut resubmit = interval_at(Instant::now() + period, period);
        resubmit.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let result = loop {
            tokio::select! {
                biased;
                Some(receipt) = receipt_rx.recv() => break Ok(receipt),
                err = send_scope.done() => break Err(err),
                _ = resubmit.tick() => {
                    if bid >= self.config.max_fee {
                        // Watchers woken by the same tick get one turn to
                        // hand over their receipt.
                        tokio::task::yield_now().await;
                        if let Ok(receipt) = receipt_rx.try_recv() {
                            break Ok(receipt);
                        }

                        error!(
                            "{}: publish timeout at fee ceiling {} after {} attempts",
                            self.config.name, bid, index + 1
                        );
                        crate::metrics::record_publish_timeout(&self.config.name);
                        break Err(TxMgrError::PublishTimeout);
                    }

                    bid = next_bid(bid, self.config.fee_step, self.config.max_fee);
                    index += 1;
                    self.spawn_attempt(
                        &mut attempts,
                        &send_scope,
                        &send_fn,
                        SendAttempt::new(index, bid),
                        &receipt_tx,
                    );
                }
            }
        };

        // Wake every watcher, then wait for all of them to unwind.
        send_scope.cancel();
        while attempts.join_next().await.is_some() {}

        result
    }

    fn spawn_attempt<F, Fut>(
        &self,
        attempts: &mut JoinSet<()>,
        send_scope: &Scope,
        send_fn: &Arc<F>,
        attempt: SendAttempt,
        receipt_tx: &mpsc::Sender<TransactionReceipt>,
    ) where
        F: Fn(Scope, FeeBid) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TxMgrResult<H256>> + Send + 'static,
    {
        debug!(
            "{}: publishing attempt {} at {} wei",
            self.config.name, attempt.index, attempt.fee
        );
        crate::metrics::record_bid(&self.config.name, wei_to_gwei(attempt.fee));

        attempts.spawn(publish_and_wait(
            self.config.clone(),
            self.client.clone(),
            send_scope.clone(),
            send_fn.clone(),
            attempt,
            receipt_tx.clone(),
        ));
    }
}

/// Body of one attempt: publish, then watch the published hash
async fn publish_and_wait<F, Fut>(
    config: SenderConfig,
    client: Arc<dyn L1Client>,
    scope: Scope,
    send_fn: Arc<F>,
    attempt: SendAttempt,
    receipt_tx: mpsc::Sender<TransactionReceipt>,
) where
    F: Fn(Scope, FeeBid) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TxMgrResult<H256>> + Send + 'static,
{
    let published = match scope.run((send_fn.as_ref())(scope.child(), attempt.fee)).await {
        Ok(published) => published,
        Err(_) => return,
    };

    let tx_hash = match published {
        Ok(tx_hash) => tx_hash,
        // Aborted on purpose, nothing was published.
        Err(e) if e.is_canceled() => return,
        Err(e) => {
            if e.is_nonce_too_low() {
                // Another party may have spent the nonce; only the reconciler
                // acts on this.
                warn!(
                    "{}: attempt {} rejected with nonce too low, treating as transient",
                    config.name, attempt.index
                );
            } else {
                warn!(
                    "{}: unable to publish attempt {} at {} wei: {}",
                    config.name, attempt.index, attempt.fee, e
                );
            }
            crate::metrics::record_publish_failure(&config.name);
            return;
        }
    };

    info!(
        "{}: attempt {} published {:?} at {} wei",
        config.name, attempt.index, tx_hash, attempt.fee
    );
    crate::metrics::record_attempt_published(&config.name);

    let receipt = match wait_mined(
        &scope,
        client.as_ref(),
        tx_hash,
        config.receipt_poll_interval,
        config.num_confirmations,
    )
    .await
    {
        Ok(receipt) => receipt,
        Err(_) => return,
    };

    info!(
        "{}: attempt {} confirmed {:?} in block {:?} after {:?}",
        config.name,
        attempt.index,
        tx_hash,
        receipt.block_number,
        attempt.started_at.elapsed()
    );

    // A full slot means another attempt already won.
    if receipt_tx.try_send(receipt).is_ok() {
        crate::metrics::record_confirmation(&config.name);
    }
}
