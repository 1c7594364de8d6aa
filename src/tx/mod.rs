//! Transaction submission: fee escalation, confirmation watching and mempool
//! reconciliation

mod fee;
mod reconciler;
mod sender;
mod watcher;

pub use fee::{gwei_to_wei, next_bid, wei_to_gwei, FeeBid};
pub use reconciler::{clear_pending, clear_pending_until_clean, craft_clearing_tx, ClearingTx};
pub use sender::{SendAttempt, SenderConfig, TransactionSender};
pub use watcher::{is_confirmed, wait_mined};
