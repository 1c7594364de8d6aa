//! L1 transaction submission manager
//!
//! Lands sequencer-authored transactions on L1 by resubmitting them at
//! escalating fees, watching every publication until it is buried under the
//! configured number of confirmations, and clearing stale mempool entries
//! left behind by a previous run.

pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod scope;
pub mod tx;

#[cfg(test)]
mod test_utils;

pub use chain::{ChainProvider, L1Client};
pub use error::{TxMgrError, TxMgrResult};
pub use scope::Scope;
pub use tx::{SenderConfig, TransactionSender};
