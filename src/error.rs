//! Error types for the transaction manager

use thiserror::Error;

/// Error text L1 nodes return when a transaction reuses a spent nonce
pub const NONCE_TOO_LOW: &str = "nonce too low";

/// Main error type for the transaction manager
#[derive(Error, Debug, Clone)]
pub enum TxMgrError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Nonce too low: {0}")]
    NonceTooLow(String),

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("publish timeout: fee ceiling reached without confirmation")]
    PublishTimeout,

    #[error("retry clear pending txn")]
    RetryClear,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TxMgrError {
    /// True for scope cancellation, or a transport error reporting that the
    /// underlying request was canceled.
    pub fn is_canceled(&self) -> bool {
        match self {
            TxMgrError::Canceled | TxMgrError::DeadlineExceeded => true,
            TxMgrError::Rpc(msg)
            | TxMgrError::GasEstimation(msg)
            | TxMgrError::ChainConnection { message: msg, .. } => msg.contains("canceled"),
            _ => false,
        }
    }

    /// True when the node rejected a publication because the nonce is spent.
    ///
    /// Typed errors are matched structurally. Transport errors that never went
    /// through [`classify_rpc_error`] fall back to matching the node's text.
    pub fn is_nonce_too_low(&self) -> bool {
        match self {
            TxMgrError::NonceTooLow(_) => true,
            TxMgrError::Rpc(msg) | TxMgrError::ChainConnection { message: msg, .. } => {
                msg.contains(NONCE_TOO_LOW)
            }
            _ => false,
        }
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            TxMgrError::PublishTimeout | TxMgrError::Wallet(_) | TxMgrError::Config(_)
        )
    }
}

/// Turn raw node error text into a typed error
pub fn classify_rpc_error(message: impl Into<String>) -> TxMgrError {
    let message = message.into();
    if message.contains(NONCE_TOO_LOW) {
        TxMgrError::NonceTooLow(message)
    } else {
        TxMgrError::Rpc(message)
    }
}

/// Result type for transaction manager operations
pub type TxMgrResult<T> = Result<T, TxMgrError>;
