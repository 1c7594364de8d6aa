//! Cancellation scopes
//!
//! A [`Scope`] is a node in a parent -> child cancellation tree with an
//! optional deadline. Cancelling a scope cancels all of its descendants, and a
//! child never outlives its parent's deadline.

use crate::error::{TxMgrError, TxMgrResult};

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Cancellable scope handed to every blocking TxMgr operation
#[derive(Debug, Clone)]
pub struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Scope {
    /// Create a root scope with no deadline
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derive a child scope that is cancelled together with this one
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child scope that additionally expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child scope that additionally expires at `deadline`
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancel this scope and every scope derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns a guard that cancels the scope when dropped
    pub fn drop_guard(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancellation cause, or `None` while the scope is live
    pub fn err(&self) -> Option<TxMgrError> {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(TxMgrError::DeadlineExceeded)
        } else if self.token.is_cancelled() {
            Some(TxMgrError::Canceled)
        } else {
            None
        }
    }

    /// Resolves once the scope is cancelled or its deadline passes
    pub async fn done(&self) -> TxMgrError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = sleep_until(deadline) => return TxMgrError::DeadlineExceeded,
                }
            }
            None => self.token.cancelled().await,
        }
        self.err().unwrap_or(TxMgrError::Canceled)
    }

    /// Race `fut` against the scope. The future is dropped if the scope ends
    /// first and the cancellation cause is returned instead.
    pub async fn run<F, T>(&self, fut: F) -> TxMgrResult<T>
    where
        F: Future<Output = T>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}
