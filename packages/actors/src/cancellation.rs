//! Cooperative cancellation handed to running processors.

use std::sync::{Arc, OnceLock};

use queue_core::CancellationReason;
use tokio_util::sync::CancellationToken;

/// Signal that a processor should stop, plus the first reason given.
///
/// The engine never interrupts a processor. Processors poll
/// [`Cancellation::is_cancelled`] or await [`Cancellation::cancelled`] and
/// finish on their own.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    token: CancellationToken,
    reason: Arc<OnceLock<CancellationReason>>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later calls keep the first reason.
    pub fn cancel(&self, reason: CancellationReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<CancellationReason> {
        self.reason.get().copied()
    }

    /// Resolves once cancellation is signalled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Underlying token, for `tokio::select!` or child tokens.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
