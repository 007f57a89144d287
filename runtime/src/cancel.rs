//! Cooperative run-level cancellation.

use tokio::sync::watch;

/// A cloneable cancellation token.
///
/// Cancellation is cooperative: a cancelled operation resolves at its next
/// suspension point. Orchestrator phases race their work against
/// [`CancelToken::cancelled`]; the losing future is dropped, which is how
/// in-flight LLM requests get discarded.
#[derive(Clone, Debug)]
pub struct CancelToken {
    sender: watch::Sender<bool>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self { sender, receiver }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if *receiver.borrow() {
            return;
        }
        while receiver.changed().await.is_ok() {
            if *receiver.borrow() {
                return;
            }
        }
        // Sender dropped without cancelling; treat as never-cancelled.
        std::future::pending::<()>().await;
    }

    /// Reset to uncancelled, for run restarts after a pause.
    pub fn reset(&self) {
        let _ = self.sender.send(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_resolves_waiters() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        let resolved = tokio::time::timeout(Duration::from_millis(200), handle).await;
        assert!(matches!(resolved, Ok(Ok(true))));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_resettable() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_resolves_immediately() {
        let token = CancelToken::new();
        token.cancel();
        let resolved =
            tokio::time::timeout(Duration::from_millis(50), token.cancelled()).await;
        assert!(resolved.is_ok());
    }
}
