//! Close token shared between a link's owner and its forwarding worker.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// An idempotent close signal.
///
/// Synchronous code can query it; async workers can await it alongside
/// their reads. Only the first close reason is kept.
#[derive(Default)]
pub struct CloseToken {
    /// Whether close has been requested.
    closed: AtomicBool,
    /// The reason for closing (first one wins).
    reason: RwLock<Option<String>>,
    /// Wakes tasks parked in [`CloseToken::closed`].
    notify: Notify,
}

impl CloseToken {
    /// Creates a new open token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests close with a reason.
    ///
    /// Returns true if this call performed the transition.
    pub fn close(&self, reason: impl Into<String>) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.reason.write() = Some(reason.into());
            self.notify.notify_waiters();
            true
        } else {
            false
        }
    }

    /// Returns whether close has been requested.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the close reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Completes once close has been requested.
    pub async fn closed(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CloseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseToken")
            .field("closed", &self.is_closed())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_token_default_open() {
        let token = CloseToken::new();
        assert!(!token.is_closed());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_token_close_idempotent() {
        let token = CloseToken::new();
        assert!(token.close("teardown"));
        assert!(!token.close("second"));

        assert!(token.is_closed());
        assert_eq!(token.reason(), Some("teardown".to_string()));
    }

    #[tokio::test]
    async fn test_closed_wakes_waiter() {
        let token = Arc::new(CloseToken::new());
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.closed().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.close("done");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_returns_immediately_when_already_closed() {
        let token = CloseToken::new();
        token.close("early");
        tokio::time::timeout(Duration::from_millis(50), token.closed())
            .await
            .unwrap();
    }
}
