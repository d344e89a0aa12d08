//! Teardown registry for releasing run resources.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, warn};

type CleanupAction = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A cleanup action with its name.
struct CleanupEntry {
    name: String,
    action: CleanupAction,
}

/// Registry for cleanup actions executed in LIFO order.
///
/// Teardown is unconditional: every action runs even if earlier ones
/// panic or time out, so link endpoints are released however the run ended.
#[derive(Default)]
pub struct CleanupRegistry {
    entries: Mutex<Vec<CleanupEntry>>,
}

impl CleanupRegistry {
    /// Creates a new cleanup registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an async cleanup action.
    pub fn register<F, Fut>(&self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.entries.lock().push(CleanupEntry {
            name: name.into(),
            action: Box::new(move || action().boxed()),
        });
    }

    /// Registers a synchronous cleanup action.
    pub fn register_sync<F>(&self, name: impl Into<String>, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.register(name, move || async move { action() });
    }

    /// Removes every action with the given name.
    ///
    /// Returns true if an action was removed.
    pub fn unregister_by_name(&self, name: &str) -> bool {
        let mut entries = self.entries.lock();
        let initial_len = entries.len();
        entries.retain(|e| e.name != name);
        entries.len() < initial_len
    }

    /// Runs all actions in LIFO order, each bounded by `per_action`.
    ///
    /// Returns `(name, message)` for each action that panicked or timed out.
    /// The registry is empty afterwards.
    pub async fn run_all(&self, per_action: Duration) -> Vec<(String, String)> {
        let entries: Vec<CleanupEntry> = std::mem::take(&mut *self.entries.lock());
        let mut failures = Vec::new();

        for entry in entries.into_iter().rev() {
            let name = entry.name;
            debug!(cleanup = %name, "Running cleanup action");
            let fut = AssertUnwindSafe((entry.action)()).catch_unwind();
            match tokio::time::timeout(per_action, fut).await {
                Ok(Ok(())) => {}
                Ok(Err(panic)) => {
                    let msg = format!("cleanup action panicked: {panic:?}");
                    warn!(cleanup = %name, "{}", msg);
                    failures.push((name, msg));
                }
                Err(_) => {
                    let msg = format!("cleanup action timed out after {per_action:?}");
                    warn!(cleanup = %name, "{}", msg);
                    failures.push((name, msg));
                }
            }
        }

        failures
    }

    /// Returns the number of pending cleanup actions.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Clears all registered actions without running them.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}
