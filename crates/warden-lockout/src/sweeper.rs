//! Periodic cleanup of expired locks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::LockoutStore;

/// Default interval between cleanup passes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that calls [`LockoutStore::cleanup`] on an interval.
///
/// The task stops when [`stop`](Self::stop) is called or the sweeper is
/// dropped. Cleanup runs on the blocking pool because it touches the state
/// file.
pub struct LockoutSweeper {
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LockoutSweeper {
    /// Spawn the sweeper on the current Tokio runtime.
    ///
    /// A zero `interval` falls back to [`DEFAULT_SWEEP_INTERVAL`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn spawn(store: Arc<LockoutStore>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_SWEEP_INTERVAL
        } else {
            interval
        };
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let store = Arc::clone(&store);
                        match tokio::task::spawn_blocking(move || store.cleanup()).await {
                            Ok(summary) if !summary.is_empty() => {
                                info!(
                                    released = summary.released,
                                    removed = summary.removed,
                                    "lockout sweep"
                                );
                            },
                            Ok(_) => {},
                            Err(e) => warn!(error = %e, "lockout sweep task failed"),
                        }
                    },
                }
            }
            debug!("lockout sweeper stopped");
        });

        Self {
            token,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Ask the task to stop. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether the task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop the task and wait for it to finish.
    pub async fn join(&self) {
        self.stop();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "lockout sweeper ended abnormally");
        }
    }
}

impl Drop for LockoutSweeper {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for LockoutSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockoutSweeper")
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LockoutPolicy;
    use std::collections::HashMap;
    use warden_crypto::{KeyManager, KeyManagerConfig};

    fn store(dir: &std::path::Path, duration: Duration) -> Arc<LockoutStore> {
        let keys = KeyManager::new(KeyManagerConfig::lockout(dir));
        keys.load_with_env(&HashMap::new()).unwrap();
        let policy = LockoutPolicy {
            max_attempts: 1,
            lockout_duration: duration,
            enabled: true,
        };
        Arc::new(LockoutStore::open(dir, Arc::new(keys), policy).unwrap())
    }

    #[tokio::test]
    async fn test_sweeper_releases_expired_locks() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::from_millis(20));
        store.record_attempt("alice", false).unwrap();
        assert!(store.status("alice").unwrap().locked);

        let sweeper = LockoutSweeper::spawn(Arc::clone(&store), Duration::from_millis(30));
        tokio::time::sleep(Duration::from_millis(200)).await;
        sweeper.join().await;

        assert!(!sweeper.is_running());
        assert!(store.list_locked().is_empty());
        // The sweep already released the lock.
        assert!(matches!(
            store.unlock("alice"),
            Err(crate::LockoutError::NotLocked { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::from_secs(60));
        let sweeper = LockoutSweeper::spawn(store, Duration::from_secs(3600));
        assert!(sweeper.is_running());

        sweeper.stop();
        sweeper.stop();
        sweeper.join().await;
        sweeper.join().await;
        assert!(!sweeper.is_running());
    }
}
