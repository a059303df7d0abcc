use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::Result;

#[derive(Default)]
struct Shared {
    /// Tasks still waiting out their delay, tagged with a schedule id.
    /// Removed once they start running.
    pending: Mutex<HashMap<String, (u64, JoinHandle<()>)>>,
    next_id: AtomicU64,
    /// Scheduled tasks that have not finished, pending or running.
    in_flight: AtomicUsize,
    idle: Notify,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<String, (u64, JoinHandle<()>)>> {
        // The map only holds handles; a poisoned lock leaves it consistent.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Decrements the in-flight count when a task ends, however it ends.
struct InFlight(Arc<Shared>);

impl InFlight {
    fn start(shared: &Arc<Shared>) -> Self {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(shared))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Per-key trailing debounce. A newer schedule for a key replaces a task
/// that is still waiting; a task that has started runs to completion.
#[derive(Clone)]
pub struct Debouncer {
    delay: Duration,
    shared: Arc<Shared>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            shared: Arc::default(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `task` after the delay unless another schedule for `key` arrives
    /// first. Returns immediately; errors and panics are only logged.
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, key: &str, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let guard = InFlight::start(&self.shared);
        let shared = Arc::clone(&self.shared);
        let delay = self.delay;
        let owned_key = key.to_string();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        let mut pending = self.shared.pending();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            tokio::time::sleep(delay).await;

            // Claim the slot. Past this point a newer event can no longer
            // cancel us; if the slot is already someone else's we were
            // replaced while waking up.
            {
                let mut pending = shared.pending();
                match pending.get(&owned_key) {
                    Some((current, _)) if *current == id => {
                        pending.remove(&owned_key);
                    }
                    _ => return,
                }
            }
            debug!(key = %owned_key, "debounced task starting");

            match tokio::spawn(task()).await {
                Ok(Ok(())) => debug!(key = %owned_key, "debounced task finished"),
                Ok(Err(e)) => error!(key = %owned_key, error = %e, "debounced task failed"),
                Err(e) if e.is_panic() => error!(key = %owned_key, "debounced task panicked"),
                Err(e) => warn!(key = %owned_key, error = %e, "debounced task cancelled"),
            }
        });

        if let Some((_, previous)) = pending.insert(key.to_string(), (id, handle)) {
            previous.abort();
            debug!(key, "replaced pending task");
        }
    }

    /// Number of tasks still waiting out their delay.
    pub fn pending_count(&self) -> usize {
        self.shared.pending().len()
    }

    /// Wait until every scheduled task has either run or been replaced.
    pub async fn idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.shared.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::AtomicU32;

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[tokio::test]
    async fn test_runs_after_delay() {
        let debouncer = Debouncer::new(Duration::from_millis(20));
        let runs = counter();
        let r = Arc::clone(&runs);
        debouncer.schedule("pr-1", move || async move {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(debouncer.pending_count(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        debouncer.idle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_burst_collapses_to_last() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            debouncer.schedule("pr-1", move || async move {
                seen.lock().unwrap().push(i);
                Ok(())
            });
        }
        assert_eq!(debouncer.pending_count(), 1);
        debouncer.idle().await;
        assert_eq!(*seen.lock().unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let debouncer = Debouncer::new(Duration::from_millis(20));
        let runs = counter();
        for key in ["pr-1", "pr-2"] {
            let r = Arc::clone(&runs);
            debouncer.schedule(key, move || async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(debouncer.pending_count(), 2);
        debouncer.idle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_running_task_is_not_cancelled() {
        let debouncer = Debouncer::new(Duration::from_millis(10));
        let finished = counter();
        let started = Arc::new(Notify::new());

        let f = Arc::clone(&finished);
        let s = Arc::clone(&started);
        debouncer.schedule("pr-1", move || async move {
            s.notify_one();
            tokio::time::sleep(Duration::from_millis(80)).await;
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        started.notified().await;
        let f = Arc::clone(&finished);
        debouncer.schedule("pr-1", move || async move {
            f.fetch_add(10, Ordering::SeqCst);
            Ok(())
        });

        debouncer.idle().await;
        assert_eq!(finished.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_failure_and_panic_are_contained() {
        let debouncer = Debouncer::new(Duration::from_millis(5));
        debouncer.schedule("pr-1", || async { Err(Error::Debounce("boom".into())) });
        debouncer.schedule("pr-2", || async {
            if true {
                panic!("task panicked");
            }
            Ok(())
        });
        let runs = counter();
        let r = Arc::clone(&runs);
        debouncer.schedule("pr-3", move || async move {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        debouncer.idle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idle_returns_immediately_when_empty() {
        let debouncer = Debouncer::new(Duration::from_secs(60));
        tokio::time::timeout(Duration::from_millis(100), debouncer.idle())
            .await
            .unwrap();
    }
}
