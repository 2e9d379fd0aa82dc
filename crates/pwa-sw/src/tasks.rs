//! Detached background work (write-behind caching, revalidation).
//!
//! A submitted task never delays the response already handed to the caller.
//! Its error is logged and counted, then dropped; only its success mutates
//! shared state. Dropping the runner aborts whatever is still in flight.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use pwa_common::Result;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Runner for fire-and-forget tasks.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
    counters: Arc<Counters>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` detached. Must be called from within a Tokio runtime.
    pub fn submit<F>(&self, label: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let counters = Arc::clone(&self.counters);
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);

        // Reap finished tasks so the set doesn't grow without bound.
        while set.try_join_next().is_some() {}

        set.spawn(async move {
            match task.await {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                    trace!(task = label, "Background task finished");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    debug!(task = label, error = %e, category = e.category(), "Background task failed, discarded");
                }
            }
        });
    }

    /// Wait until every task submitted so far (and any they submit) is done.
    pub async fn drain(&self) {
        loop {
            let mut pending = {
                let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *set)
            };
            if pending.is_empty() {
                return;
            }
            while let Some(joined) = pending.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Background task panicked or was aborted");
                }
            }
        }
    }

    /// Tasks still running.
    pub fn pending(&self) -> usize {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::Relaxed)
    }

    /// Tasks whose error was swallowed.
    pub fn failures(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }
}
