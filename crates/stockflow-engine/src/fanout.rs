//! # Bounded Fan-Out
//!
//! Runs one async task per item with at most `limit` in flight, then joins
//! all of them before returning.
//!
//! ## Worker Pool
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FanOut::run(items, task)                         │
//! │                                                                         │
//! │  items ──► JoinSet::spawn(item 0) ─┐                                    │
//! │            JoinSet::spawn(item 1) ─┤   each task first waits on        │
//! │            ...                     ├─► Semaphore(limit).acquire_owned  │
//! │            JoinSet::spawn(item n) ─┘   then awaits its own DB call     │
//! │                                                                         │
//! │  join_next() until empty                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  FanOutReport { succeeded, failed }   ← every error kept, in item order │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tasks are spawned on the runtime, so they keep running if the caller's
//! future is dropped.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::LedgerError;

/// Joined outcome of a fan-out, in input order.
#[derive(Debug)]
pub struct FanOutReport<T, R> {
    pub succeeded: Vec<(T, R)>,
    pub failed: Vec<(T, LedgerError)>,
}

impl<T, R> FanOutReport<T, R> {
    /// True when every item succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of items processed.
    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded worker pool.
#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    limit: usize,
}

impl FanOut {
    /// A pool running at most `limit` tasks at once (at least one).
    pub fn new(limit: usize) -> Self {
        FanOut {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Runs `task` for every item and waits for all of them.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, task: F) -> FanOutReport<T, R>
    where
        T: Clone + Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, LedgerError>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut set = JoinSet::new();

        debug!(items = items.len(), limit = self.limit, "Fanning out");

        for (index, item) in items.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let work = task(item);
            set.spawn(async move {
                // The semaphore is never closed, so this only fails on shutdown.
                let _permit = semaphore.acquire_owned().await.ok();
                (index, work.await)
            });
        }

        let mut outcomes: Vec<Option<Result<R, LedgerError>>> =
            items.iter().map(|_| None).collect();

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => warn!(error = %e, "Fan-out worker did not finish"),
            }
        }

        let mut report = FanOutReport {
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        for (item, outcome) in items.into_iter().zip(outcomes) {
            match outcome {
                Some(Ok(value)) => report.succeeded.push((item, value)),
                Some(Err(e)) => report.failed.push((item, e)),
                None => report
                    .failed
                    .push((item, LedgerError::Transaction("worker task aborted".into()))),
            }
        }

        report
    }
}

impl Default for FanOut {
    fn default() -> Self {
        FanOut::new(10)
    }
}
