//! Fire-and-forget background jobs with bounded concurrency.
//!
//! [`JobRunner::submit`] returns immediately. Each job waits for a semaphore
//! permit, then runs in its own task; an `Err` or a panic is logged and
//! counted as a failure and never reaches the submitter.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tracing::Instrument;

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Point-in-time view of the runner's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub in_flight: usize,
}

#[derive(Clone)]
pub struct JobRunner {
    permits: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl JobRunner {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Run `job` in the background. `name` tags its log lines.
    pub fn submit<F>(&self, name: &'static str, job: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let counters = Arc::clone(&self.counters);
        let permits = Arc::clone(&self.permits);
        counters.submitted.fetch_add(1, Ordering::Relaxed);
        counters.in_flight.fetch_add(1, Ordering::SeqCst);

        let span = tracing::info_span!("job", job = name);
        tokio::spawn(
            async move {
                // The semaphore is never closed; acquire cannot fail in practice.
                let _permit = permits.acquire_owned().await.ok();
                match tokio::spawn(job.in_current_span()).await {
                    Ok(Ok(())) => {
                        counters.succeeded.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("job finished");
                    }
                    Ok(Err(e)) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(error = %format!("{:#}", e), "job failed");
                    }
                    Err(join_err) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(error = %join_err, "job panicked");
                    }
                }
                if counters.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                    counters.idle.notify_waiters();
                }
            }
            .instrument(span),
        );
    }

    pub fn stats(&self) -> JobStats {
        JobStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
        }
    }

    /// Wait until no job is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.counters.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.counters.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
