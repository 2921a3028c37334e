use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::info;

/// Events emitted by the [`super::BatchRunner`].
#[derive(Debug, Clone)]
pub enum BatchEvent {
    RunStarted,
    RequestStarted {
        dataset_id: u64,
    },
    RequestFinished {
        dataset_id: u64,
        success: bool,
        elapsed: Duration,
    },
    RunFinished {
        elapsed: Duration,
        metrics: BatchMetricsSnapshot,
    },
}

/// Observer hook for batch events.
pub trait BatchObserver: Send + Sync {
    fn on_event(&self, event: &BatchEvent);
}

/// Forwards batch events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingBatchObserver;

impl BatchObserver for TracingBatchObserver {
    fn on_event(&self, event: &BatchEvent) {
        match event {
            BatchEvent::RunStarted => info!("batch started"),
            BatchEvent::RequestStarted { dataset_id } => info!(dataset_id, "request started"),
            BatchEvent::RequestFinished {
                dataset_id,
                success,
                elapsed,
            } => info!(dataset_id, success, ?elapsed, "request finished"),
            BatchEvent::RunFinished { metrics, .. } => info!(%metrics, "batch finished"),
        }
    }
}

/// Real-time counters for a batch run.
///
/// The runner updates these while it works; callers can snapshot them at any time.
#[derive(Debug)]
pub struct BatchMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,

    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    lines_skipped: AtomicU64,
}

impl BatchMetrics {
    pub fn new() -> Self {
        Self {
            run_id: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
            requests_started: AtomicU64::new(0),
            requests_succeeded: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            lines_skipped: AtomicU64::new(0),
        }
    }

    pub fn begin_run(&self) {
        let _ = self.run_id.fetch_add(1, Ordering::SeqCst);
        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.requests_started.store(0, Ordering::SeqCst);
        self.requests_succeeded.store(0, Ordering::SeqCst);
        self.requests_failed.store(0, Ordering::SeqCst);
        self.lines_skipped.store(0, Ordering::SeqCst);
    }

    pub fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    pub fn on_request_start(&self) {
        let _ = self.requests_started.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_request_end(&self, success: bool) {
        let counter = if success {
            &self.requests_succeeded
        } else {
            &self.requests_failed
        };
        let _ = counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_line_skipped(&self) {
        let _ = self.lines_skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> BatchMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        BatchMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed: (elapsed_ns > 0).then(|| Duration::from_nanos(elapsed_ns)),
            requests_started: self.requests_started.load(Ordering::SeqCst),
            requests_succeeded: self.requests_succeeded.load(Ordering::SeqCst),
            requests_failed: self.requests_failed.load(Ordering::SeqCst),
            lines_skipped: self.lines_skipped.load(Ordering::SeqCst),
        }
    }
}

impl Default for BatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of [`BatchMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    /// Blank lines in the parameter file.
    pub lines_skipped: u64,
}

impl fmt::Display for BatchMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, requests={}, succeeded={}, failed={}, skipped_lines={}, elapsed={:?}",
            self.run_id,
            self.requests_started,
            self.requests_succeeded,
            self.requests_failed,
            self.lines_skipped,
            self.elapsed
        )
    }
}
