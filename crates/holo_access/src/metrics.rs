//! Timing observations and in-process counters.
//!
//! Every batch execution and every page fetch produces one [`TimingEvent`].
//! Events go to the built-in lock-free [`ClientMetrics`], to any registered
//! [`TimingObserver`], and to `tracing` at debug level.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;

use crate::error::Error;

/// Operation a timing event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// One batch sent to one destination.
    BatchExecute,
    /// Waiting for one page of a paged read.
    PageFetch,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::BatchExecute => f.write_str("batch_execute"),
            Operation::PageFetch => f.write_str("page_fetch"),
        }
    }
}

/// One completed, timed backend operation.
#[derive(Debug, Clone)]
pub struct TimingEvent {
    pub operation: Operation,
    /// Destination index for batch executions.
    pub destination: Option<usize>,
    /// Wall-clock start.
    pub started_at: SystemTime,
    /// Wall-clock end, derived from the monotonic duration.
    pub finished_at: SystemTime,
    pub duration: Duration,
    /// Statements in the batch, or rows on the page.
    pub size: usize,
    /// Failure, when the operation did not succeed.
    pub error: Option<Error>,
}

/// External consumer of timing events.
pub trait TimingObserver: Send + Sync + 'static {
    /// Called once per completed operation, on the completing thread.
    fn observe(&self, event: &TimingEvent);
}

/// Running timer; turned into a [`TimingEvent`] by [`Timer::finish`].
#[derive(Debug)]
pub struct Timer {
    operation: Operation,
    destination: Option<usize>,
    started_at: SystemTime,
    started: Instant,
}

impl Timer {
    /// Starts timing `operation`.
    pub fn start(operation: Operation, destination: Option<usize>) -> Self {
        Self {
            operation,
            destination,
            started_at: SystemTime::now(),
            started: Instant::now(),
        }
    }

    /// Stops the timer and builds the event.
    pub fn finish(self, size: usize, error: Option<Error>) -> TimingEvent {
        let duration = self.started.elapsed();
        TimingEvent {
            operation: self.operation,
            destination: self.destination,
            started_at: self.started_at,
            finished_at: self.started_at + duration,
            duration,
            size,
            error,
        }
    }
}

/// Per-destination batch aggregates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DestinationMetrics {
    /// Batches executed on this destination.
    pub batches: u64,
    /// Statements carried by those batches.
    pub statements: u64,
    /// Batches that failed or timed out.
    pub failures: u64,
    /// Accumulated execution latency in nanoseconds.
    pub latency_ns: u64,
}

/// Aggregated counters for batch writes and paged reads.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    /// Batches executed, failed ones included.
    batches: AtomicU64,
    /// Statements carried by executed batches.
    batch_statements: AtomicU64,
    /// Batches that failed or timed out.
    batch_failures: AtomicU64,
    /// Accumulated batch latency in nanoseconds.
    batch_latency_ns_total: AtomicU64,
    /// Pages waited on, failed ones included.
    pages: AtomicU64,
    /// Rows delivered by those pages.
    page_rows: AtomicU64,
    /// Page fetches that failed.
    page_failures: AtomicU64,
    /// Accumulated page wait time in nanoseconds.
    page_latency_ns_total: AtomicU64,
    /// Batch aggregates keyed by destination index.
    by_destination: Mutex<BTreeMap<usize, DestinationMetrics>>,
}

/// Immutable snapshot view of [`ClientMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientMetricsSnapshot {
    pub batches: u64,
    pub batch_statements: u64,
    pub batch_failures: u64,
    pub batch_latency_ns_total: u64,
    pub pages: u64,
    pub page_rows: u64,
    pub page_failures: u64,
    pub page_latency_ns_total: u64,
    pub by_destination: BTreeMap<usize, DestinationMetrics>,
}

impl ClientMetrics {
    /// Captures a point-in-time copy of all counters.
    pub fn snapshot(&self) -> ClientMetricsSnapshot {
        let by_destination = self
            .by_destination
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        ClientMetricsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            batch_statements: self.batch_statements.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            batch_latency_ns_total: self.batch_latency_ns_total.load(Ordering::Relaxed),
            pages: self.pages.load(Ordering::Relaxed),
            page_rows: self.page_rows.load(Ordering::Relaxed),
            page_failures: self.page_failures.load(Ordering::Relaxed),
            page_latency_ns_total: self.page_latency_ns_total.load(Ordering::Relaxed),
            by_destination,
        }
    }
}

impl TimingObserver for ClientMetrics {
    fn observe(&self, event: &TimingEvent) {
        let latency_ns = event.duration.as_nanos().min(u128::from(u64::MAX)) as u64;
        let failed = event.error.is_some();
        match event.operation {
            Operation::BatchExecute => {
                self.batches.fetch_add(1, Ordering::Relaxed);
                self.batch_statements
                    .fetch_add(event.size as u64, Ordering::Relaxed);
                self.batch_latency_ns_total
                    .fetch_add(latency_ns, Ordering::Relaxed);
                if failed {
                    self.batch_failures.fetch_add(1, Ordering::Relaxed);
                }
                if let Some(destination) = event.destination {
                    let mut by_destination = self
                        .by_destination
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    let entry = by_destination.entry(destination).or_default();
                    entry.batches = entry.batches.saturating_add(1);
                    entry.statements = entry.statements.saturating_add(event.size as u64);
                    entry.latency_ns = entry.latency_ns.saturating_add(latency_ns);
                    if failed {
                        entry.failures = entry.failures.saturating_add(1);
                    }
                }
            }
            Operation::PageFetch => {
                self.pages.fetch_add(1, Ordering::Relaxed);
                self.page_rows.fetch_add(event.size as u64, Ordering::Relaxed);
                self.page_latency_ns_total
                    .fetch_add(latency_ns, Ordering::Relaxed);
                if failed {
                    self.page_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Fan-out point for timing events.
#[derive(Clone, Default)]
pub struct Telemetry {
    metrics: Arc<ClientMetrics>,
    observers: Vec<Arc<dyn TimingObserver>>,
}

impl Telemetry {
    /// Fans out to `metrics` only.
    pub fn new(metrics: Arc<ClientMetrics>) -> Self {
        Self {
            metrics,
            observers: Vec::new(),
        }
    }

    /// Adds an external consumer.
    pub fn with_observer(mut self, observer: Arc<dyn TimingObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Built-in counters.
    pub fn metrics(&self) -> Arc<ClientMetrics> {
        self.metrics.clone()
    }

    /// Logs `event` and hands it to the counters and every observer.
    pub fn record(&self, event: &TimingEvent) {
        tracing::debug!(
            operation = %event.operation,
            destination = ?event.destination,
            size = event.size,
            duration_us = event.duration.as_micros() as u64,
            failed = event.error.is_some(),
            "timing"
        );
        self.metrics.observe(event);
        for observer in &self.observers {
            observer.observe(event);
        }
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("observers", &self.observers.len())
            .finish()
    }
}
