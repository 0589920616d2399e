//! In-memory [`Session`] used by tests and the workload binary.
//!
//! Reads are served from rows registered per query string and split into
//! pages. Batch writes are recorded instead of applied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;

use crate::batch::{Batch, BatchKind};
use crate::error::Error;
use crate::observation::Observation;
use crate::session::{PreparedStatement, Session};
use crate::types::{Destination, ExecutionInfo, Page, Row, Statement};

const DEFAULT_PAGE_SIZE: usize = 5000;

/// A batch as received by [`MemorySession::execute_batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedBatch {
    pub destination: Destination,
    pub kind: BatchKind,
    pub statements: Vec<Statement>,
}

#[derive(Default)]
struct Inner {
    replicas: HashMap<(String, Bytes), Vec<Destination>>,
    tables: HashMap<String, Vec<Row>>,
    batch_failures: HashMap<Destination, String>,
    page_failures: HashMap<(String, usize), String>,
    executed: Vec<ExecutedBatch>,
    delay: Duration,
}

/// Backend stand-in with a fixed destination list.
pub struct MemorySession {
    destinations: Vec<Destination>,
    page_size: usize,
    inner: Mutex<Inner>,
    next_prepared_id: AtomicU64,
    reads: AtomicUsize,
}

impl MemorySession {
    pub fn new(destinations: Vec<Destination>) -> Self {
        Self {
            destinations,
            page_size: DEFAULT_PAGE_SIZE,
            inner: Mutex::new(Inner::default()),
            next_prepared_id: AtomicU64::new(1),
            reads: AtomicUsize::new(0),
        }
    }

    /// Page size for reads whose statement does not request one.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Declares the replica owners of `routing_key`, primary first.
    pub fn assign_replicas(
        &self,
        keyspace: &str,
        routing_key: impl Into<Bytes>,
        replicas: Vec<Destination>,
    ) {
        self.lock()
            .replicas
            .insert((keyspace.to_string(), routing_key.into()), replicas);
    }

    /// Registers the rows returned for `query`.
    pub fn insert_rows(&self, query: &str, rows: Vec<Row>) {
        self.lock().tables.insert(query.to_string(), rows);
    }

    /// Makes every batch sent to `destination` fail with `message`.
    pub fn fail_batches_on(&self, destination: &Destination, message: &str) {
        self.lock()
            .batch_failures
            .insert(destination.clone(), message.to_string());
    }

    /// Makes page `page` (0-based) of `query` fail with `message`.
    pub fn fail_page(&self, query: &str, page: usize, message: &str) {
        self.lock()
            .page_failures
            .insert((query.to_string(), page), message.to_string());
    }

    pub fn clear_failures(&self) {
        let mut inner = self.lock();
        inner.batch_failures.clear();
        inner.page_failures.clear();
    }

    /// Delays every batch execution by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    /// Batches executed so far, in completion order.
    pub fn executed(&self) -> Vec<ExecutedBatch> {
        self.lock().executed.clone()
    }

    /// Batches executed on `destination`.
    pub fn executed_on(&self, destination: &Destination) -> Vec<ExecutedBatch> {
        self.lock()
            .executed
            .iter()
            .filter(|batch| &batch.destination == destination)
            .cloned()
            .collect()
    }

    /// Number of reads started through [`Session::execute`].
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of statements prepared so far.
    pub fn prepared(&self) -> u64 {
        self.next_prepared_id.load(Ordering::Relaxed) - 1
    }

    fn page_info(&self) -> ExecutionInfo {
        ExecutionInfo {
            coordinator: self.destinations.first().cloned(),
            ..ExecutionInfo::default()
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn destinations(&self) -> anyhow::Result<Vec<Destination>> {
        Ok(self.destinations.clone())
    }

    fn find_replicas(&self, keyspace: &str, routing_key: &[u8]) -> Vec<Destination> {
        self.lock()
            .replicas
            .get(&(keyspace.to_string(), Bytes::copy_from_slice(routing_key)))
            .cloned()
            .unwrap_or_default()
    }

    async fn prepare(&self, keyspace: &str, query: &str) -> anyhow::Result<PreparedStatement> {
        let id = self.next_prepared_id.fetch_add(1, Ordering::Relaxed);
        Ok(PreparedStatement {
            id,
            keyspace: keyspace.to_string(),
            query: query.to_string(),
        })
    }

    fn execute(&self, statement: Statement) -> Observation<Page> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let page_size = statement.page_size().unwrap_or(self.page_size);
        let (rows, failures) = {
            let inner = self.lock();
            let rows = inner
                .tables
                .get(statement.query())
                .cloned()
                .unwrap_or_default();
            let failures: HashMap<usize, String> = inner
                .page_failures
                .iter()
                .filter(|((query, _), _)| query == statement.query())
                .map(|((_, page), message)| (*page, message.clone()))
                .collect();
            (rows, failures)
        };

        let mut chunks: Vec<Vec<Row>> = rows.chunks(page_size).map(<[Row]>::to_vec).collect();
        if chunks.is_empty() {
            chunks.push(Vec::new());
        }

        // Chain from the last page backwards so every page holds its successor.
        let mut next: Option<Observation<Page>> = None;
        for (idx, chunk) in chunks.into_iter().enumerate().rev() {
            let observation = match failures.get(&idx) {
                Some(message) => Observation::failed(Error::execution(anyhow!(message.clone()))),
                None => {
                    let page = match next.take() {
                        Some(successor) => Page::with_next(chunk, self.page_info(), successor),
                        None => Page::last(chunk, self.page_info()),
                    };
                    Observation::resolved(page)
                }
            };
            next = Some(observation);
        }
        next.unwrap_or_else(|| Observation::resolved(Page::last(Vec::new(), self.page_info())))
    }

    async fn execute_batch(
        &self,
        destination: &Destination,
        batch: &Batch,
    ) -> anyhow::Result<ExecutionInfo> {
        let (delay, failure) = {
            let inner = self.lock();
            (inner.delay, inner.batch_failures.get(destination).cloned())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = failure {
            return Err(anyhow!(message));
        }
        self.lock().executed.push(ExecutedBatch {
            destination: destination.clone(),
            kind: batch.kind(),
            statements: batch.statements().to_vec(),
        });
        Ok(ExecutionInfo {
            coordinator: Some(destination.clone()),
            elapsed: delay,
            warnings: Vec::new(),
        })
    }
}
