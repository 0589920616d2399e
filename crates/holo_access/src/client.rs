//! Explicitly owned client context.
//!
//! A [`Client`] bundles the session, the batching reactor, telemetry and the
//! prepared-statement cache. Nothing here is process-global: dropping or
//! shutting down a client releases everything it owns.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::batch::{Batch, BatchResult};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::metrics::{ClientMetrics, Telemetry};
use crate::observation::Observation;
use crate::pipeline::{to_record, RecordPaginator, ResultPaginator};
use crate::reactor::{BatchReactor, ReactorState};
use crate::session::{PreparedStatement, Session};
use crate::types::{ExecutionInfo, Page, Record, Row, Statement, TableSchema};

type PreparedKey = (String, String);

/// Reads, batched writes and prepared statements over one session.
pub struct Client {
    session: Arc<dyn Session>,
    config: ClientConfig,
    telemetry: Telemetry,
    reactor: BatchReactor,
    prepared: Mutex<HashMap<PreparedKey, PreparedStatement>>,
}

impl Client {
    /// Builds a client on `session` and starts its reactor.
    pub async fn connect(session: Arc<dyn Session>, config: ClientConfig) -> Result<Self> {
        Self::connect_with_telemetry(session, config, Telemetry::default()).await
    }

    pub async fn connect_with_telemetry(
        session: Arc<dyn Session>,
        config: ClientConfig,
        telemetry: Telemetry,
    ) -> Result<Self> {
        let reactor =
            BatchReactor::with_telemetry(session.clone(), config.clone(), telemetry.clone());
        reactor.start().await?;
        Ok(Self {
            session,
            config,
            telemetry,
            reactor,
            prepared: Mutex::new(HashMap::new()),
        })
    }

    fn prepared_cache(&self) -> MutexGuard<'_, HashMap<PreparedKey, PreparedStatement>> {
        self.prepared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_open(&self) -> Result<()> {
        match self.reactor.state() {
            ReactorState::Stopped => Err(Error::Stopped),
            _ => Ok(()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn reactor(&self) -> &BatchReactor {
        &self.reactor
    }

    pub fn metrics(&self) -> Arc<ClientMetrics> {
        self.telemetry.metrics()
    }

    /// Starts a paged read; the observation yields the first page.
    pub fn execute(&self, statement: Statement) -> Observation<Page> {
        if let Err(err) = self.ensure_open() {
            return Observation::failed(err);
        }
        let statement = match statement.page_size() {
            Some(_) => statement,
            None => statement.with_page_size(self.config.page_size),
        };
        self.session.execute(statement)
    }

    /// Lazy read that maps every row through `on_page`.
    pub fn query<F, T>(&self, statement: Statement, on_page: F) -> ResultPaginator<F>
    where
        F: FnMut(Row, &Arc<ExecutionInfo>) -> T,
    {
        ResultPaginator::new(self.execute(statement), on_page).with_telemetry(self.telemetry.clone())
    }

    /// Lazy read yielding rows with their page metadata.
    pub fn rows(&self, statement: Statement) -> RecordPaginator {
        let on_page: fn(Row, &Arc<ExecutionInfo>) -> Record = to_record;
        self.query(statement, on_page)
    }

    /// Prepares `query`, reusing an earlier preparation of the same text.
    pub async fn prepare(&self, keyspace: &str, query: &str) -> Result<PreparedStatement> {
        self.ensure_open()?;
        let key = (keyspace.to_string(), query.to_string());
        if let Some(prepared) = self.prepared_cache().get(&key) {
            return Ok(prepared.clone());
        }
        let prepared = self.session.prepare(keyspace, query).await?;
        let prepared = self
            .prepared_cache()
            .entry(key)
            .or_insert(prepared)
            .clone();
        Ok(prepared)
    }

    /// Number of cached prepared statements.
    pub fn prepared_len(&self) -> usize {
        self.prepared_cache().len()
    }

    /// Batches a write through the reactor.
    pub fn perform<F>(&self, statement: Statement, build: F) -> Result<Observation<BatchResult>>
    where
        F: FnOnce(&mut Batch, Statement) -> Result<()>,
    {
        self.reactor.perform(statement, build)
    }

    /// Validates the primary key of `row` and batches its insert.
    pub fn save(&self, table: &TableSchema, row: &Row) -> Result<Observation<BatchResult>> {
        self.ensure_open()?;
        let statement = table.insert_statement(row)?;
        self.reactor.perform_statement(statement)
    }

    /// Stops the reactor, flushing buffered writes, and drops cached state.
    pub async fn shutdown(&self) -> Result<()> {
        self.reactor.stop().await?;
        self.prepared_cache().clear();
        Ok(())
    }
}
