//! Backend collaborator boundary.
//!
//! The client layer never talks to the network itself. Everything it needs
//! from the cluster goes through [`Session`]: topology, replica lookup,
//! statement preparation, paged single-statement reads and batch writes.

use async_trait::async_trait;

use crate::batch::Batch;
use crate::observation::Observation;
use crate::types::{Destination, ExecutionInfo, Page, Statement, Value};

/// A statement the backend has parsed and cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    pub id: u64,
    pub keyspace: String,
    pub query: String,
}

impl PreparedStatement {
    /// Binds values, producing a routable statement.
    pub fn bind(&self, values: Vec<Value>, routing_key: impl Into<bytes::Bytes>) -> Statement {
        Statement::new(self.keyspace.clone(), self.query.clone())
            .bind(values)
            .with_routing_key(routing_key)
    }
}

/// Connection to the replicated backend.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Current destination list. Indices into this list are accumulator ids.
    async fn destinations(&self) -> anyhow::Result<Vec<Destination>>;

    /// Replica owners for a routing key, primary first. Empty when unknown.
    fn find_replicas(&self, keyspace: &str, routing_key: &[u8]) -> Vec<Destination>;

    /// Parses `query` server-side.
    async fn prepare(&self, keyspace: &str, query: &str) -> anyhow::Result<PreparedStatement>;

    /// Starts a paged read; the observation yields the first page.
    fn execute(&self, statement: Statement) -> Observation<Page>;

    /// Executes every statement of `batch` as one operation on `destination`.
    async fn execute_batch(
        &self,
        destination: &Destination,
        batch: &Batch,
    ) -> anyhow::Result<ExecutionInfo>;
}
