//! Core data model: values, rows, statements, destinations and pages.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::observation::Observation;

/// One column value as seen by the client layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Blob(Bytes),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Serialized form used when this value is part of a routing key.
    pub fn routing_bytes(&self) -> Bytes {
        match self {
            Value::Null => Bytes::new(),
            Value::Bool(v) => Bytes::copy_from_slice(&[u8::from(*v)]),
            Value::Int(v) | Value::Timestamp(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            Value::Text(v) => Bytes::copy_from_slice(v.as_bytes()),
            Value::Blob(v) => v.clone(),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Blob(v)
    }
}

/// Access to the values of named columns, used by chunking and reduction.
pub trait KeyedRow {
    /// Projects `keys` in order; absent columns project to [`Value::Null`].
    fn key_values(&self, keys: &[String]) -> Vec<Value>;
}

/// An ordered set of named column values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter; replaces an existing column of the same name.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Sets `column`, replacing any previous value.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((column, value)),
        }
    }

    /// Value of `column`, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Columns in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Values of `keys` in order; absent columns project to [`Value::Null`].
    pub fn project(&self, keys: &[String]) -> Vec<Value> {
        keys.iter()
            .map(|key| self.get(key).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

impl KeyedRow for Row {
    fn key_values(&self, keys: &[String]) -> Vec<Value> {
        self.project(keys)
    }
}

/// A row paired with the execution metadata of the page it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub row: Row,
    pub info: Arc<ExecutionInfo>,
}

impl KeyedRow for Record {
    fn key_values(&self, keys: &[String]) -> Vec<Value> {
        self.row.key_values(keys)
    }
}

/// A target host/shard that a batch can be sent to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Destination {
    /// Stable node identifier.
    pub node_id: u64,
    /// Network address of the node.
    pub address: String,
}

impl Destination {
    /// Creates a destination for `node_id` reachable at `address`.
    pub fn new(node_id: u64, address: impl Into<String>) -> Self {
        Self {
            node_id,
            address: address.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.node_id, self.address)
    }
}

/// An immutable unit of work bound for one keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    keyspace: String,
    query: String,
    values: Vec<Value>,
    routing_key: Bytes,
    page_size: Option<usize>,
}

impl Statement {
    /// Creates an unbound, unrouted statement.
    pub fn new(keyspace: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            query: query.into(),
            values: Vec::new(),
            routing_key: Bytes::new(),
            page_size: None,
        }
    }

    /// Returns a copy bound to `values`.
    pub fn bind(self, values: Vec<Value>) -> Self {
        Self { values, ..self }
    }

    /// Returns a copy routed by `routing_key`.
    pub fn with_routing_key(self, routing_key: impl Into<Bytes>) -> Self {
        Self {
            routing_key: routing_key.into(),
            ..self
        }
    }

    /// Returns a copy that requests `page_size` rows per page on reads.
    pub fn with_page_size(self, page_size: usize) -> Self {
        Self {
            page_size: Some(page_size.max(1)),
            ..self
        }
    }

    /// Keyspace the statement targets.
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// Query text.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Bound values, in placeholder order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Serialized partition key used for replica lookup; empty when unrouted.
    pub fn routing_key(&self) -> &Bytes {
        &self.routing_key
    }

    /// Rows per page requested for reads, if set.
    pub fn page_size(&self) -> Option<usize> {
        self.page_size
    }
}

/// Execution metadata returned by the backend for a page or a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionInfo {
    /// Node that coordinated the request.
    pub coordinator: Option<Destination>,
    /// Server-side execution time.
    pub elapsed: Duration,
    /// Warnings attached to the response.
    pub warnings: Vec<String>,
}

/// One chunk of a paginated read plus a handle on the next chunk.
#[derive(Debug, Clone)]
pub struct Page {
    /// Rows carried by this page.
    pub rows: Vec<Row>,
    /// Metadata of the request that produced this page.
    pub info: ExecutionInfo,
    next: Option<Observation<Page>>,
}

impl Page {
    /// Final page of a result.
    pub fn last(rows: Vec<Row>, info: ExecutionInfo) -> Self {
        Self {
            rows,
            info,
            next: None,
        }
    }

    /// Page followed by the page that `next` resolves to.
    pub fn with_next(rows: Vec<Row>, info: ExecutionInfo, next: Observation<Page>) -> Self {
        Self {
            rows,
            info,
            next: Some(next),
        }
    }

    /// Returns `true` when no page follows this one.
    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }

    /// Observation of the following page.
    pub fn next_page(&self) -> Option<&Observation<Page>> {
        self.next.as_ref()
    }

    pub(crate) fn into_parts(self) -> (Vec<Row>, ExecutionInfo, Option<Observation<Page>>) {
        (self.rows, self.info, self.next)
    }
}

/// Key layout of a table; used to validate and route saves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub keyspace: String,
    pub name: String,
    pub partition_key: Vec<String>,
    pub clustering_key: Vec<String>,
}

impl TableSchema {
    pub fn new(
        keyspace: impl Into<String>,
        name: impl Into<String>,
        partition_key: Vec<String>,
        clustering_key: Vec<String>,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            name: name.into(),
            partition_key,
            clustering_key,
        }
    }

    /// Partition key columns followed by clustering columns.
    pub fn primary_key(&self) -> impl Iterator<Item = &String> {
        self.partition_key.iter().chain(self.clustering_key.iter())
    }

    /// Builds the insert for `row`, rejecting rows with absent or null key parts.
    pub fn insert_statement(&self, row: &Row) -> Result<Statement> {
        let missing: Vec<String> = self
            .primary_key()
            .filter(|column| row.get(column).map_or(true, Value::is_null))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingKeyParts {
                table: self.name.clone(),
                columns: missing,
            });
        }

        let columns: Vec<&str> = row.columns().map(|(name, _)| name).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let query = format!(
            "INSERT INTO {}.{} ({}) VALUES ({})",
            self.keyspace,
            self.name,
            columns.join(", "),
            placeholders
        );
        let values = row.columns().map(|(_, value)| value.clone()).collect();
        Ok(Statement::new(self.keyspace.clone(), query)
            .bind(values)
            .with_routing_key(self.routing_key(row)?))
    }

    /// Routing key for `row`: the single partition value, or the composite
    /// `[len:u16][bytes][0]` encoding when the partition key has several parts.
    ///
    /// A composite component longer than `u16::MAX` bytes is rejected.
    pub fn routing_key(&self, row: &Row) -> Result<Bytes> {
        let parts: Vec<(&String, Bytes)> = self
            .partition_key
            .iter()
            .map(|column| {
                let bytes = row.get(column).map(Value::routing_bytes).unwrap_or_default();
                (column, bytes)
            })
            .collect();
        if parts.len() == 1 {
            return Ok(parts.into_iter().next().map(|(_, bytes)| bytes).unwrap_or_default());
        }
        let mut buf = BytesMut::new();
        for (column, part) in parts {
            let len = u16::try_from(part.len()).map_err(|_| Error::KeyPartTooLong {
                table: self.name.clone(),
                column: column.clone(),
                len: part.len(),
            })?;
            buf.put_u16(len);
            buf.put_slice(&part);
            buf.put_u8(0);
        }
        Ok(buf.freeze())
    }
}
