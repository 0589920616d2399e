//! Client-side data access for a partitioned, replicated column store.
//!
//! Two parts do the real work:
//!
//! * [`BatchReactor`] groups outgoing writes into one batch per destination,
//!   chosen by replica ownership, and executes each batch asynchronously.
//!   Every caller gets an [`Observation`] that resolves exactly once with the
//!   outcome of the batch its statement ended up in.
//! * [`pipeline`] turns a paged read into a lazy sequence and composes
//!   chunking, reduction, deduplication, filtering, limiting and
//!   concatenation on top of it.
//!
//! The backend itself sits behind the [`Session`] trait.
//! [`memory::MemorySession`] is an in-process implementation for tests and
//! the workload binary.

pub mod accumulator;
pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod observation;
pub mod partitioner;
pub mod pipeline;
pub mod reactor;
pub mod session;
pub mod types;

pub use batch::{Batch, BatchKind, BatchResult};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use metrics::{ClientMetrics, ClientMetricsSnapshot, TimingEvent, TimingObserver};
pub use observation::{Completer, Observation};
pub use partitioner::Partitioner;
pub use reactor::{BatchReactor, ReactorState};
pub use session::{PreparedStatement, Session};
pub use types::{
    Destination, ExecutionInfo, KeyedRow, Page, Record, Row, Statement, TableSchema, Value,
};
