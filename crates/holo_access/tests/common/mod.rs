//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use holo_access::memory::MemorySession;
use holo_access::{ClientConfig, Destination, Row, Statement, TimingEvent, TimingObserver};

pub const KEYSPACE: &str = "app";

/// Upper bound for any single wait in these tests.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn h0() -> Destination {
    Destination::new(1, "h0")
}

pub fn h1() -> Destination {
    Destination::new(2, "h1")
}

/// Two-host session where routing key `k0` lives on h0 and `k1` on h1.
pub fn two_host_session() -> Arc<MemorySession> {
    let session = Arc::new(MemorySession::new(vec![h0(), h1()]));
    session.assign_replicas(KEYSPACE, &b"k0"[..], vec![h0(), h1()]);
    session.assign_replicas(KEYSPACE, &b"k1"[..], vec![h1(), h0()]);
    session
}

/// Config whose flush tick never fires during a test.
pub fn batching_config(max_batch_size: usize) -> ClientConfig {
    ClientConfig {
        max_batch_size,
        flush_interval: Duration::from_secs(3600),
        ..ClientConfig::default()
    }
}

pub fn write(key: &'static str, tag: &str) -> Statement {
    Statement::new(KEYSPACE, format!("INSERT {tag}")).with_routing_key(key.as_bytes())
}

pub fn numbered_rows(column: &str, values: &[&str]) -> Vec<Row> {
    values
        .iter()
        .enumerate()
        .map(|(idx, value)| Row::new().with(column, *value).with("n", idx as i64))
        .collect()
}

/// Timing observer that keeps every event.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<TimingEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<TimingEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl TimingObserver for RecordingObserver {
    fn observe(&self, event: &TimingEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
