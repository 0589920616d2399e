//! Replica-aware routing of statements to accumulator indices.
//!
//! Routing never fails: a statement whose replicas are unknown, or whose
//! primary replica is not part of the destination snapshot, goes to
//! destination 0 and simply loses its locality benefit.

use std::collections::HashMap;

use crate::session::Session;
use crate::types::{Destination, Statement};

/// Fallback index for statements without usable replica information.
pub const FALLBACK_DESTINATION: usize = 0;

/// Maps statements to indices of a fixed destination snapshot.
#[derive(Debug, Clone)]
pub struct Partitioner {
    destinations: Vec<Destination>,
    positions: HashMap<Destination, usize>,
}

impl Partitioner {
    pub fn new(destinations: Vec<Destination>) -> Self {
        let positions = destinations
            .iter()
            .enumerate()
            .map(|(idx, destination)| (destination.clone(), idx))
            .collect();
        Self {
            destinations,
            positions,
        }
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Destination index for `statement`, using `session` for replica lookup.
    pub fn partition(&self, session: &dyn Session, statement: &Statement) -> usize {
        let replicas = session.find_replicas(statement.keyspace(), statement.routing_key());
        let idx = self.index_for_replicas(&replicas);
        if idx == FALLBACK_DESTINATION && replicas.first() != self.destinations.first() {
            tracing::debug!(
                keyspace = statement.keyspace(),
                replicas = replicas.len(),
                "no routable replica; using fallback destination"
            );
        }
        idx
    }

    /// Index of the first replica, or [`FALLBACK_DESTINATION`].
    pub fn index_for_replicas(&self, replicas: &[Destination]) -> usize {
        replicas
            .first()
            .and_then(|primary| self.positions.get(primary).copied())
            .unwrap_or(FALLBACK_DESTINATION)
    }
}
