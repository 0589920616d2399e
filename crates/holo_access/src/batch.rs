//! Batches of statements executed together as one backend operation.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::Error;
use crate::types::{ExecutionInfo, Statement};

/// Backend batch flavour, chosen by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    /// Atomic across partitions; pays for a batch log write.
    Logged,
    /// No batch log; the usual choice for per-destination grouping.
    #[default]
    Unlogged,
    /// Counter updates only.
    Counter,
}

impl BatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchKind::Logged => "logged",
            BatchKind::Unlogged => "unlogged",
            BatchKind::Counter => "counter",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchKind {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "logged" => Ok(BatchKind::Logged),
            "unlogged" => Ok(BatchKind::Unlogged),
            "counter" => Ok(BatchKind::Counter),
            other => Err(Error::Config(format!("unknown batch kind: {other}"))),
        }
    }
}

/// Outcome shared by every statement that was part of one executed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    /// Destination index the batch was sent to.
    pub destination: usize,
    /// Number of statements in the batch.
    pub statements: usize,
    /// Backend execution metadata.
    pub info: ExecutionInfo,
}

/// Ordered, append-only collection of statements for one destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    kind: BatchKind,
    statements: Vec<Statement>,
    result: Option<BatchResult>,
}

impl Batch {
    pub fn new(kind: BatchKind) -> Self {
        Self {
            kind,
            statements: Vec::new(),
            result: None,
        }
    }

    pub fn add(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Records the backend result once the batch has executed.
    pub fn set_result(&mut self, result: BatchResult) {
        self.result = Some(result);
    }

    pub fn result(&self) -> Option<&BatchResult> {
        self.result.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_kind_parses_case_insensitively() {
        assert_eq!("LOGGED".parse::<BatchKind>().unwrap(), BatchKind::Logged);
        assert_eq!(" counter ".parse::<BatchKind>().unwrap(), BatchKind::Counter);
        assert!(matches!(
            "sometimes".parse::<BatchKind>(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn batch_preserves_append_order() {
        let mut batch = Batch::new(BatchKind::Logged);
        batch.add(Statement::new("ks", "a"));
        batch.add(Statement::new("ks", "b"));
        let queries: Vec<&str> = batch.statements().iter().map(Statement::query).collect();
        assert_eq!(queries, vec!["a", "b"]);
        assert!(batch.result().is_none());

        batch.set_result(BatchResult {
            destination: 1,
            statements: 2,
            info: ExecutionInfo::default(),
        });
        assert_eq!(batch.result().map(|r| r.statements), Some(2));
    }
}
