//! Per-destination statement accumulation.
//!
//! An [`Accumulator`] owns exactly one live [`Batch`] together with the
//! observation every contributor of that batch waits on. Appends and drains
//! take the same mutex, so a drain boundary splits the appended statements
//! cleanly: everything appended before it is in the drained batch, everything
//! after it lands in the fresh one.

use std::sync::{Mutex, MutexGuard};

use crate::batch::{Batch, BatchKind, BatchResult};
use crate::error::Result;
use crate::observation::{Completer, Observation};
use crate::types::Statement;

struct LiveBatch {
    batch: Batch,
    observation: Observation<BatchResult>,
    completer: Completer<BatchResult>,
}

impl LiveBatch {
    fn new(kind: BatchKind) -> Self {
        let (observation, completer) = Observation::pending();
        Self {
            batch: Batch::new(kind),
            observation,
            completer,
        }
    }
}

/// A batch taken out of an accumulator, ready for execution.
///
/// Dropping it without [`DrainedBatch::complete`] fails every waiter with
/// `Error::Abandoned`.
pub struct DrainedBatch {
    destination: usize,
    batch: Batch,
    completer: Completer<BatchResult>,
}

impl DrainedBatch {
    pub fn destination(&self) -> usize {
        self.destination
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Observation shared by every statement in this batch.
    pub fn observation(&self) -> Observation<BatchResult> {
        self.completer.observation()
    }

    /// Stores a successful result on the batch and resolves all waiters.
    pub fn complete(mut self, outcome: Result<BatchResult>) -> Batch {
        if let Ok(result) = &outcome {
            self.batch.set_result(result.clone());
        }
        self.completer.complete(outcome);
        self.batch
    }
}

/// Outcome of one append.
pub struct Appended {
    /// Resolves with the result of the batch the statement joined.
    pub observation: Observation<BatchResult>,
    /// Set when this append filled the batch; the caller must execute it.
    pub full: Option<DrainedBatch>,
}

/// Thread-safe statement buffer for one destination.
pub struct Accumulator {
    destination: usize,
    kind: BatchKind,
    max_size: usize,
    live: Mutex<LiveBatch>,
}

impl Accumulator {
    pub fn new(destination: usize, kind: BatchKind, max_size: usize) -> Self {
        Self {
            destination,
            kind,
            max_size: max_size.max(1),
            live: Mutex::new(LiveBatch::new(kind)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LiveBatch> {
        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn destination(&self) -> usize {
        self.destination
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of statements in the live batch.
    pub fn len(&self) -> usize {
        self.lock().batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds `statement` to the live batch through `build`.
    ///
    /// When `build` fails nothing is appended and the error is returned. When
    /// the batch reaches the size threshold it is drained in the same critical
    /// section and handed back in [`Appended::full`].
    pub fn append<F>(&self, statement: Statement, build: F) -> Result<Appended>
    where
        F: FnOnce(&mut Batch, Statement) -> Result<()>,
    {
        let mut live = self.lock();
        build(&mut live.batch, statement)?;
        let observation = live.observation.clone();
        let full = if live.batch.len() >= self.max_size {
            Some(self.swap(&mut live))
        } else {
            None
        };
        Ok(Appended { observation, full })
    }

    /// Atomically replaces the live batch with an empty one and returns the
    /// previous batch. Returns `None` when there is nothing to execute.
    pub fn flush(&self) -> Option<DrainedBatch> {
        let mut live = self.lock();
        if live.batch.is_empty() {
            return None;
        }
        Some(self.swap(&mut live))
    }

    fn swap(&self, live: &mut LiveBatch) -> DrainedBatch {
        let previous = std::mem::replace(live, LiveBatch::new(self.kind));
        tracing::trace!(
            destination = self.destination,
            statements = previous.batch.len(),
            "batch drained"
        );
        DrainedBatch {
            destination: self.destination,
            batch: previous.batch,
            completer: previous.completer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use crate::error::Error;
    use crate::types::ExecutionInfo;

    fn add(batch: &mut Batch, statement: Statement) -> Result<()> {
        batch.add(statement);
        Ok(())
    }

    fn stmt(query: &str) -> Statement {
        Statement::new("ks", query)
    }

    fn ok_result(drained: &DrainedBatch) -> Result<BatchResult> {
        Ok(BatchResult {
            destination: drained.destination(),
            statements: drained.len(),
            info: ExecutionInfo::default(),
        })
    }

    #[test]
    fn appends_below_threshold_share_one_batch() {
        let acc = Accumulator::new(0, BatchKind::Unlogged, 10);
        let first = acc.append(stmt("a"), add).unwrap();
        let second = acc.append(stmt("b"), add).unwrap();
        assert!(first.full.is_none() && second.full.is_none());
        assert_eq!(first.observation, second.observation);

        let drained = acc.flush().expect("non-empty batch");
        assert_eq!(drained.len(), 2);
        assert!(acc.is_empty());
        assert!(acc.flush().is_none());

        let result = ok_result(&drained);
        let batch = drained.complete(result);
        assert_eq!(batch.result().map(|r| r.statements), Some(2));
        assert_eq!(first.observation.get().unwrap().statements, 2);
        assert_eq!(second.observation.get().unwrap().statements, 2);
    }

    #[test]
    fn reaching_threshold_drains_in_the_same_append() {
        let acc = Accumulator::new(3, BatchKind::Logged, 2);
        let first = acc.append(stmt("a"), add).unwrap();
        let second = acc.append(stmt("b"), add).unwrap();
        let drained = second.full.expect("threshold reached");
        assert_eq!(drained.destination(), 3);
        assert_eq!(drained.batch().kind(), BatchKind::Logged);
        assert_eq!(drained.len(), 2);

        let third = acc.append(stmt("c"), add).unwrap();
        assert_ne!(third.observation, first.observation);
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn threshold_is_at_least_one() {
        let acc = Accumulator::new(0, BatchKind::Unlogged, 0);
        assert_eq!(acc.max_size(), 1);
        let appended = acc.append(stmt("a"), add).unwrap();
        assert_eq!(appended.full.map(|drained| drained.len()), Some(1));
    }

    #[test]
    fn failed_build_appends_nothing() {
        let acc = Accumulator::new(0, BatchKind::Unlogged, 4);
        let result = acc.append(stmt("a"), |_, _| Err(Error::Config("bad".to_string())));
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(acc.is_empty());
    }

    #[test]
    fn failure_reaches_every_waiter() {
        let acc = Accumulator::new(0, BatchKind::Unlogged, 10);
        let a = acc.append(stmt("a"), add).unwrap().observation;
        let b = acc.append(stmt("b"), add).unwrap().observation;
        let drained = acc.flush().unwrap();
        let batch = drained.complete(Err(Error::execution(anyhow::anyhow!("overloaded"))));
        assert!(batch.result().is_none());
        match (a.get(), b.get()) {
            (Err(Error::Execution(x)), Err(Error::Execution(y))) => assert!(Arc::ptr_eq(&x, &y)),
            other => panic!("unexpected outcomes: {other:?}"),
        }
    }

    #[test]
    fn dropped_drained_batch_abandons_waiters() {
        let acc = Accumulator::new(0, BatchKind::Unlogged, 10);
        let waiter = acc.append(stmt("a"), add).unwrap().observation;
        drop(acc.flush());
        assert!(matches!(waiter.get(), Err(Error::Abandoned)));
    }

    #[test]
    fn concurrent_appends_and_flushes_lose_nothing() {
        let acc = Arc::new(Accumulator::new(0, BatchKind::Unlogged, 7));
        let drained = Arc::new(Mutex::new(Vec::<Batch>::new()));

        let mut writers = Vec::new();
        for writer in 0..4 {
            let acc = acc.clone();
            let drained = drained.clone();
            writers.push(std::thread::spawn(move || {
                for i in 0..250 {
                    let appended = acc.append(stmt(&format!("w{writer}-{i}")), add).unwrap();
                    if let Some(full) = appended.full {
                        let result = ok_result(&full);
                        drained.lock().unwrap().push(full.complete(result));
                    }
                }
            }));
        }
        let flusher = {
            let acc = acc.clone();
            let drained = drained.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    if let Some(batch) = acc.flush() {
                        let result = ok_result(&batch);
                        drained.lock().unwrap().push(batch.complete(result));
                    }
                    std::thread::yield_now();
                }
            })
        };
        for writer in writers {
            writer.join().unwrap();
        }
        flusher.join().unwrap();
        if let Some(rest) = acc.flush() {
            let result = ok_result(&rest);
            drained.lock().unwrap().push(rest.complete(result));
        }

        let batches = drained.lock().unwrap();
        let mut seen = HashSet::new();
        for batch in batches.iter() {
            assert!(batch.len() <= 7);
            for statement in batch.statements() {
                assert!(seen.insert(statement.query().to_string()), "duplicate statement");
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
