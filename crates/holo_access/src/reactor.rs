//! Statement batching reactor.
//!
//! The reactor owns one [`Accumulator`] per destination. `perform` routes a
//! statement through the [`Partitioner`], appends it, and hands back the
//! observation of the batch it joined. A batch is executed as soon as it
//! reaches `max_batch_size`; a periodic tick drains the rest. Every drained
//! batch runs as its own task on the runtime captured by `start`, and its
//! outcome resolves every contributor at once.
//!
//! Lifecycle is `Created -> Started -> Stopped`. `perform` fails fast outside
//! `Started`. `stop` drains every accumulator and waits until all in-flight
//! executions have resolved their observations.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

use crate::accumulator::{Accumulator, DrainedBatch};
use crate::batch::{Batch, BatchResult};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::metrics::{ClientMetrics, Operation, Telemetry, Timer};
use crate::observation::Observation;
use crate::partitioner::Partitioner;
use crate::session::Session;
use crate::types::{Destination, ExecutionInfo, Statement};

/// Lifecycle phase of a [`BatchReactor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    /// Built but not started; `perform` fails with `NotStarted`.
    Created,
    /// Accepting statements and flushing on every tick.
    Started,
    /// `stop` was called; nothing is accepted any more.
    Stopped,
}

impl fmt::Display for ReactorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactorState::Created => f.write_str("created"),
            ReactorState::Started => f.write_str("started"),
            ReactorState::Stopped => f.write_str("stopped"),
        }
    }
}

/// Counts batch executions that have been dispatched but not yet resolved.
#[derive(Default)]
struct Inflight {
    count: AtomicUsize,
    idle: Notify,
}

impl Inflight {
    fn acquire(self: &Arc<Self>) -> InflightPermit {
        self.count.fetch_add(1, Ordering::SeqCst);
        InflightPermit {
            tracker: self.clone(),
        }
    }

    fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.current() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Guard that marks one execution finished on drop.
struct InflightPermit {
    tracker: Arc<Inflight>,
}

impl Drop for InflightPermit {
    fn drop(&mut self) {
        if self.tracker.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

/// Everything a spawned batch execution needs.
#[derive(Clone)]
struct Dispatcher {
    session: Arc<dyn Session>,
    destinations: Arc<[Destination]>,
    telemetry: Telemetry,
    inflight: Arc<Inflight>,
    execution_timeout: Option<Duration>,
    handle: Handle,
}

impl Dispatcher {
    fn dispatch(&self, drained: DrainedBatch) {
        let idx = drained.destination();
        let Some(destination) = self.destinations.get(idx).cloned() else {
            drained.complete(Err(Error::execution(anyhow::anyhow!(
                "destination index {idx} outside topology"
            ))));
            return;
        };
        // Held by both the waiter-side task and the backend execution, so the
        // count only drops once the batch ran and its waiters were resolved.
        let permit = Arc::new(self.inflight.acquire());
        let session = self.session.clone();
        let telemetry = self.telemetry.clone();
        let execution_timeout = self.execution_timeout;
        let handle = self.handle.clone();

        self.handle.spawn(async move {
            let _permit = permit.clone();
            let size = drained.len();
            let timer = Timer::start(Operation::BatchExecute, Some(idx));
            let batch = drained.batch().clone();
            // The backend call runs as its own task: a timeout releases the
            // waiters but never cancels work already handed to the backend.
            let execution = handle.spawn(async move {
                let _permit = permit;
                session.execute_batch(&destination, &batch).await
            });
            let outcome = match execution_timeout {
                Some(after) => match tokio::time::timeout(after, execution).await {
                    Ok(joined) => flatten_execution(joined),
                    Err(_) => Err(Error::Timeout {
                        operation: "batch execution",
                        after,
                    }),
                },
                None => flatten_execution(execution.await),
            };
            let outcome = outcome.map(|info| BatchResult {
                destination: idx,
                statements: size,
                info,
            });

            telemetry.record(&timer.finish(size, outcome.as_ref().err().cloned()));
            if let Err(err) = &outcome {
                tracing::warn!(
                    destination = idx,
                    statements = size,
                    error = %err,
                    "batch execution failed"
                );
            }
            drained.complete(outcome);
        });
    }
}

fn flatten_execution(
    joined: std::result::Result<anyhow::Result<ExecutionInfo>, JoinError>,
) -> Result<ExecutionInfo> {
    match joined {
        Ok(result) => result.map_err(Error::execution),
        Err(err) => Err(Error::execution(anyhow::anyhow!(
            "batch execution task failed: {err}"
        ))),
    }
}

/// State that only exists between `start` and `stop`.
struct Running {
    partitioner: Partitioner,
    accumulators: Vec<Accumulator>,
    dispatcher: Dispatcher,
    shutdown: watch::Sender<bool>,
}

impl Running {
    fn flush_all(&self) -> usize {
        let mut flushed = 0;
        for accumulator in &self.accumulators {
            if let Some(drained) = accumulator.flush() {
                self.dispatcher.dispatch(drained);
                flushed += 1;
            }
        }
        flushed
    }
}

enum Lifecycle {
    Created,
    Started(Arc<Running>),
    Stopped,
}

impl Lifecycle {
    fn state(&self) -> ReactorState {
        match self {
            Lifecycle::Created => ReactorState::Created,
            Lifecycle::Started(_) => ReactorState::Started,
            Lifecycle::Stopped => ReactorState::Stopped,
        }
    }

    fn running(&self) -> Result<&Arc<Running>> {
        match self {
            Lifecycle::Created => Err(Error::NotStarted),
            Lifecycle::Started(running) => Ok(running),
            Lifecycle::Stopped => Err(Error::Stopped),
        }
    }
}

/// Groups statements into per-destination batches and executes them.
pub struct BatchReactor {
    session: Arc<dyn Session>,
    config: ClientConfig,
    telemetry: Telemetry,
    inflight: Arc<Inflight>,
    lifecycle: RwLock<Lifecycle>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    /// Set once the first `stop` has flushed and drained everything.
    stopped: watch::Sender<bool>,
}

impl BatchReactor {
    /// Creates a reactor in the `Created` state with private telemetry.
    pub fn new(session: Arc<dyn Session>, config: ClientConfig) -> Self {
        Self::with_telemetry(session, config, Telemetry::default())
    }

    /// Creates a reactor that reports timings through `telemetry`.
    pub fn with_telemetry(
        session: Arc<dyn Session>,
        config: ClientConfig,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            session,
            config,
            telemetry,
            inflight: Arc::new(Inflight::default()),
            lifecycle: RwLock::new(Lifecycle::Created),
            ticker: Mutex::new(None),
            stopped: watch::channel(false).0,
        }
    }

    fn read_lifecycle(&self) -> RwLockReadGuard<'_, Lifecycle> {
        self.lifecycle
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lifecycle(&self) -> RwLockWriteGuard<'_, Lifecycle> {
        self.lifecycle
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> ReactorState {
        self.read_lifecycle().state()
    }

    /// Configuration the reactor was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Counters fed by batch executions.
    pub fn metrics(&self) -> Arc<ClientMetrics> {
        self.telemetry.metrics()
    }

    /// Destination snapshot taken by `start`.
    pub fn destinations(&self) -> Result<Vec<Destination>> {
        let lifecycle = self.read_lifecycle();
        Ok(lifecycle.running()?.partitioner.destinations().to_vec())
    }

    /// Statements buffered per destination and not yet dispatched.
    pub fn pending(&self) -> Result<Vec<usize>> {
        let lifecycle = self.read_lifecycle();
        Ok(lifecycle
            .running()?
            .accumulators
            .iter()
            .map(Accumulator::len)
            .collect())
    }

    /// Batch executions dispatched and not yet resolved.
    pub fn inflight(&self) -> usize {
        self.inflight.current()
    }

    /// Snapshots the topology, creates accumulators and starts the flush tick.
    ///
    /// Must be called from within a Tokio runtime; batch executions are
    /// spawned on that runtime for the lifetime of the reactor.
    pub async fn start(&self) -> Result<()> {
        match self.state() {
            ReactorState::Created => {}
            ReactorState::Started => return Err(Error::AlreadyStarted),
            ReactorState::Stopped => return Err(Error::Stopped),
        }

        let destinations = self.session.destinations().await?;
        if destinations.is_empty() {
            return Err(Error::EmptyTopology);
        }

        let accumulators = (0..destinations.len())
            .map(|idx| Accumulator::new(idx, self.config.batch_kind, self.config.max_batch_size))
            .collect();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = Handle::current();
        let running = Arc::new(Running {
            partitioner: Partitioner::new(destinations.clone()),
            accumulators,
            dispatcher: Dispatcher {
                session: self.session.clone(),
                destinations: destinations.into(),
                telemetry: self.telemetry.clone(),
                inflight: self.inflight.clone(),
                execution_timeout: self.config.execution_timeout,
                handle: handle.clone(),
            },
            shutdown,
        });

        let mut lifecycle = self.write_lifecycle();
        match &*lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Started(_) => return Err(Error::AlreadyStarted),
            Lifecycle::Stopped => return Err(Error::Stopped),
        }
        let ticker = spawn_ticker(
            &handle,
            Arc::downgrade(&running),
            shutdown_rx,
            self.config.flush_interval,
        );
        tracing::info!(
            destinations = running.accumulators.len(),
            max_batch_size = self.config.max_batch_size,
            flush_interval_ms = self.config.flush_interval.as_millis() as u64,
            batch_kind = %self.config.batch_kind,
            "batch reactor started"
        );
        *lifecycle = Lifecycle::Started(running);
        drop(lifecycle);
        *self
            .ticker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(ticker);
        Ok(())
    }

    /// Routes `statement` to its destination's live batch through `build`.
    ///
    /// The returned observation resolves with the outcome of the whole batch
    /// the statement ended up in.
    pub fn perform<F>(&self, statement: Statement, build: F) -> Result<Observation<BatchResult>>
    where
        F: FnOnce(&mut Batch, Statement) -> Result<()>,
    {
        let lifecycle = self.read_lifecycle();
        let running = lifecycle.running()?;
        let idx = running
            .partitioner
            .partition(self.session.as_ref(), &statement);
        let appended = running.accumulators[idx].append(statement, build)?;
        if let Some(full) = appended.full {
            running.dispatcher.dispatch(full);
        }
        Ok(appended.observation)
    }

    /// [`BatchReactor::perform`] with a plain append.
    pub fn perform_statement(&self, statement: Statement) -> Result<Observation<BatchResult>> {
        self.perform(statement, |batch, statement| {
            batch.add(statement);
            Ok(())
        })
    }

    /// Drains every non-empty accumulator; returns the number of batches
    /// dispatched.
    pub fn flush_all(&self) -> Result<usize> {
        let lifecycle = self.read_lifecycle();
        Ok(lifecycle.running()?.flush_all())
    }

    /// Stops accepting statements, flushes everything buffered and waits for
    /// every dispatched batch to resolve.
    ///
    /// Concurrent or repeated calls all return only after the first one has
    /// finished draining.
    pub async fn stop(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.write_lifecycle(), Lifecycle::Stopped);
        let running = match previous {
            Lifecycle::Started(running) => running,
            Lifecycle::Created => {
                self.stopped.send_replace(true);
                return Ok(());
            }
            Lifecycle::Stopped => {
                let mut stopped = self.stopped.subscribe();
                // The sender lives in `self`, so this only ends on `true`.
                let _ = stopped.wait_for(|done| *done).await;
                return Ok(());
            }
        };

        let _ = running.shutdown.send(true);
        let ticker = self
            .ticker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(ticker) = ticker {
            if let Err(err) = ticker.await {
                tracing::warn!(error = %err, "flush ticker ended abnormally");
            }
        }

        let flushed = running.flush_all();
        self.inflight.wait_idle().await;
        self.stopped.send_replace(true);
        tracing::info!(flushed, "batch reactor stopped");
        Ok(())
    }
}

impl fmt::Debug for BatchReactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchReactor")
            .field("state", &self.state())
            .field("config", &self.config)
            .field("inflight", &self.inflight())
            .finish()
    }
}

fn spawn_ticker(
    handle: &Handle,
    running: Weak<Running>,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
) -> JoinHandle<()> {
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(running) = running.upgrade() else {
                        break;
                    };
                    let flushed = running.flush_all();
                    if flushed > 0 {
                        tracing::trace!(flushed, "flush tick");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
