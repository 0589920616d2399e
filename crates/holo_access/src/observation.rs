//! Single-resolution asynchronous values.
//!
//! An [`Observation`] is resolved exactly once, by the [`Completer`] it was
//! created with, to either a value or an [`Error`]. Any number of clones may
//! observe it: by registering callbacks, by blocking in [`Observation::get`],
//! or by `.await`ing it (it implements [`Future`]).
//!
//! Callbacks registered before resolution run once, on the resolving thread,
//! after the outcome is stored. Callbacks registered afterwards run
//! immediately on the registering thread. Both paths go through the same mutex,
//! so a concurrent registration is never lost and never runs twice.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tokio::runtime::Handle;

use crate::error::{Error, Result};

type Callback<T> = Box<dyn FnOnce(&Result<T>) + Send + 'static>;

struct State<T> {
    outcome: Option<Result<T>>,
    callbacks: Vec<Callback<T>>,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared handle on a value that becomes available exactly once.
pub struct Observation<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Observation<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Observation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared.lock().outcome {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("Observation").field("state", &state).finish()
    }
}

/// Two handles are equal when they observe the same resolution.
impl<T> PartialEq for Observation<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T> Eq for Observation<T> {}

impl<T> Observation<T>
where
    T: Clone + Send + 'static,
{
    fn new(outcome: Option<Result<T>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    outcome,
                    callbacks: Vec::new(),
                    wakers: Vec::new(),
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Creates an unresolved observation and the completer that settles it.
    pub fn pending() -> (Self, Completer<T>) {
        let observation = Self::new(None);
        let completer = Completer {
            observation: observation.clone(),
            done: false,
        };
        (observation, completer)
    }

    /// Creates an observation that already holds `value`.
    pub fn resolved(value: T) -> Self {
        Self::new(Some(Ok(value)))
    }

    /// Creates an observation that already failed with `err`.
    pub fn failed(err: Error) -> Self {
        Self::new(Some(Err(err)))
    }

    /// Drives `future` on the current Tokio runtime and observes its output.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, like `tokio::spawn`.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self::spawn_on(&Handle::current(), future)
    }

    /// Drives `future` on `handle` and observes its output.
    pub fn spawn_on<F>(handle: &Handle, future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (observation, completer) = Self::pending();
        handle.spawn(async move {
            completer.complete(future.await);
        });
        observation
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.lock().outcome.is_some()
    }

    /// Returns the outcome without waiting, if there is one.
    pub fn peek(&self) -> Option<Result<T>> {
        self.shared.lock().outcome.clone()
    }

    /// Runs `f` with the outcome once it is available.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        let mut state = self.shared.lock();
        match state.outcome.clone() {
            Some(outcome) => {
                drop(state);
                f(&outcome);
            }
            None => state.callbacks.push(Box::new(f)),
        }
    }

    /// Runs `f` with the value if the observation resolves successfully.
    pub fn on_success<F>(&self, f: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.on_complete(move |outcome| {
            if let Ok(value) = outcome {
                f(value);
            }
        });
    }

    /// Runs `f` with the error if the observation fails.
    pub fn on_failure<F>(&self, f: F)
    where
        F: FnOnce(&Error) + Send + 'static,
    {
        self.on_complete(move |outcome| {
            if let Err(err) = outcome {
                f(err);
            }
        });
    }

    /// Chains a transformation; the returned observation resolves with the
    /// output of `f`, or with this observation's error without calling `f`.
    pub fn then<U, F>(&self, f: F) -> Observation<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let (next, completer) = Observation::pending();
        self.on_complete(move |outcome| match outcome {
            Ok(value) => completer.complete(f(value.clone())),
            Err(err) => completer.complete(Err(err.clone())),
        });
        next
    }

    /// Chains an asynchronous step that itself produces an observation.
    pub fn and_then<U, F>(&self, f: F) -> Observation<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Observation<U> + Send + 'static,
    {
        let (next, completer) = Observation::pending();
        self.on_complete(move |outcome| match outcome {
            Ok(value) => {
                let inner = f(value.clone());
                inner.on_complete(move |inner_outcome| completer.complete(inner_outcome.clone()));
            }
            Err(err) => completer.complete(Err(err.clone())),
        });
        next
    }

    /// Blocks the calling thread until the observation resolves.
    ///
    /// Do not call this from a task on a current-thread runtime that is also
    /// responsible for resolving it; use `.await` there instead.
    pub fn get(&self) -> Result<T> {
        let mut state = self.shared.lock();
        loop {
            if let Some(outcome) = state.outcome.as_ref() {
                return outcome.clone();
            }
            state = self
                .shared
                .ready
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Blocks for at most `timeout`; returns `None` if still pending.
    pub fn get_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .ready
            .wait_timeout_while(state, timeout, |state| state.outcome.is_none())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.outcome.clone()
    }

    /// Stores the outcome and notifies every observer. A second call leaves
    /// the stored outcome untouched and reports [`Error::AlreadyResolved`].
    pub(crate) fn settle(&self, outcome: Result<T>) -> Result<()> {
        let (callbacks, wakers) = {
            let mut state = self.shared.lock();
            if state.outcome.is_some() {
                return Err(Error::AlreadyResolved);
            }
            state.outcome = Some(outcome.clone());
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.wakers),
            )
        };
        self.shared.ready.notify_all();
        for callback in callbacks {
            callback(&outcome);
        }
        for waker in wakers {
            waker.wake();
        }
        Ok(())
    }
}

impl<T> Future for Observation<T>
where
    T: Clone,
{
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.lock();
        if let Some(outcome) = state.outcome.as_ref() {
            return Poll::Ready(outcome.clone());
        }
        if !state.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// The single writer of an [`Observation`].
///
/// Dropping a completer without calling [`Completer::complete`] fails the
/// observation with [`Error::Abandoned`].
pub struct Completer<T>
where
    T: Clone + Send + 'static,
{
    observation: Observation<T>,
    done: bool,
}

impl<T> Completer<T>
where
    T: Clone + Send + 'static,
{
    /// Resolves the observation with `outcome`.
    pub fn complete(mut self, outcome: Result<T>) {
        self.done = true;
        if self.observation.settle(outcome).is_err() {
            tracing::warn!("ignored second resolution of an observation");
        }
    }

    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(self, err: Error) {
        self.complete(Err(err));
    }

    /// Handle on the observation this completer resolves.
    pub fn observation(&self) -> Observation<T> {
        self.observation.clone()
    }
}

impl<T> Drop for Completer<T>
where
    T: Clone + Send + 'static,
{
    fn drop(&mut self) {
        if !self.done {
            let _ = self.observation.settle(Err(Error::Abandoned));
        }
    }
}
