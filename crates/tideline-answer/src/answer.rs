//! The `Answer` state machine.
//!
//! One non-terminal state (pending) and three terminal ones: completed,
//! failed, offline. Observers registered while pending are held in a list
//! and flushed, in registration order, on the thread that resolves the
//! answer; observers registered after a terminal state fire synchronously on
//! the registering thread. Callbacks always run outside the internal lock,
//! so they may register further observers or chain new answers freely.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::error::CommandError;

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Outcome<T> {
    Completed(T),
    Failed(CommandError),
    Offline,
}

type TerminalObserver<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

enum State<T> {
    Pending {
        observers: Vec<TerminalObserver<T>>,
        wakers: Vec<Waker>,
    },
    Done(Arc<Outcome<T>>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    cv: Condvar,
}

fn lock_state<T>(shared: &Shared<T>) -> MutexGuard<'_, State<T>> {
    // Observers run outside the lock, so a panic can only poison a guard
    // that was mid-read; the state itself is always structurally sound.
    shared.state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// First resolution wins; anything later is ignored.
fn resolve<T>(shared: &Shared<T>, outcome: Outcome<T>) {
    let outcome = Arc::new(outcome);
    let (observers, wakers) = {
        let mut state = lock_state(shared);
        match &mut *state {
            State::Pending { observers, wakers } => {
                let flushed = (std::mem::take(observers), std::mem::take(wakers));
                *state = State::Done(Arc::clone(&outcome));
                flushed
            }
            State::Done(_) => return,
        }
    };
    shared.cv.notify_all();
    for waker in wakers {
        waker.wake();
    }
    for observer in observers {
        observer(&outcome);
    }
}

// ---------------------------------------------------------------------------
// Answer
// ---------------------------------------------------------------------------

/// Handle to a deferred command result. Cloning shares the same underlying
/// state; a pre-resolved answer is indistinguishable from one resolved
/// later except by timing.
pub struct Answer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Answer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Answer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match &*lock_state(&self.shared) {
            State::Pending { .. } => "pending",
            State::Done(outcome) => match outcome.as_ref() {
                Outcome::Completed(_) => "completed",
                Outcome::Failed(_) => "failed",
                Outcome::Offline => "offline",
            },
        };
        write!(f, "Answer({label})")
    }
}

impl<T> Answer<T> {
    fn with_state(state: State<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                cv: Condvar::new(),
            }),
        }
    }

    /// Already-completed answer.
    pub fn resolved(value: T) -> Self {
        Self::with_state(State::Done(Arc::new(Outcome::Completed(value))))
    }

    /// Already-offline answer.
    pub fn offline() -> Self {
        Self::with_state(State::Done(Arc::new(Outcome::Offline)))
    }

    /// Already-failed answer.
    pub fn failed(error: CommandError) -> Self {
        Self::with_state(State::Done(Arc::new(Outcome::Failed(error))))
    }

    /// Pending answer backed by later work. Dropping the resolver without
    /// resolving fails the answer with the cancelled category, so waiters
    /// are always released.
    pub fn deferred() -> (Self, Resolver<T>) {
        let answer = Self::with_state(State::Pending {
            observers: Vec::new(),
            wakers: Vec::new(),
        });
        let resolver = Resolver {
            shared: Arc::clone(&answer.shared),
        };
        (answer, resolver)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(&*lock_state(&self.shared), State::Done(_))
    }

    fn observe(&self, f: TerminalObserver<T>) {
        let outcome = {
            let mut state = lock_state(&self.shared);
            match &mut *state {
                State::Pending { observers, .. } => {
                    observers.push(f);
                    return;
                }
                State::Done(outcome) => Arc::clone(outcome),
            }
        };
        f(&outcome);
    }
}

impl<T: Clone + Send + 'static> Answer<T> {
    /// Observe a completed value. On an already-completed answer the
    /// callback fires synchronously before this call returns.
    pub fn when_completed(&self, f: impl FnOnce(T) + Send + 'static) -> &Self {
        self.observe(Box::new(move |outcome| {
            if let Outcome::Completed(value) = outcome {
                f(value.clone());
            }
        }));
        self
    }

    /// Observe a failure. Never fires for offline.
    pub fn when_server_error(&self, f: impl FnOnce(CommandError) + Send + 'static) -> &Self {
        self.observe(Box::new(move |outcome| {
            if let Outcome::Failed(error) = outcome {
                f(error.clone());
            }
        }));
        self
    }

    /// Observe the offline state. Never fires for completion or failure.
    pub fn when_offline(&self, f: impl FnOnce() + Send + 'static) -> &Self {
        self.observe(Box::new(move |outcome| {
            if let Outcome::Offline = outcome {
                f();
            }
        }));
        self
    }

    /// Transform the success value; failed and offline pass through.
    pub fn map<U, F>(&self, f: F) -> Answer<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (next, resolver) = Answer::deferred();
        self.observe(Box::new(move |outcome| match outcome {
            Outcome::Completed(value) => resolver.complete(f(value.clone())),
            Outcome::Failed(error) => resolver.fail(error.clone()),
            Outcome::Offline => resolver.offline(),
        }));
        next
    }

    /// Chain a dependent asynchronous stage. Failure or offline in either
    /// stage short-circuits into the result.
    pub fn and_then<U, F>(&self, f: F) -> Answer<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Answer<U> + Send + 'static,
    {
        let (next, resolver) = Answer::deferred();
        self.observe(Box::new(move |outcome| match outcome {
            Outcome::Completed(value) => {
                f(value.clone()).observe(Box::new(move |second| match second {
                    Outcome::Completed(value) => resolver.complete(value.clone()),
                    Outcome::Failed(error) => resolver.fail(error.clone()),
                    Outcome::Offline => resolver.offline(),
                }));
            }
            Outcome::Failed(error) => resolver.fail(error.clone()),
            Outcome::Offline => resolver.offline(),
        }));
        next
    }

    /// Block the calling thread until terminal or the timeout elapses.
    ///
    /// Completed gives `Ok(Some(value))`; offline gives `Ok(None)` — the
    /// designated empty value, never an error; a failure returns the
    /// carried error; running out the timeout returns a timeout-category
    /// error.
    pub fn blocking_get(&self, timeout: Duration) -> Result<Option<T>, CommandError> {
        let deadline = Instant::now() + timeout;
        let mut state = lock_state(&self.shared);
        loop {
            if let State::Done(outcome) = &*state {
                return match outcome.as_ref() {
                    Outcome::Completed(value) => Ok(Some(value.clone())),
                    Outcome::Offline => Ok(None),
                    Outcome::Failed(error) => Err(error.clone()),
                };
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CommandError::timeout(format!(
                    "no result within {timeout:?}"
                )));
            }
            let waited = self.shared.cv.wait_timeout(state, deadline - now);
            let (guard, _timed_out) = waited.unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }
}

impl<T: Clone> Future for Answer<T> {
    type Output = Result<Option<T>, CommandError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = lock_state(&self.shared);
        match &mut *state {
            State::Done(outcome) => Poll::Ready(match outcome.as_ref() {
                Outcome::Completed(value) => Ok(Some(value.clone())),
                Outcome::Offline => Ok(None),
                Outcome::Failed(error) => Err(error.clone()),
            }),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Write side of a deferred [`Answer`]. Single-use: resolving consumes it.
pub struct Resolver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Resolver<T> {
    pub fn complete(self, value: T) {
        resolve(&self.shared, Outcome::Completed(value));
    }

    pub fn fail(self, error: CommandError) {
        resolve(&self.shared, Outcome::Failed(error));
    }

    pub fn offline(self) {
        resolve(&self.shared, Outcome::Offline);
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        // No-op when already resolved: first resolution wins.
        resolve(
            &self.shared,
            Outcome::Failed(CommandError::cancelled("resolver dropped before result")),
        );
    }
}

impl<T> std::fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Resolver")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
