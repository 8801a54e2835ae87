//! One unit of work per document, with cancel-on-first-error.
//!
//! A [`TaskGroup`] runs closures on the rayon pool and collects every error
//! they return. The first failure fires the group's [`CancelToken`]; units that
//! have not started yet are skipped, and units already running see the token
//! at their own checkpoints (I/O boundaries, the hand-off to the collector)
//! and stop there. Nothing is interrupted forcibly.
//!
//! ```text
//!            spawn ×N               wait()                  all returned
//! Running ───────────────▶ Draining ─────────────────▶ Done ──▶ errors handed out
//!    │  first Err ─▶ cancel (once)                           state reset
//! ```
//!
//! [`TaskGroup::wait`] blocks until every spawned unit returned, then hands
//! back all collected errors (in completion order) and resets the group so
//! it can run another phase.
//!
//! A unit that panics is reported as an error like any other: the payload is
//! turned into a [`TaskPanic`] and converted into the group's error type.

use crossbeam_channel::{Receiver, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use thiserror::Error;

/// Cooperative cancellation signal shared by a group's units.
///
/// Cancelling disconnects [`done`](Self::done), so a blocked channel
/// operation can race against it in `crossbeam_channel::select!`.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug)]
struct CancelInner {
    cancelled: AtomicBool,
    // Never sent on; dropping it is the signal.
    trigger: Mutex<Option<Sender<()>>>,
    done: Receiver<()>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, done) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                done,
            }),
        }
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that becomes ready (disconnected) once cancelled.
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.done
    }
}

/// A unit of work panicked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("worker panicked: {message}")]
pub struct TaskPanic {
    pub message: String,
}

impl TaskPanic {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self { message }
    }
}

/// Lifecycle of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// Units are outstanding and nobody is waiting yet.
    Running,
    /// `wait` has been called and units are still finishing.
    Draining,
    /// No units outstanding.
    Done,
}

/// Runs units of work and aggregates their errors.
pub struct TaskGroup<E> {
    shared: Arc<Shared<E>>,
    pool: Option<Arc<rayon::ThreadPool>>,
}

struct Shared<E> {
    outstanding: Mutex<usize>,
    idle: Condvar,
    errors: Mutex<Vec<E>>,
    cancel: Mutex<CancelToken>,
    waiting: AtomicBool,
}

impl<E> Shared<E> {
    fn fail(&self, error: E) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
        if self.token().cancel() {
            tracing::debug!("first failure, cancelling remaining work");
        }
    }

    fn token(&self) -> CancelToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn finish_one(&self) {
        let mut outstanding = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *outstanding -= 1;
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }
}

impl<E: Send + From<TaskPanic> + 'static> Default for TaskGroup<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send + From<TaskPanic> + 'static> TaskGroup<E> {
    /// A group running on the global rayon pool.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                outstanding: Mutex::new(0),
                idle: Condvar::new(),
                errors: Mutex::new(Vec::new()),
                cancel: Mutex::new(CancelToken::new()),
                waiting: AtomicBool::new(false),
            }),
            pool: None,
        }
    }

    /// A group running on its own pool.
    pub fn with_pool(pool: Arc<rayon::ThreadPool>) -> Self {
        Self {
            pool: Some(pool),
            ..Self::new()
        }
    }

    /// The token units of the current phase observe.
    pub fn cancel_token(&self) -> CancelToken {
        self.shared.token()
    }

    /// Start `unit` concurrently.
    ///
    /// The unit is skipped entirely if the group is cancelled by the time a
    /// worker thread picks it up.
    pub fn spawn<F>(&self, unit: F)
    where
        F: FnOnce(&CancelToken) -> Result<(), E> + Send + 'static,
    {
        *self
            .shared
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;

        let shared = Arc::clone(&self.shared);
        let token = shared.token();
        let job = move || {
            if token.is_cancelled() {
                tracing::trace!("group cancelled, skipping unit");
            } else {
                let result = panic::catch_unwind(AssertUnwindSafe(|| unit(&token)))
                    .unwrap_or_else(|payload| Err(E::from(TaskPanic::from_payload(payload))));
                if let Err(error) = result {
                    shared.fail(error);
                }
            }
            shared.finish_one();
        };
        match &self.pool {
            Some(pool) => pool.spawn(job),
            None => rayon::spawn(job),
        }
    }

    /// Block until every spawned unit returned, then take all errors.
    ///
    /// Must not be called from inside one of the group's own units.
    pub fn wait(&self) -> Vec<E> {
        self.shared.waiting.store(true, Ordering::SeqCst);
        {
            let mut outstanding = self
                .shared
                .outstanding
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            while *outstanding > 0 {
                outstanding = self
                    .shared
                    .idle
                    .wait(outstanding)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        let errors = std::mem::take(
            &mut *self
                .shared
                .errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let mut cancel = self
            .shared
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if cancel.is_cancelled() {
            *cancel = CancelToken::new();
        }
        self.shared.waiting.store(false, Ordering::SeqCst);
        errors
    }

    pub fn state(&self) -> GroupState {
        let outstanding = *self
            .shared
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if outstanding == 0 {
            GroupState::Done
        } else if self.shared.waiting.load(Ordering::SeqCst) {
            GroupState::Draining
        } else {
            GroupState::Running
        }
    }
}
