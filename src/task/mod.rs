//! Cancellable background work.
//!
//! A [`Task`] wraps a re-runnable work body and tracks whether it is idle,
//! queued on a [`TaskScheduler`], or running on one of its workers.
//! Cancellation is cooperative but synchronous: [`Task::interrupt`] does not
//! return until the task is guaranteed not to execute any further, which is
//! what makes it safe to tear down the data a task writes into.

mod scheduler;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
pub use scheduler::TaskScheduler;

/// Lifecycle of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not scheduled anywhere.
    Idle,
    /// Waiting in a scheduler's pending queue.
    Queued,
    /// Executing on a worker thread.
    Running,
    /// Executing, with cancellation requested.
    Interrupted,
}

impl TaskState {
    fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::Interrupted)
    }
}

/// Handle passed to a task body while it executes.
pub struct TaskContext<'a> {
    task: &'a Task,
}

impl TaskContext<'_> {
    /// Whether the body should stop as soon as possible. Long-running bodies
    /// poll this (e.g. once per parsed line) and return early when set.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.task.interrupted()
    }

    /// Label of the executing task.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.task.label
    }
}

type Work = Box<dyn Fn(&TaskContext<'_>) + Send + Sync>;

struct TaskInner {
    state: TaskState,
    /// Scheduler the task was last submitted to.
    pool: Weak<scheduler::Shared>,
}

/// A unit of cancellable, re-runnable background work.
///
/// The body is owned by the task and may run any number of times, once per
/// successful [`TaskScheduler::start`]. At most one execution is in flight at
/// a time.
pub struct Task {
    label: String,
    work: Work,
    inner: Mutex<TaskInner>,
    finished: Condvar,
    interrupted: AtomicBool,
}

impl Task {
    /// Wrap `work` into a schedulable task.
    pub fn new<F>(label: impl Into<String>, work: F) -> Arc<Self>
    where
        F: Fn(&TaskContext<'_>) + Send + Sync + 'static,
    {
        Arc::new(Self {
            label: label.into(),
            work: Box::new(work),
            inner: Mutex::new(TaskInner {
                state: TaskState::Idle,
                pool: Weak::new(),
            }),
            finished: Condvar::new(),
            interrupted: AtomicBool::new(false),
        })
    }

    /// Human-readable label used in logs and thread diagnostics.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Point-in-time lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    /// Whether the task is queued or running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() != TaskState::Idle
    }

    /// Whether cancellation has been requested for the current execution.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Cancel the task and block until it is quiescent.
    ///
    /// A queued task is removed from its scheduler's queue and the call
    /// returns immediately. A running task has its interrupted flag raised
    /// and the caller waits until the body returns. On return the task is
    /// neither queued nor executing.
    ///
    /// Must not be called from inside the task's own body.
    pub fn interrupt(&self) {
        let pool = self.inner.lock().pool.upgrade();
        if let Some(pool) = pool {
            if pool.remove_pending(self) {
                log::debug!("task \"{}\" removed from queue", self.label);
                return;
            }
        }

        let mut inner = self.inner.lock();
        if !inner.state.is_running() {
            return;
        }
        log::debug!("interrupting task \"{}\"", self.label);
        inner.state = TaskState::Interrupted;
        self.interrupted.store(true, Ordering::Release);
        while inner.state.is_running() {
            self.finished.wait(&mut inner);
        }
        self.interrupted.store(false, Ordering::Release);
    }

    /// Run the body once on the calling (worker) thread. The scheduler has
    /// already moved the task to [`TaskState::Running`].
    fn execute(&self) {
        if !self.interrupted() {
            let ctx = TaskContext { task: self };
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| (self.work)(&ctx)));
            if outcome.is_err() {
                log::error!("task \"{}\" panicked", self.label);
            }
        }
        self.set_state(TaskState::Idle);
    }

    fn set_state(&self, state: TaskState) {
        let mut inner = self.inner.lock();
        inner.state = state;
        if !state.is_running() {
            let _ = self.finished.notify_all();
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("label", &self.label)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
