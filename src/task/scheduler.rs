//! Bounded pool of worker threads executing [`Task`]s.
//!
//! Workers are spawned on demand up to the configured maximum and then kept
//! alive, blocking on a condition variable while the queue is empty. All
//! queue and worker bookkeeping lives behind one mutex, which a worker never
//! holds while a task body runs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use super::{Task, TaskState};
use crate::error::CloudError;
use crate::options::SchedulerOptions;

/// Queue and worker bookkeeping.
///
/// `idle` counts workers blocked on `task_ready`; the remaining
/// `workers - idle` are executing a task or about to pick one up.
struct PoolState {
    pending: VecDeque<Arc<Task>>,
    workers: usize,
    idle: usize,
    shutting_down: bool,
    handles: Vec<JoinHandle<()>>,
    spawned: usize,
}

/// State shared between the scheduler handle, its workers and the tasks
/// submitted to it (tasks hold it weakly to cancel queued work).
pub(super) struct Shared {
    state: Mutex<PoolState>,
    task_ready: Condvar,
    workers_gone: Condvar,
}

impl Shared {
    /// Remove `task` from the pending queue. Returns `false` if it was not
    /// queued.
    pub(super) fn remove_pending(&self, task: &Task) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state
            .pending
            .iter()
            .position(|queued| std::ptr::eq(Arc::as_ptr(queued), task))
        else {
            return false;
        };
        if let Some(removed) = state.pending.remove(pos) {
            removed.set_state(TaskState::Idle);
        }
        true
    }
}

/// Bounded-concurrency executor for load tasks.
pub struct TaskScheduler {
    shared: Arc<Shared>,
    max_workers: usize,
    name_prefix: String,
}

impl TaskScheduler {
    /// Scheduler sized from `options`. No thread is spawned until the first
    /// task is started.
    #[must_use]
    pub fn new(options: &SchedulerOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    pending: VecDeque::new(),
                    workers: 0,
                    idle: 0,
                    shutting_down: false,
                    handles: Vec::new(),
                    spawned: 0,
                }),
                task_ready: Condvar::new(),
                workers_gone: Condvar::new(),
            }),
            max_workers: options.worker_limit(),
            name_prefix: options.thread_name_prefix.clone(),
        }
    }

    /// Scheduler with `max_workers` threads and the default thread names.
    #[must_use]
    pub fn with_max_workers(max_workers: usize) -> Self {
        Self::new(&SchedulerOptions {
            max_worker_threads: max_workers,
            ..SchedulerOptions::default()
        })
    }

    /// Submit `task` for execution.
    ///
    /// Returns `Ok(false)` without doing anything if the task is already
    /// queued or running. Otherwise a new worker is spawned for it when no
    /// worker is idle and the pool is below its limit; else it is appended
    /// to the queue and an idle worker, if any, is woken.
    ///
    /// # Errors
    ///
    /// [`CloudError::SchedulerStopped`] while [`Self::stop_all`] is running,
    /// [`CloudError::ThreadSpawn`] if no worker exists and none could be
    /// spawned.
    pub fn start(&self, task: &Arc<Task>) -> Result<bool, CloudError> {
        let mut state = self.shared.state.lock();
        if state.shutting_down {
            log::warn!("task \"{}\" submitted during shutdown", task.label);
            return Err(CloudError::SchedulerStopped);
        }

        {
            let mut inner = task.inner.lock();
            if inner.state != TaskState::Idle {
                return Ok(false);
            }
            inner.pool = Arc::downgrade(&self.shared);
            inner.state = TaskState::Queued;
        }

        if state.idle == 0 && state.workers < self.max_workers {
            task.set_state(TaskState::Running);
            match self.spawn_worker(&mut state, Arc::clone(task)) {
                Ok(()) => return Ok(true),
                Err(e) if state.workers == 0 => {
                    task.set_state(TaskState::Idle);
                    return Err(CloudError::ThreadSpawn(e));
                }
                Err(e) => {
                    log::warn!("worker spawn failed, queueing instead: {e}");
                    task.set_state(TaskState::Queued);
                }
            }
        }

        state.pending.push_back(Arc::clone(task));
        if state.idle > 0 {
            let _ = self.shared.task_ready.notify_one();
        }
        Ok(true)
    }

    /// Stop every worker and wait for them to exit.
    ///
    /// Queued tasks are dropped from the queue (and return to
    /// [`TaskState::Idle`]); tasks already running are allowed to finish.
    /// The scheduler accepts new tasks again once this returns.
    pub fn stop_all(&self) {
        let handles = {
            let mut state = self.shared.state.lock();
            state.shutting_down = true;
            for task in state.pending.drain(..) {
                task.set_state(TaskState::Idle);
            }
            let _ = self.shared.task_ready.notify_all();
            while state.workers > 0 {
                self.shared.workers_gone.wait(&mut state);
            }
            state.shutting_down = false;
            std::mem::take(&mut state.handles)
        };

        for handle in handles {
            if handle.join().is_err() {
                log::error!("loader worker exited with a panic");
            }
        }
    }

    /// Configured worker limit.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of live worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.shared.state.lock().workers
    }

    /// Number of workers blocked waiting for work.
    #[must_use]
    pub fn idle_workers(&self) -> usize {
        self.shared.state.lock().idle
    }

    /// Number of tasks waiting for a worker.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    fn spawn_worker(
        &self,
        state: &mut PoolState,
        first: Arc<Task>,
    ) -> std::io::Result<()> {
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name(format!("{}-{}", self.name_prefix, state.spawned))
            .spawn(move || worker_loop(&shared, first))?;
        state.spawned += 1;
        state.workers += 1;
        state.handles.push(handle);
        log::debug!("spawned loader worker ({} live)", state.workers);
        Ok(())
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Worker main loop: run the assigned task, then pull from the queue or
/// sleep until woken. Exits when the pool is shutting down.
#[allow(clippy::needless_pass_by_value)]
fn worker_loop(shared: &Shared, first: Arc<Task>) {
    let mut next = Some(first);
    loop {
        if let Some(task) = next.take() {
            task.execute();
        }

        let mut state = shared.state.lock();
        loop {
            if state.shutting_down {
                state.workers -= 1;
                if state.workers == 0 {
                    let _ = shared.workers_gone.notify_all();
                }
                return;
            }
            if let Some(task) = state.pending.pop_front() {
                task.set_state(TaskState::Running);
                next = Some(task);
                break;
            }
            state.idle += 1;
            shared.task_ready.wait(&mut state);
            state.idle -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    /// Body that spins until interrupted, counting iterations.
    fn spinning_task(label: &str, ticks: &Arc<AtomicUsize>) -> Arc<Task> {
        let ticks = Arc::clone(ticks);
        Task::new(label, move |ctx| {
            while !ctx.interrupted() {
                let _ = ticks.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1));
            }
        })
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..2000 {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("condition not reached");
    }

    #[test]
    fn runs_submitted_tasks() {
        let scheduler = TaskScheduler::with_max_workers(2);
        let (tx, rx) = mpsc::channel();
        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let tx = tx.clone();
                Task::new(format!("t{i}"), move |_| {
                    tx.send(i).unwrap();
                })
            })
            .collect();
        for task in &tasks {
            assert!(scheduler.start(task).unwrap());
        }
        let mut seen: Vec<i32> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(scheduler.worker_count() <= 2);
    }

    #[test]
    fn resubmitting_active_task_is_a_no_op() {
        let scheduler = TaskScheduler::with_max_workers(1);
        let ticks = Arc::new(AtomicUsize::new(0));
        let task = spinning_task("spin", &ticks);
        assert!(scheduler.start(&task).unwrap());
        assert!(!scheduler.start(&task).unwrap());
        assert_eq!(scheduler.pending_len(), 0);
        task.interrupt();
        assert_eq!(task.state(), TaskState::Idle);
    }

    #[test]
    fn queues_beyond_worker_limit() {
        let scheduler = TaskScheduler::with_max_workers(1);
        let ticks = Arc::new(AtomicUsize::new(0));
        let busy = spinning_task("busy", &ticks);
        let waiting = spinning_task("waiting", &ticks);
        assert!(scheduler.start(&busy).unwrap());
        assert!(scheduler.start(&waiting).unwrap());
        assert_eq!(scheduler.worker_count(), 1);
        assert_eq!(scheduler.pending_len(), 1);
        assert_eq!(waiting.state(), TaskState::Queued);

        busy.interrupt();
        wait_for(|| waiting.state() == TaskState::Running);
        waiting.interrupt();
        assert_eq!(scheduler.worker_count(), 1);
    }

    #[test]
    fn interrupting_queued_task_removes_it() {
        let scheduler = TaskScheduler::with_max_workers(1);
        let ticks = Arc::new(AtomicUsize::new(0));
        let busy = spinning_task("busy", &ticks);
        let ran = Arc::new(AtomicUsize::new(0));
        let queued = {
            let ran = Arc::clone(&ran);
            Task::new("queued", move |_| {
                let _ = ran.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(scheduler.start(&busy).unwrap());
        assert!(scheduler.start(&queued).unwrap());

        queued.interrupt();
        assert_eq!(queued.state(), TaskState::Idle);
        assert_eq!(scheduler.pending_len(), 0);

        busy.interrupt();
        wait_for(|| scheduler.idle_workers() == 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn no_progress_after_interrupt_returns() {
        let scheduler = TaskScheduler::with_max_workers(1);
        let ticks = Arc::new(AtomicUsize::new(0));
        let task = spinning_task("spin", &ticks);
        assert!(scheduler.start(&task).unwrap());
        wait_for(|| ticks.load(Ordering::SeqCst) > 3);

        task.interrupt();
        let after = ticks.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after);
        assert!(!task.is_active());
    }

    #[test]
    fn interrupting_idle_task_returns_immediately() {
        let task = Task::new("idle", |_| {});
        task.interrupt();
        assert_eq!(task.state(), TaskState::Idle);
    }

    #[test]
    fn idle_worker_picks_up_new_work() {
        let scheduler = TaskScheduler::with_max_workers(1);
        let (tx, rx) = mpsc::channel();
        let first = {
            let tx = tx.clone();
            Task::new("first", move |_| tx.send("first").unwrap())
        };
        let second = Task::new("second", move |_| tx.send("second").unwrap());
        assert!(scheduler.start(&first).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "first");
        wait_for(|| scheduler.idle_workers() == 1);

        assert!(scheduler.start(&second).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "second");
        assert_eq!(scheduler.worker_count(), 1);
    }

    #[test]
    fn stop_all_without_workers_returns() {
        let scheduler = TaskScheduler::with_max_workers(3);
        scheduler.stop_all();
        assert_eq!(scheduler.worker_count(), 0);
    }

    #[test]
    fn stop_all_joins_workers_and_drains_queue() {
        let scheduler = TaskScheduler::with_max_workers(1);
        let (tx, rx) = mpsc::channel::<()>();
        let gate = Arc::new(Mutex::new(rx));
        let blocking = {
            let gate = Arc::clone(&gate);
            Task::new("blocking", move |_| {
                let _ = gate.lock().recv_timeout(Duration::from_secs(5));
            })
        };
        let queued = Task::new("queued", |_| {});
        assert!(scheduler.start(&blocking).unwrap());
        assert!(scheduler.start(&queued).unwrap());

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            tx.send(()).unwrap();
        });
        scheduler.stop_all();
        releaser.join().unwrap();

        assert_eq!(scheduler.worker_count(), 0);
        assert_eq!(scheduler.pending_len(), 0);
        assert_eq!(queued.state(), TaskState::Idle);
        assert_eq!(blocking.state(), TaskState::Idle);

        // Accepts work again after shutdown completes.
        assert!(scheduler.start(&queued).unwrap());
    }

    #[test]
    fn panicking_body_leaves_task_idle() {
        let scheduler = TaskScheduler::with_max_workers(1);
        let task = Task::new("boom", |_| panic!("boom"));
        assert!(scheduler.start(&task).unwrap());
        wait_for(|| !task.is_active());
        task.interrupt();
    }
}
