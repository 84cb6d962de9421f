use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::Sender;
use jod_thread::JoinHandle;

/// A unit of work for the queue. Errors are logged, never propagated.
pub type Task = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

struct QueuedTask {
    label: String,
    task: Task,
}

/// Bookkeeping shared between the queue handle and its worker thread.
struct QueueState {
    /// Tasks enqueued but not yet finished, including the one in flight.
    pending: Mutex<usize>,
    idle: Condvar,
    shutdown: AtomicBool,
}

impl QueueState {
    fn finish_one(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending = pending.saturating_sub(1);

        if *pending == 0 {
            self.idle.notify_all();
        }
    }
}

/// Runs tasks one at a time, strictly in the order they were enqueued.
///
/// Sandbox change notifications arrive faster than they can be reconciled,
/// and reconciling two of them at once can interleave reads and writes of
/// the shadow tree. Every reconciliation goes through this queue so that
/// each one sees the results of all the ones before it.
pub struct ChangeQueue {
    /// Dropped before `job_thread` so that the worker's receive loop ends.
    task_sender: Sender<QueuedTask>,

    state: Arc<QueueState>,

    /// A handle to the worker thread. When dropped, we'll block until the
    /// task in flight, if any, is done.
    ///
    /// Allowed to be unused because dropping this value has side effects.
    #[allow(unused)]
    job_thread: JoinHandle<()>,
}

impl ChangeQueue {
    pub fn start() -> Self {
        let (task_sender, task_receiver) = crossbeam_channel::unbounded::<QueuedTask>();
        let state = Arc::new(QueueState {
            pending: Mutex::new(0),
            idle: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let worker_state = Arc::clone(&state);
        let job_thread = jod_thread::Builder::new()
            .name("ChangeQueue thread".to_owned())
            .spawn(move || {
                log::trace!("ChangeQueue thread started");

                for QueuedTask { label, task } in task_receiver.iter() {
                    if worker_state.shutdown.load(Ordering::SeqCst) {
                        log::trace!("Abandoning queued task: {}", label);
                        worker_state.finish_one();
                        continue;
                    }

                    log::trace!("Running task: {}", label);

                    if let Err(err) = task() {
                        log::error!("Task '{}' failed: {:?}", label, err);
                    }

                    worker_state.finish_one();
                }

                log::trace!("ChangeQueue thread stopped");
            })
            .expect("Could not start ChangeQueue thread");

        Self {
            task_sender,
            state,
            job_thread,
        }
    }

    /// Appends a task to the queue. `label` is only used for logging.
    ///
    /// Tasks enqueued after `shutdown` are dropped without running.
    pub fn enqueue<F>(&self, label: impl Into<String>, task: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let label = label.into();

        if self.is_shut_down() {
            log::debug!("Queue is shut down, dropping task: {}", label);
            return;
        }

        *self.state.pending.lock().unwrap() += 1;

        let queued = QueuedTask {
            label,
            task: Box::new(task),
        };

        if let Err(err) = self.task_sender.send(queued) {
            log::debug!("ChangeQueue thread is gone, dropping task: {}", err.0.label);
            self.state.finish_one();
        }
    }

    /// True when no task is waiting or running.
    pub fn is_idle(&self) -> bool {
        *self.state.pending.lock().unwrap() == 0
    }

    /// Blocks until the queue is idle or `timeout` passes. Returns whether
    /// the queue went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.state.pending.lock().unwrap();

        while *pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            let (guard, _) = self
                .state
                .idle
                .wait_timeout(pending, deadline - now)
                .unwrap();
            pending = guard;
        }

        true
    }

    /// Abandons every task that hasn't started yet. The task in flight, if
    /// any, still runs to completion.
    pub fn shutdown(&self) {
        if !self.state.shutdown.swap(true, Ordering::SeqCst) {
            log::debug!("ChangeQueue shutting down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.shutdown.load(Ordering::SeqCst)
    }
}

impl Drop for ChangeQueue {
    fn drop(&mut self) {
        self.shutdown();

        // After this function ends, the sender is dropped and the job thread
        // is joined once it skips through whatever is left in the channel.
    }
}
