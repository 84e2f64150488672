//! Elastic thread pool

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ExecutorConfig;
use crate::error::Result;

type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    /// Address of the pool the current thread works for, 0 if none
    static WORKER_OF: Cell<usize> = const { Cell::new(0) };
}

/// Lifecycle of an [`Executor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Accepting work, growing and shrinking
    Running,
    /// Refusing new work, finishing what is queued
    Draining,
    /// No workers left
    Stopped,
}

struct Inner {
    state: State,
    queue: VecDeque<Task>,
    /// Live worker threads
    working: usize,
    /// Workers currently inside a task
    busy: usize,
    next_worker_id: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    /// New task queued or state changed
    work_available: Condvar,
    /// Last worker exited while draining
    all_retired: Condvar,
    config: ExecutorConfig,
}

/// Pool of worker threads that grows toward `high_watermark` under load and
/// shrinks toward `low_watermark` when idle.
///
/// Tasks are dispatched in submission order. Submission never blocks: it
/// either queues the task or returns `false`.
///
/// # Panics in tasks
///
/// A task that panics leaves unknown state behind, so the worker logs the
/// panic and aborts the process with [`std::process::abort`].
pub struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    /// Create a stopped pool. Call [`start`](Self::start) to spawn workers.
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: State::Stopped,
                    queue: VecDeque::with_capacity(config.max_queue_size),
                    working: 0,
                    busy: 0,
                    next_worker_id: 0,
                }),
                work_available: Condvar::new(),
                all_retired: Condvar::new(),
                config,
            }),
        })
    }

    /// Spawn `low_watermark` workers and begin accepting work.
    ///
    /// Does nothing unless the pool is [`State::Stopped`].
    pub fn start(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.state != State::Stopped {
            return;
        }

        inner.state = State::Running;
        for _ in 0..self.shared.config.low_watermark {
            spawn_worker(&self.shared, &mut inner);
        }
        info!(
            low = self.shared.config.low_watermark,
            high = self.shared.config.high_watermark,
            workers = inner.working,
            "executor started"
        );
    }

    /// Queue `work` for execution.
    ///
    /// Returns `false` and drops `work` if the pool is not running or the
    /// queue is full.
    pub fn submit<F>(&self, work: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.shared.inner.lock();
        if inner.state != State::Running || inner.queue.len() >= self.shared.config.max_queue_size
        {
            return false;
        }

        inner.queue.push_back(Box::new(work));

        let outstanding = inner.queue.len() + inner.busy;
        if outstanding > inner.working
            && inner.working < self.shared.config.high_watermark
            && spawn_worker(&self.shared, &mut inner)
        {
            return true;
        }
        self.shared.work_available.notify_one();
        true
    }

    /// Stop accepting work and let workers finish the queue.
    ///
    /// With `await_completion`, blocks until every worker has exited. Called
    /// from one of this pool's own workers it never blocks, since that worker
    /// would be waiting on itself.
    pub fn stop(&self, await_completion: bool) {
        let mut inner = self.shared.inner.lock();
        if inner.state == State::Running {
            inner.state = State::Draining;
            if inner.working == 0 {
                inner.queue.clear();
                inner.state = State::Stopped;
                self.shared.all_retired.notify_all();
            }
            self.shared.work_available.notify_all();
            info!(workers = inner.working, queued = inner.queue.len(), "executor draining");
        }

        if !await_completion {
            return;
        }
        if self.on_own_worker() {
            warn!("stop awaited from a worker thread; not waiting");
            return;
        }
        while inner.state != State::Stopped {
            self.shared.all_retired.wait(&mut inner);
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> State {
        self.shared.inner.lock().state
    }

    /// Live worker threads, busy or idle
    pub fn working_count(&self) -> usize {
        self.shared.inner.lock().working
    }

    /// Workers currently running a task
    pub fn busy_count(&self) -> usize {
        self.shared.inner.lock().busy
    }

    /// Tasks waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    /// The configuration this pool was built with
    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    fn on_own_worker(&self) -> bool {
        WORKER_OF.with(|w| w.get()) == Arc::as_ptr(&self.shared) as usize
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.stop(true);
    }
}

/// Start one worker thread, counting it as alive before it runs.
fn spawn_worker(shared: &Arc<Shared>, inner: &mut Inner) -> bool {
    let id = inner.next_worker_id;
    inner.next_worker_id += 1;
    inner.working += 1;

    let worker_shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("{}-{}", shared.config.thread_name, id))
        .spawn(move || worker_loop(worker_shared));

    match spawned {
        Ok(_) => {
            debug!(worker = id, workers = inner.working, "worker spawned");
            true
        }
        Err(e) => {
            inner.working -= 1;
            warn!(worker = id, error = %e, "failed to spawn worker");
            false
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    WORKER_OF.with(|w| w.set(Arc::as_ptr(&shared) as usize));

    let low = shared.config.low_watermark;
    let idle_timeout = shared.config.idle_timeout;
    let mut inner = shared.inner.lock();
    let mut idle_deadline: Option<Instant> = None;

    loop {
        if let Some(task) = inner.queue.pop_front() {
            inner.busy += 1;
            MutexGuard::unlocked(&mut inner, || run_task(task));
            inner.busy -= 1;
            idle_deadline = None;
            continue;
        }

        if inner.state != State::Running {
            break;
        }

        if inner.working > low {
            let deadline = *idle_deadline.get_or_insert_with(|| Instant::now() + idle_timeout);
            let timed_out = shared
                .work_available
                .wait_until(&mut inner, deadline)
                .timed_out();
            if timed_out
                && inner.queue.is_empty()
                && inner.state == State::Running
                && inner.working > low
            {
                break;
            }
            if timed_out {
                idle_deadline = None;
            }
        } else {
            idle_deadline = None;
            shared.work_available.wait(&mut inner);
        }
    }

    inner.working -= 1;
    debug!(workers = inner.working, state = ?inner.state, "worker retired");
    if inner.working == 0 && inner.state == State::Draining {
        inner.state = State::Stopped;
        shared.all_retired.notify_all();
        info!("executor stopped");
    }
}

fn run_task(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(reason = %reason, "task panicked; aborting process");
        process::abort();
    }
}
