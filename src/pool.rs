use super::{
    errors::PoolError,
    handle::JoinHandle,
    model::{
        Generation,
        PoolState,
        TelemetrySnapshot,
    },
    queue::PriorityQueue,
    task::{shortest_wait_first, Task},
    telemetry::Telemetry,
};
use std::{
    iter,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    thread,
    time::Instant,
};
use crossbeam::sync::WaitGroup;
use parking_lot::{Condvar, Mutex};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};


/// Конфигурация пула потоков
#[derive(Debug, Clone)]
pub struct Config {
    /// Workers serving the young generation. One old-generation worker is always added.
    pub young_workers: usize,
    pub start_immediately: bool,
    /// A task is promoted once it has waited longer than `aging_factor * wait_time`.
    pub aging_factor: u32,
    /// Upper bound on how long an idle old-generation worker sleeps before sweeping again.
    pub sweep_interval: Duration,
    pub thread_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            young_workers: num_cpus::get(),
            start_immediately: true,
            aging_factor: 2,
            sweep_interval: Duration::from_millis(100),
            thread_name: "genpool".into(),
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        Self {
            young_workers: num_cpus::get(),
            ..Default::default()
        }
    }

    pub fn io_bound() -> Self {
        Self {
            young_workers: num_cpus::get() * 2,
            ..Default::default()
        }
    }

    pub fn with_young_workers(mut self, young_workers: usize) -> Self {
        self.young_workers = young_workers;
        self
    }

    pub fn paused(mut self) -> Self {
        self.start_immediately = false;
        self
    }
}


pub type TaskQueue = PriorityQueue<Task>;

#[derive(Debug, Default)]
struct GateState {
    paused: bool,
    sealed: bool,
}

/// Cooperative pause gate. Sealing opens it for good.
#[derive(Debug)]
struct PauseGate {
    state: Mutex<GateState>,
    waiter: Condvar,
    /// Mirror of `state.paused`, readable without the gate lock.
    closed: AtomicBool,
}

impl PauseGate {
    fn new(paused: bool) -> Self {
        Self {
            state: Mutex::new(GateState { paused, sealed: false }),
            waiter: Condvar::new(),
            closed: AtomicBool::new(paused),
        }
    }

    fn wait_until_open(&self) {
        let mut state = self.state.lock();
        while state.paused {
            self.waiter.wait(&mut state);
        }
    }

    fn close(&self) -> bool {
        let mut state = self.state.lock();
        if state.sealed || state.paused {
            return false;
        }
        state.paused = true;
        self.closed.store(true, Ordering::Release);
        true
    }

    fn open(&self) -> bool {
        let mut state = self.state.lock();
        if !state.paused {
            return false;
        }
        state.paused = false;
        self.closed.store(false, Ordering::Release);
        self.waiter.notify_all();
        true
    }

    /// Opens the gate and refuses every later `close`. Returns whether it was closed.
    fn seal(&self) -> bool {
        let mut state = self.state.lock();
        let was_paused = state.paused;
        state.sealed = true;
        state.paused = false;
        self.closed.store(false, Ordering::Release);
        self.waiter.notify_all();
        was_paused
    }

    /// Lock-free, so callers may hold the state lock.
    #[inline]
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}


/// Outcome of one [`Shared::claim`] call.
enum Claim {
    Task(Arc<Task>),
    /// Paused, or the old worker's sweep interval elapsed: go back through the gate.
    Yield,
    Terminated,
}


/// Everything the worker threads share with the owning [`WorkerPool`].
///
/// Lock order: `state` -> queue-internal lock -> telemetry lock. The pause gate
/// is never taken while `state` is held.
struct Shared {
    state: Mutex<PoolState>,
    young: TaskQueue,
    old: TaskQueue,
    young_waiter: Condvar,
    old_waiter: Condvar,
    drained: Condvar,
    gate: PauseGate,
    telemetry: Telemetry,
    aging_factor: u32,
    sweep_interval: Duration,
}

impl Shared {
    fn new(config: &Config) -> Self {
        Self {
            state: Mutex::new(PoolState::Uninitialized),
            young: PriorityQueue::new(shortest_wait_first),
            old: PriorityQueue::new(shortest_wait_first),
            young_waiter: Condvar::new(),
            old_waiter: Condvar::new(),
            drained: Condvar::new(),
            gate: PauseGate::new(!config.start_immediately),
            telemetry: Telemetry::new(),
            aging_factor: config.aging_factor,
            sweep_interval: config.sweep_interval.max(Duration::from_millis(1)),
        }
    }

    #[inline]
    fn queue(&self, generation: Generation) -> &TaskQueue {
        match generation {
            Generation::Young => &self.young,
            Generation::Old => &self.old,
        }
    }

    #[inline]
    fn queues_empty(&self) -> bool {
        self.young.is_empty() && self.old.is_empty()
    }

    fn worker_loop(&self, worker_id: usize, generation: Generation) {
        debug!(worker_id, %generation, "worker started");

        loop {
            self.gate.wait_until_open();

            self.review_young_generation();

            let task = match self.claim(generation) {
                Claim::Task(task) => task,
                Claim::Yield => continue,
                Claim::Terminated => break,
            };
            // a pause may land between the check in `claim` and the pop
            self.gate.wait_until_open();

            debug!(worker_id, %generation, task_id = task.id(), "task started");

            let Some(execution) = task.run() else {
                continue;
            };

            match &execution.panic {
                None => debug!(
                    worker_id,
                    task_id = task.id(),
                    elapsed_ms = execution.elapsed.as_millis() as u64,
                    "task finished"
                ),
                Some(message) => warn!(worker_id, task_id = task.id(), %message, "task panicked"),
            }
            self.telemetry.task_completed(execution.elapsed, execution.panic.is_some());
        }

        debug!(worker_id, %generation, "worker stopped");
    }

    fn review_young_generation(&self) {
        let state = self.state.lock();
        if state.is_terminated() {
            return;
        }
        let promoted = self.promote_stale(&state);
        if promoted > 0 {
            debug!(promoted, young = self.young.len(), old = self.old.len(), "young generation reviewed");
        }
    }

    /// Moves stale young tasks to the old generation. Requires the state lock,
    /// which keeps queue membership (and so every index below `len`) stable.
    fn promote_stale(&self, _state: &PoolState) -> usize {
        let now = Instant::now();

        let any_stale = (0..self.young.len())
            .filter_map(|index| self.young.peek_at(index).ok())
            .any(|task| task.is_promotable(now, self.aging_factor));
        if !any_stale {
            return 0;
        }

        let promoted = self
            .young
            .extract_where(|task| task.try_promote(now, self.aging_factor));

        for task in &promoted {
            debug!(
                task_id = task.id(),
                age_ms = now.saturating_duration_since(task.creation_time()).as_millis() as u64,
                "task moved to old generation"
            );
            self.old.push(Arc::clone(task));
            self.old_waiter.notify_one();
        }
        promoted.len()
    }

    /// Blocks until a task from `generation`'s queue is claimed, the pool is
    /// paused or terminates, or (old worker only) `sweep_interval` elapses.
    fn claim(&self, generation: Generation) -> Claim {
        let queue = self.queue(generation);
        let mut state = self.state.lock();
        let mut slept_since: Option<Instant> = None;

        let claimed = loop {
            if state.is_terminated() {
                break Claim::Terminated;
            }
            if self.gate.is_closed() {
                break Claim::Yield;
            }

            if let Some(task) = Self::pop_claimable(queue, generation) {
                self.telemetry.sample_queue_sizes(self.young.len(), self.old.len());
                break Claim::Task(task);
            }

            if *state == PoolState::Draining && self.queues_empty() {
                self.drained.notify_all();
            }

            slept_since.get_or_insert_with(Instant::now);
            match generation {
                Generation::Young => self.young_waiter.wait(&mut state),
                Generation::Old => {
                    if self.old_waiter.wait_for(&mut state, self.sweep_interval).timed_out() {
                        break Claim::Yield;
                    }
                }
            }
        };

        if matches!(claimed, Claim::Task(_)) && *state == PoolState::Draining && self.queues_empty() {
            self.drained.notify_all();
        }
        if let Some(since) = slept_since {
            self.telemetry.record_idle(since.elapsed());
        }
        claimed
    }

    /// Wakes workers parked on either queue so they recheck the pause gate.
    fn wake_workers(&self) {
        let _state = self.state.lock();
        self.young_waiter.notify_all();
        self.old_waiter.notify_all();
    }

    fn pop_claimable(queue: &TaskQueue, generation: Generation) -> Option<Arc<Task>> {
        while let Some(task) = queue.pop() {
            if task.try_claim(generation) {
                return Some(task);
            }
            trace!(task_id = task.id(), %generation, "skipping claimed or promoted task");
        }
        None
    }

    /// Flips to `Terminated` and wakes every waiter. Returns false if already terminated.
    fn halt(&self, state: &mut PoolState) -> bool {
        if state.is_terminated() {
            return false;
        }
        *state = PoolState::Terminated;
        self.young_waiter.notify_all();
        self.old_waiter.notify_all();
        self.drained.notify_all();
        true
    }
}


/// Worker threads spawned once, joined once.
struct WorkerSet {
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerSet {
    fn join_all(self) {
        for handle in self.handles {
            let name = handle.thread().name().map(str::to_owned);
            if handle.join().is_err() {
                warn!(worker = ?name, "worker thread panicked");
            }
        }
    }
}


/// Generational priority pool: `young_workers` threads serve the young queue
/// shortest-`wait_time`-first, one thread serves tasks promoted to the old queue.
///
/// Single use: once terminated it rejects submissions and cannot be restarted.
/// Dropping the pool terminates it immediately.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Option<WorkerSet>>,
    young_workers: usize,
}

impl WorkerPool {
    pub fn new(young_workers: usize, start_immediately: bool) -> Result<Self, PoolError> {
        let config = Config {
            young_workers,
            start_immediately,
            ..Default::default()
        };
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Result<Self, PoolError> {
        let young_workers = config.young_workers.max(1);
        let shared = Arc::new(Shared::new(&config));
        let started = WaitGroup::new();

        let roles = (0..young_workers)
            .map(|worker_id| (worker_id, Generation::Young))
            .chain(iter::once((young_workers, Generation::Old)));

        // Запускаем воркеры
        let mut handles = Vec::with_capacity(young_workers + 1);
        for (worker_id, generation) in roles {
            let shared_clone = Arc::clone(&shared);
            let started = started.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}-{}", config.thread_name, generation, worker_id))
                .spawn(move || {
                    drop(started);
                    shared_clone.worker_loop(worker_id, generation);
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    warn!(%err, worker_id, "failed to spawn worker, tearing the pool down");
                    shared.halt(&mut shared.state.lock());
                    shared.gate.seal();
                    WorkerSet { handles }.join_all();
                    return Err(PoolError::Spawn(err));
                }
            }
        }

        started.wait();
        *shared.state.lock() = PoolState::Running;
        info!(
            young_workers,
            paused = !config.start_immediately,
            "thread pool started"
        );

        Ok(Self {
            shared,
            workers: Mutex::new(Some(WorkerSet { handles })),
            young_workers,
        })
    }

    /// Queues `task` in the young generation. Silently dropped if the pool is not alive.
    pub fn submit(&self, task: Task) {
        self.enqueue(task);
    }

    /// Like [`submit`](Self::submit), returning a handle that settles once the task
    /// ran, or with [`TaskError::Abandoned`](crate::errors::TaskError::Abandoned)
    /// if it never will.
    pub fn submit_with_handle(&self, mut task: Task) -> JoinHandle {
        let (completion, handle) = JoinHandle::channel(task.id());
        task.attach_completion(completion);
        self.enqueue(task);
        handle
    }

    fn enqueue(&self, task: Task) -> bool {
        let task_id = task.id();
        let wait_ms = task.wait_time().as_millis() as u64;

        let state = self.shared.state.lock();
        if !state.is_alive() {
            drop(state);
            debug!(task_id, "pool is not alive, task dropped");
            return false;
        }

        self.shared.young.push(Arc::new(task));
        self.shared.telemetry.task_scheduled();
        self.shared.young_waiter.notify_one();
        drop(state);

        debug!(task_id, wait_ms, "task added to pool");
        true
    }

    /// Same as [`resume`](Self::resume).
    pub fn start(&self) {
        self.resume();
    }

    /// Workers finish their current task and stop before taking the next one.
    ///
    /// No-op once termination has begun.
    pub fn pause(&self) {
        if self.shared.gate.close() {
            info!("thread pool paused");
        }
    }

    pub fn resume(&self) {
        if self.shared.gate.open() {
            self.shared.wake_workers();
            info!("thread pool resumed");
        }
    }

    /// Terminates the pool and joins every worker.
    ///
    /// With `drain = false` queued tasks are abandoned; with `drain = true` the
    /// call first waits until both queues are observed empty, resuming a paused
    /// pool so it can get there. Pausing has no effect from then on. In-flight
    /// tasks always run to completion.
    ///
    /// Must not be called from inside a task action.
    pub fn terminate(&self, drain: bool) {
        if drain && self.shared.gate.seal() {
            self.shared.wake_workers();
            info!("thread pool resumed for draining");
        }

        {
            let mut state = self.shared.state.lock();
            if drain && *state == PoolState::Running {
                *state = PoolState::Draining;
                info!("thread pool draining");
            }
            while *state == PoolState::Draining && !self.shared.queues_empty() {
                self.shared.drained.wait(&mut state);
            }
            if self.shared.halt(&mut state) {
                info!(drain, "thread pool terminating");
            }
        }
        self.shared.gate.seal();

        let mut workers = self.workers.lock();
        let Some(set) = workers.take() else {
            return;
        };
        set.join_all();

        let abandoned: Vec<Arc<Task>> = {
            let _state = self.shared.state.lock();
            let mut leftover = self.shared.young.clear();
            leftover.extend(self.shared.old.clear());
            leftover
        };
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "abandoned unclaimed tasks");
            self.shared.telemetry.tasks_abandoned(abandoned.len() as u64);
        }
        drop(abandoned);

        info!("thread pool terminated");
    }

    #[inline]
    pub fn state(&self) -> PoolState {
        *self.shared.state.lock()
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.shared.gate.is_closed()
    }

    pub fn is_working(&self) -> bool {
        self.is_alive() && !self.is_paused()
    }

    /// Tasks waiting in the young generation.
    pub fn currently_scheduled_count(&self) -> usize {
        let _state = self.shared.state.lock();
        self.shared.young.len()
    }

    /// Tasks waiting in the old generation.
    pub fn old_generation_count(&self) -> usize {
        let _state = self.shared.state.lock();
        self.shared.old.len()
    }

    /// Young workers plus the old-generation worker.
    pub fn worker_count(&self) -> usize {
        self.young_workers + 1
    }

    #[inline]
    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        self.shared.telemetry.snapshot()
    }

    /// Periodically hands a telemetry snapshot to `callback` on the tokio runtime.
    ///
    /// Stops when the token is cancelled or the pool is dropped; the monitor
    /// does not keep the pool alive.
    pub fn start_monitoring<F>(self: &Arc<Self>, interval: Duration, callback: F) -> CancellationToken
    where
        F: Fn(TelemetrySnapshot) + Send + 'static,
    {
        let pool: Weak<Self> = Arc::downgrade(self);
        let token = CancellationToken::new();
        let token_clone = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let snapshot = {
                            let Some(pool) = pool.upgrade() else {
                                break;
                            };
                            let snapshot = pool.telemetry_snapshot();
                            if Arc::strong_count(&pool) == 1 {
                                // last owner is gone: dropping joins the workers
                                tokio::task::spawn_blocking(move || drop(pool));
                                break;
                            }
                            snapshot
                        };
                        callback(snapshot);
                    }
                    _ = token_clone.cancelled() => {
                        break;
                    }
                }
            }
        });

        token
    }

    pub fn stop_monitoring(token: CancellationToken) {
        token.cancel();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.terminate(false);
    }
}
