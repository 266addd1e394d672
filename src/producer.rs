use super::{
    pool::WorkerPool,
    task::Task,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use parking_lot::Mutex;
use tokio::{
    sync::watch,
    task::JoinHandle as LoopHandle,
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};


/// Synthetic workload settings. Ranges are inclusive `(min, max)`.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub producers: usize,
    /// Pause between two submissions of one producer.
    pub interval: (Duration, Duration),
    /// Declared `wait_time` of a produced task; its action sleeps exactly that long.
    pub wait_time: (Duration, Duration),
    pub start_immediately: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            producers: 2,
            interval: (Duration::from_millis(1000), Duration::from_millis(3000)),
            wait_time: (Duration::from_millis(5000), Duration::from_millis(10000)),
            start_immediately: true,
        }
    }
}


/// xorshift64, seeded from the clock.
struct FastRng(u64);

impl FastRng {
    fn seeded(stream: u64) -> Self {
        let clock = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9_7F4A_7C15);
        Self((clock ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)) | 1)
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn between(&mut self, (min, max): (Duration, Duration)) -> Duration {
        if max <= min {
            return min;
        }
        let span = (max - min).as_nanos() as u64;
        min + Duration::from_nanos(self.next() % (span + 1))
    }
}


/// Feeds a [`WorkerPool`] with randomly sized tasks from tokio tasks.
///
/// Has its own pause gate: stopping production leaves the pool's pause state alone.
pub struct TaskProducer {
    pool: Arc<WorkerPool>,
    config: ProducerConfig,
    next_id: Arc<AtomicU64>,
    produced: Arc<AtomicU64>,
    producing: watch::Sender<bool>,
    cancellation_token: CancellationToken,
    loops: Mutex<Vec<LoopHandle<()>>>,
}

impl TaskProducer {
    /// Must be called from within a tokio runtime when `start_immediately` is set.
    pub fn spawn(pool: Arc<WorkerPool>, config: ProducerConfig) -> Arc<Self> {
        let (producing, _) = watch::channel(true);
        let start_immediately = config.start_immediately;
        let producer = Arc::new(Self {
            pool,
            config,
            next_id: Arc::new(AtomicU64::new(0)),
            produced: Arc::new(AtomicU64::new(0)),
            producing,
            cancellation_token: CancellationToken::new(),
            loops: Mutex::new(Vec::new()),
        });

        if start_immediately {
            producer.start();
        }
        producer
    }

    /// Spawns the producer loops. No-op if already started or terminated.
    pub fn start(&self) {
        let mut loops = self.loops.lock();
        if !loops.is_empty() || self.cancellation_token.is_cancelled() {
            return;
        }

        for stream in 0..self.config.producers {
            let pool = Arc::clone(&self.pool);
            let config = self.config.clone();
            let next_id = Arc::clone(&self.next_id);
            let produced = Arc::clone(&self.produced);
            let producing = self.producing.subscribe();
            let token = self.cancellation_token.clone();

            loops.push(tokio::spawn(async move {
                let mut rng = FastRng::seeded(stream as u64 + 1);
                produce(&pool, &config, &next_id, &produced, producing, &token, &mut rng).await;
            }));
        }
        info!(producers = self.config.producers, "task producer started");
    }

    pub fn stop_producing(&self) {
        if self.producing.send_replace(false) {
            info!("task producing stopped");
        }
    }

    pub fn resume_producing(&self) {
        if !self.producing.send_replace(true) {
            info!("task producing resumed");
        }
    }

    #[inline]
    pub fn is_producing(&self) -> bool {
        *self.producing.borrow()
    }

    /// Tasks handed to the pool so far.
    #[inline]
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Acquire)
    }

    #[inline]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Stops the producer loops, then terminates the pool in the requested mode.
    pub async fn terminate(&self, drain: bool) {
        self.cancellation_token.cancel();

        let loops = std::mem::take(&mut *self.loops.lock());
        for result in futures::future::join_all(loops).await {
            if let Err(err) = result {
                warn!(%err, "producer loop failed");
            }
        }

        let pool = Arc::clone(&self.pool);
        if let Err(err) = tokio::task::spawn_blocking(move || pool.terminate(drain)).await {
            warn!(%err, "pool termination failed");
        }
        info!(produced = self.produced(), "task producer terminated");
    }
}

async fn produce(
    pool: &WorkerPool,
    config: &ProducerConfig,
    next_id: &AtomicU64,
    produced: &AtomicU64,
    mut producing: watch::Receiver<bool>,
    token: &CancellationToken,
    rng: &mut FastRng,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(rng.between(config.interval)) => {}
        }

        let open = tokio::select! {
            _ = token.cancelled() => false,
            open = async { producing.wait_for(|on| *on).await.is_ok() } => open,
        };
        if !open {
            break;
        }

        let wait_time = rng.between(config.wait_time);
        let id = next_id.fetch_add(1, Ordering::Relaxed);
        pool.submit(Task::new(id, wait_time, move || std::thread::sleep(wait_time)));
        produced.fetch_add(1, Ordering::Release);
        debug!(task_id = id, wait_ms = wait_time.as_millis() as u64, "task produced");
    }
}
