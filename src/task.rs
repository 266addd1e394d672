use super::{
    errors::{TaskError, TaskResult},
    handle::Completion,
    model::Generation,
};
use std::{
    any::Any,
    cmp::Ordering,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicBool, Ordering as AtomicOrdering},
    time::{Duration, Instant},
};
use parking_lot::Mutex;


pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// What happened when a claimed task's action ran.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Execution {
    pub elapsed: Duration,
    pub panic: Option<String>,
}

impl Execution {
    pub fn result(&self) -> TaskResult<Duration> {
        match &self.panic {
            None => Ok(self.elapsed),
            Some(message) => Err(TaskError::Panicked(message.clone())),
        }
    }
}

struct Payload {
    action: Job,
    completion: Option<Completion>,
}

/// A unit of work plus its scheduling metadata.
///
/// `wait_time` is the declared expected duration. It orders the queues
/// (shorter first) and sets the aging threshold: once a task has waited longer
/// than `aging_factor * wait_time` it becomes eligible for the old generation.
pub struct Task {
    id: u64,
    creation_time: Instant,
    wait_time: Duration,
    claimed: AtomicBool,
    promoted: AtomicBool,
    payload: Mutex<Option<Payload>>,
}

impl Task {
    pub fn new<F>(id: u64, wait_time: Duration, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::with_creation_time(id, Instant::now(), wait_time, action)
    }

    pub fn with_creation_time<F>(id: u64, creation_time: Instant, wait_time: Duration, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id,
            creation_time,
            wait_time,
            claimed: AtomicBool::new(false),
            promoted: AtomicBool::new(false),
            payload: Mutex::new(Some(Payload {
                action: Box::new(action),
                completion: None,
            })),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn creation_time(&self) -> Instant {
        self.creation_time
    }

    #[inline]
    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    #[inline]
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(AtomicOrdering::Acquire)
    }

    #[inline]
    pub fn is_promoted(&self) -> bool {
        self.promoted.load(AtomicOrdering::Acquire)
    }

    pub fn age(&self) -> Duration {
        self.creation_time.elapsed()
    }

    /// True once `now` is past `creation_time + aging_factor * wait_time`.
    pub fn is_stale(&self, now: Instant, aging_factor: u32) -> bool {
        self.wait_time
            .checked_mul(aging_factor)
            .and_then(|threshold| self.creation_time.checked_add(threshold))
            .is_some_and(|deadline| now > deadline)
    }

    pub(crate) fn is_promotable(&self, now: Instant, aging_factor: u32) -> bool {
        !self.is_claimed() && !self.is_promoted() && self.is_stale(now, aging_factor)
    }

    /// Flips `promoted` false -> true. Fails for claimed, fresh or already promoted tasks.
    pub(crate) fn try_promote(&self, now: Instant, aging_factor: u32) -> bool {
        if self.is_claimed() || !self.is_stale(now, aging_factor) {
            return false;
        }
        self.promoted
            .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_ok()
    }

    /// Exclusive claim. Young workers never claim a promoted task.
    pub(crate) fn try_claim(&self, generation: Generation) -> bool {
        if generation == Generation::Young && self.is_promoted() {
            return false;
        }
        self.claimed
            .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_ok()
    }

    pub(crate) fn attach_completion(&mut self, completion: Completion) {
        if let Some(payload) = self.payload.get_mut() {
            payload.completion = Some(completion);
        }
    }

    /// Runs the action at most once, outside of any lock, and reports the
    /// outcome to an attached handle. `None` if the action was already taken.
    pub(crate) fn run(&self) -> Option<Execution> {
        let Payload { action, completion } = self.payload.lock().take()?;

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(action));
        let execution = Execution {
            elapsed: started.elapsed(),
            panic: outcome.err().map(|panic_info| panic_message(&*panic_info)),
        };

        if let Some(completion) = completion {
            let _ = completion.send(execution.result());
        }
        Some(execution)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("wait_time", &self.wait_time)
            .field("claimed", &self.is_claimed())
            .field("promoted", &self.is_promoted())
            .finish_non_exhaustive()
    }
}

/// Shortest declared `wait_time` first, ties by id.
pub fn shortest_wait_first(a: &Task, b: &Task) -> Ordering {
    a.wait_time
        .cmp(&b.wait_time)
        .then_with(|| a.id.cmp(&b.id))
}

fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(message) = panic_info.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic_info.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic in task action".into()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::AtomicUsize,
        Arc,
    };

    fn noop(id: u64, wait_ms: u64) -> Task {
        Task::new(id, Duration::from_millis(wait_ms), || {})
    }

    #[test]
    fn staleness_uses_aging_factor() {
        let created = Instant::now();
        let task = Task::with_creation_time(1, created, Duration::from_millis(100), || {});

        assert!(!task.is_stale(created + Duration::from_millis(150), 2));
        assert!(!task.is_stale(created + Duration::from_millis(200), 2));
        assert!(task.is_stale(created + Duration::from_millis(201), 2));
        assert!(task.is_stale(created + Duration::from_millis(101), 1));
    }

    #[test]
    fn claim_is_exclusive() {
        let task = noop(1, 10);
        assert!(task.try_claim(Generation::Old));
        assert!(!task.try_claim(Generation::Old));
        assert!(task.is_claimed());
    }

    #[test]
    fn promoted_task_is_not_claimable_by_young_workers() {
        let task = Task::with_creation_time(1, Instant::now() - Duration::from_secs(1), Duration::from_millis(10), || {});
        assert!(task.try_promote(Instant::now(), 2));
        assert!(!task.try_promote(Instant::now(), 2));
        assert!(!task.try_claim(Generation::Young));
        assert!(task.try_claim(Generation::Old));
    }

    #[test]
    fn claimed_task_is_never_promoted() {
        let task = Task::with_creation_time(1, Instant::now() - Duration::from_secs(1), Duration::from_millis(10), || {});
        assert!(task.try_claim(Generation::Young));
        assert!(!task.is_promotable(Instant::now(), 2));
        assert!(!task.try_promote(Instant::now(), 2));
    }

    #[test]
    fn action_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let task = Task::new(7, Duration::from_millis(1), move || {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });

        assert!(task.run().is_some_and(|execution| execution.panic.is_none()));
        assert!(task.run().is_none());
        assert_eq!(runs.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn panicking_action_is_reported() {
        let task = Task::new(3, Duration::from_millis(1), || panic!("boom"));
        let execution = task.run().unwrap();
        assert_eq!(execution.result(), Err(TaskError::Panicked("boom".into())));
    }

    #[test]
    fn ordering_prefers_shorter_wait() {
        assert_eq!(shortest_wait_first(&noop(1, 100), &noop(2, 300)), Ordering::Less);
        assert_eq!(shortest_wait_first(&noop(1, 300), &noop(2, 100)), Ordering::Greater);
        assert_eq!(shortest_wait_first(&noop(1, 100), &noop(2, 100)), Ordering::Less);
    }
}
