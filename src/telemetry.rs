use super::model::TelemetrySnapshot;
use std::time::Duration;
use parking_lot::RwLock;


#[derive(Debug, Default)]
struct Counters {
    total_idle: Duration,
    young_size_sum: u64,
    old_size_sum: u64,
    size_samples: u64,
    scheduled: u64,
    completed: u64,
    failed: u64,
    abandoned: u64,
    total_execution: Duration,
}

/// Pool-wide counters behind a single reader/writer lock.
///
/// Innermost lock of the pool: callers may hold the state lock or a queue lock
/// while updating, never the other way around.
#[derive(Debug, Default)]
pub struct Telemetry {
    counters: RwLock<Counters>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_scheduled(&self) {
        self.counters.write().scheduled += 1;
    }

    pub fn task_completed(&self, execution_time: Duration, panicked: bool) {
        let mut counters = self.counters.write();
        counters.completed += 1;
        counters.total_execution += execution_time;
        if panicked {
            counters.failed += 1;
        }
    }

    pub fn tasks_abandoned(&self, count: u64) {
        if count > 0 {
            self.counters.write().abandoned += count;
        }
    }

    pub fn record_idle(&self, idle: Duration) {
        self.counters.write().total_idle += idle;
    }

    pub fn sample_queue_sizes(&self, young: usize, old: usize) {
        let mut counters = self.counters.write();
        counters.young_size_sum += young as u64;
        counters.old_size_sum += old as u64;
        counters.size_samples += 1;
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let counters = self.counters.read();
        TelemetrySnapshot {
            total_idle_time: counters.total_idle,
            avg_young_queue_size: average(counters.young_size_sum, counters.size_samples),
            avg_old_queue_size: average(counters.old_size_sum, counters.size_samples),
            scheduled_count: counters.scheduled,
            completed_count: counters.completed,
            failed_count: counters.failed,
            abandoned_count: counters.abandoned,
            avg_execution_time: match u32::try_from(counters.completed) {
                Ok(0) => Duration::ZERO,
                Ok(n) => counters.total_execution / n,
                Err(_) => Duration::from_secs_f64(
                    counters.total_execution.as_secs_f64() / counters.completed as f64,
                ),
            },
        }
    }
}

#[inline]
fn average(sum: u64, samples: u64) -> f64 {
    if samples == 0 {
        return 0.0;
    }
    sum as f64 / samples as f64
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn empty_snapshot_has_zero_averages() {
        let snapshot = Telemetry::new().snapshot();
        assert_eq!(snapshot.avg_young_queue_size, 0.0);
        assert_eq!(snapshot.avg_old_queue_size, 0.0);
        assert_eq!(snapshot.avg_execution_time, Duration::ZERO);
        assert!(!snapshot.avg_young_queue_size.is_nan());
    }

    #[test]
    fn averages_queue_samples() {
        let telemetry = Telemetry::new();
        telemetry.sample_queue_sizes(4, 0);
        telemetry.sample_queue_sizes(2, 1);

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.avg_young_queue_size, 3.0);
        assert_eq!(snapshot.avg_old_queue_size, 0.5);
    }

    #[test]
    fn tracks_completions_and_execution_time() {
        let telemetry = Telemetry::new();
        telemetry.task_scheduled();
        telemetry.task_scheduled();
        telemetry.task_completed(Duration::from_millis(100), false);
        telemetry.task_completed(Duration::from_millis(200), true);
        telemetry.record_idle(Duration::from_millis(30));
        telemetry.record_idle(Duration::from_millis(12));
        telemetry.tasks_abandoned(0);

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.scheduled_count, 2);
        assert_eq!(snapshot.completed_count, 2);
        assert_eq!(snapshot.failed_count, 1);
        assert_eq!(snapshot.abandoned_count, 0);
        assert_eq!(snapshot.avg_execution_time, Duration::from_millis(150));
        assert_eq!(snapshot.total_idle_time, Duration::from_millis(42));
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let telemetry = Arc::new(Telemetry::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let telemetry = Arc::clone(&telemetry);
                thread::spawn(move || {
                    for _ in 0..500 {
                        telemetry.task_scheduled();
                        telemetry.task_completed(Duration::from_micros(1), false);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.scheduled_count, 4000);
        assert_eq!(snapshot.completed_count, 4000);
    }
}
