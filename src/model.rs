use std::{fmt, time::Duration};


/// Lifecycle of a [`WorkerPool`](crate::pool::WorkerPool).
///
/// Pausing is tracked separately by the pause gate and is orthogonal to these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Uninitialized,
    Running,
    /// Graceful termination in progress: still accepts work, waits for both queues to empty.
    Draining,
    Terminated,
}

impl PoolState {
    #[inline]
    pub fn is_alive(self) -> bool {
        matches!(self, PoolState::Running | PoolState::Draining)
    }

    #[inline]
    pub fn is_terminated(self) -> bool {
        self == PoolState::Terminated
    }
}


/// Which queue a worker serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    Young,
    Old,
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::Young => f.write_str("young"),
            Generation::Old => f.write_str("old"),
        }
    }
}


/// Point-in-time copy of the pool's telemetry counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySnapshot {
    pub total_idle_time: Duration,
    pub avg_young_queue_size: f64,
    pub avg_old_queue_size: f64,
    pub scheduled_count: u64,
    pub completed_count: u64,
    /// Completed tasks whose action panicked.
    pub failed_count: u64,
    /// Tasks dropped without running.
    pub abandoned_count: u64,
    pub avg_execution_time: Duration,
}

impl TelemetrySnapshot {
    pub fn pending_count(&self) -> u64 {
        self.scheduled_count
            .saturating_sub(self.completed_count)
            .saturating_sub(self.abandoned_count)
    }

    pub fn completion_ratio(&self) -> f64 {
        if self.scheduled_count == 0 {
            return 1.0;
        }
        self.completed_count as f64 / self.scheduled_count as f64
    }

    pub fn success_rate(&self) -> f64 {
        if self.completed_count == 0 {
            return 1.0;
        }
        (self.completed_count - self.failed_count) as f64 / self.completed_count as f64
    }
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total time asleep: {} ms", self.total_idle_time.as_millis())?;
        writeln!(f, "Average young queue size: {:.2}", self.avg_young_queue_size)?;
        writeln!(f, "Average old queue size: {:.2}", self.avg_old_queue_size)?;
        writeln!(f, "Tasks scheduled: {}", self.scheduled_count)?;
        writeln!(f, "Tasks completed: {}", self.completed_count)?;
        writeln!(f, "Tasks failed: {}", self.failed_count)?;
        writeln!(f, "Tasks abandoned: {}", self.abandoned_count)?;
        write!(f, "Average task execution time: {:.2} ms", self.avg_execution_time.as_secs_f64() * 1000.0)
    }
}
