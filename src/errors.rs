/// Why a submitted task did not produce a successful completion.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("task action panicked: {0}")]
    Panicked(String),
    #[error("task was abandoned before it could run")]
    Abandoned,
    #[error("timed out waiting for task completion")]
    Timeout,
}

/// Checked failures of [`PriorityQueue`](crate::queue::PriorityQueue) access.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum QueueError {
    #[error("index {index} out of range for queue of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

pub type TaskResult<T> = Result<T, TaskError>;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
