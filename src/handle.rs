use super::errors::{TaskError, TaskResult};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    sync::oneshot,
    time::Duration,
};


pub(crate) type Completion = oneshot::Sender<TaskResult<Duration>>;


/// Handle on a submitted task; resolves to the action's execution time.
///
/// If the task is dropped without running (immediate termination, or the pool
/// was not alive at submission) the handle resolves to [`TaskError::Abandoned`].
pub struct JoinHandle {
    id: u64,
    receiver: oneshot::Receiver<TaskResult<Duration>>,
}

impl JoinHandle {

    pub(crate) fn channel(id: u64) -> (Completion, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { id, receiver })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Blocks the current thread until the task settles.
    ///
    /// Must not be called from inside an async context; await the handle there.
    pub fn wait(self) -> TaskResult<Duration> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(TaskError::Abandoned))
    }

    /// Non-blocking check; `None` while the task is still pending.
    pub fn try_result(&mut self) -> Option<TaskResult<Duration>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(TaskError::Abandoned)),
        }
    }

    pub async fn await_timeout(self, timeout: Duration) -> TaskResult<Duration> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TaskError::Abandoned),
            Err(_) => Err(TaskError::Timeout),
        }
    }
}

impl Future for JoinHandle {
    type Output = TaskResult<Duration>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(res) => Poll::Ready(res.unwrap_or(Err(TaskError::Abandoned))),
            Poll::Pending => Poll::Pending,
        }
    }
}
