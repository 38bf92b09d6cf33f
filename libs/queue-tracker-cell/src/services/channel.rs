use std::fmt;
use std::future::Future;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

/// Bound on items buffered between a producer task and its consumer.
pub const CHANNEL_CAPACITY: usize = 32;

/// Receiving half of a spawned producer task.
///
/// `close()` asks the task to stop and waits for it to finish. Dropping the
/// channel without closing aborts the task instead.
pub struct TaskChannel<T> {
    receiver: mpsc::Receiver<T>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> TaskChannel<T> {
    /// Spawns `task` with the sending half and a shutdown signal it must
    /// watch.
    pub fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(mpsc::Sender<T>, oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(task(sender, shutdown_rx));

        Self {
            receiver,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

impl<T> TaskChannel<T> {
    /// `None` once the task has finished and the buffer is drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.receiver.close();

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Producer task ended abnormally: {}", e);
                }
            }
        }
    }
}

impl<T> fmt::Debug for TaskChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskChannel")
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl<T> Drop for TaskChannel<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
