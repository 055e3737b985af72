use crate::core::tasks::AsyncHandleable;
use crate::err::Result;
use crate::utilities::AsyncLogger;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A small async task queue backed by a Tokio channel. Components enqueue
/// boxed [`AsyncHandleable`] items; a single background consumer spawns each
/// one onto the runtime.
#[derive(Debug)]
pub struct TaskQueue {
    tx: mpsc::Sender<QueueMsg>,
    worker: JoinHandle<()>,
}

/// A cloneable sending handle that can be shared across tasks.
#[derive(Clone)]
pub struct TaskQueueSender {
    tx: mpsc::Sender<QueueMsg>,
}

impl TaskQueueSender {
    /// Async send that applies backpressure if the channel is full.
    pub async fn send(&self, msg: Box<dyn AsyncHandleable>) -> Result<()> {
        if self.tx.send(QueueMsg::Item(msg)).await.is_err() {
            return Err("task queue worker is not running".into());
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct TaskQueueConfig {
    /// Max queued items before senders back off.
    pub queue_bound: usize,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self { queue_bound: 1024 }
    }
}

enum QueueMsg {
    Item(Box<dyn AsyncHandleable>),
    Shutdown,
}

impl TaskQueue {
    pub fn new(config: TaskQueueConfig, logger: AsyncLogger) -> Self {
        let bound = config.queue_bound.max(1);
        let (tx, mut rx) = mpsc::channel(bound);

        let worker = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    QueueMsg::Item(item) => Self::dispatch(item, logger.clone()),
                    QueueMsg::Shutdown => break,
                }
            }
        });

        Self { tx, worker }
    }

    fn dispatch(mut item: Box<dyn AsyncHandleable>, logger: AsyncLogger) {
        tokio::spawn(async move {
            if let Err(e) = item.handle().await {
                logger.error(format!("Background task failed: {}", e));
            }
        });
    }

    pub fn sender(&self) -> TaskQueueSender {
        TaskQueueSender {
            tx: self.tx.clone(),
        }
    }

    /// Stop the consumer after the queued items have been dispatched.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.tx.send(QueueMsg::Shutdown).await;
        let _ = self.worker.await;
        Ok(())
    }
}
