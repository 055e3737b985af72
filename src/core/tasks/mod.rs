mod job_summary;
pub mod jobs;
pub mod task_queue;

pub use job_summary::{JobStatus, JobSummary, JobType};

use crate::core::tasks::task_queue::{TaskQueue, TaskQueueConfig};
use crate::err::Result;
use crate::utilities::AsyncLogger;
use async_trait::async_trait;

/// A unit of background work the task queue can run.
#[async_trait]
pub trait AsyncHandleable: Send {
    async fn handle(&mut self) -> Result<()>;
}

pub async fn init_core(logger: AsyncLogger) -> Result<TaskQueue> {
    Ok(TaskQueue::new(TaskQueueConfig::default(), logger))
}

pub async fn shutdown_core(task_queue: TaskQueue) -> Result<()> {
    task_queue.shutdown().await?;
    Ok(())
}
