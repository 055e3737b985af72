use crate::core::tasks::task_queue::TaskQueueSender;
use crate::core::tasks::{AsyncHandleable, JobSummary, JobType};
use crate::err::Result;
use crate::utilities::AsyncLogger;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::select;

/// A periodic async job wrapper that repeatedly runs an async function and
/// sleeps between runs until the shutdown signal fires.
pub struct PeriodicJob<J, F>
where
    J: FnMut() -> F + Send + 'static,
    F: Future<Output = Result<()>> + Send + 'static,
{
    job_name: String,
    job: J,
    period_in_seconds: u64,
    logger: AsyncLogger,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
}

impl<J, F> PeriodicJob<J, F>
where
    J: FnMut() -> F + Send + 'static,
    F: Future<Output = Result<()>> + Send + 'static,
{
    pub fn new(
        job_name: String,
        job: J,
        period_in_seconds: u64,
        logger: AsyncLogger,
        shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) -> Self {
        Self {
            job_name,
            job,
            period_in_seconds,
            logger,
            shutdown_rx,
        }
    }
}

#[async_trait]
impl<J, F> AsyncHandleable for PeriodicJob<J, F>
where
    J: FnMut() -> F + Send + 'static,
    F: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&mut self) -> Result<()> {
        loop {
            match (self.job)().await {
                Ok(()) => {
                    self.logger
                        .debug(format!("Job {} completed.", &self.job_name));
                }
                Err(job_err) => {
                    // A single failed run must not end the periodic job.
                    self.logger
                        .error(format!("Job {} failed: {}", &self.job_name, job_err));
                }
            }
            select! {
                biased;
                _ = &mut self.shutdown_rx => {
                    self.logger.info(format!(
                        "Received a shutdown signal. The job {} will exit.",
                        &self.job_name
                    ));
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(self.period_in_seconds)) => {}
            }
        }
        Ok(())
    }
}

pub async fn launch_periodic_job<J, F>(
    job_name: &str,
    summary: &str,
    job: J,
    period_in_seconds: u64,
    task_queue_sender: TaskQueueSender,
    logger: AsyncLogger,
) -> Result<JobSummary>
where
    J: FnMut() -> F + Send + 'static,
    F: Future<Output = Result<()>> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let job = PeriodicJob::new(
        String::from(job_name),
        job,
        period_in_seconds,
        logger,
        shutdown_rx,
    );
    task_queue_sender.send(Box::new(job)).await?;

    let period = Some(chrono::Duration::seconds(period_in_seconds as i64));

    Ok(JobSummary::new(
        String::from(job_name),
        String::from(summary),
        JobType::Periodic,
        period,
        shutdown_tx,
    ))
}
