use crate::err::Result;
use std::fmt::{self, Debug};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Shutdown,
}

#[derive(Debug, Copy, Clone)]
pub enum JobType {
    Periodic,
    OneTime,
}

/// Bookkeeping for a launched background job, carrying the handle that
/// shuts it down.
pub struct JobSummary {
    job_name: String,
    launched_time: chrono::DateTime<chrono::Utc>,
    complete_time: Option<chrono::DateTime<chrono::Utc>>,

    status: JobStatus,

    job_type: JobType,
    period: Option<chrono::Duration>,
    summary: String,

    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl Debug for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ JobSummary job_name: {}, launched_time: {} }}",
            &self.job_name, &self.launched_time
        )
    }
}

impl JobSummary {
    pub fn new(
        job_name: String,
        summary: String,
        job_type: JobType,
        period: Option<chrono::Duration>,
        shutdown_tx: tokio::sync::oneshot::Sender<()>,
    ) -> Self {
        Self {
            job_name,
            launched_time: chrono::Utc::now(),
            complete_time: None,
            status: JobStatus::Running,
            job_type,
            period,
            summary,
            shutdown_tx,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    fn end_job(&mut self, status: JobStatus) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(format!(
                "failed to end job {}: not running (status: {:?})",
                &self.job_name, &self.status
            )
            .into());
        }
        self.complete_time = Some(chrono::Utc::now());
        self.status = status;
        Ok(())
    }

    /// Signal the job to exit and mark it shut down.
    pub async fn shutdown(mut self) -> Result<()> {
        self.end_job(JobStatus::Shutdown)?;
        let _ = self.shutdown_tx.send(());
        Ok(())
    }
}
