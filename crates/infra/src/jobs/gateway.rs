//! Caller-facing view of job progress.
//!
//! Pull through [`JobStatusGateway::get`], push through
//! [`JobStatusGateway::subscribe`]. Polling the executor feeds the same
//! callback path the executor itself uses, so both sources obey the same
//! lifecycle rules. Silence from the executor is never read as failure; only
//! the governance sweep fails a quiet job.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use subprov_core::{JobId, ProvisioningError, ProvisioningResult};

use super::executor::ExecutorRunState;
use super::orchestrator::{JobEvent, JobOrchestrator};
use super::store::{JobFilter, JobStore};
use super::types::{Job, JobStatus};

/// Job plus derived progress fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    pub is_terminal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<f64>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            is_terminal: job.is_terminal(),
            percent_complete: job.counters.percent_complete(),
            job,
        }
    }
}

pub struct JobStatusGateway<S: JobStore> {
    orchestrator: Arc<JobOrchestrator<S>>,
}

impl<S: JobStore> JobStatusGateway<S> {
    pub fn new(orchestrator: Arc<JobOrchestrator<S>>) -> Self {
        Self { orchestrator }
    }

    pub fn get(&self, job_id: JobId) -> ProvisioningResult<JobView> {
        self.orchestrator.get_job(job_id).map(JobView::from)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.orchestrator.subscribe()
    }

    /// Poll the executor's status API for `job_id` and apply what it says.
    pub async fn refresh_from_executor(&self, job_id: JobId) -> ProvisioningResult<JobView> {
        let job = self.orchestrator.get_job(job_id)?;
        if job.is_terminal() {
            return Ok(job.into());
        }
        let Some(run) = job.executor_ref.clone() else {
            // Not submitted yet.
            return Ok(job.into());
        };

        let status = self
            .orchestrator
            .executor()
            .status(&run)
            .await
            .map_err(|e| ProvisioningError::ExternalUnavailable(e.to_string()))?;
        debug!(job_id = %job_id, executor_ref = %run, state = ?status.state, "executor status polled");

        if status.counters != job.counters {
            if let Err(e) = self.orchestrator.report_progress(job_id, status.counters) {
                warn!(job_id = %job_id, error = %e, "executor status carried invalid progress");
            }
        }

        match status.state {
            ExecutorRunState::Queued | ExecutorRunState::Running => {}
            ExecutorRunState::Succeeded => {
                self.orchestrator
                    .report_terminal(job_id, JobStatus::Completed, None)?;
            }
            ExecutorRunState::Failed { reason } => {
                self.orchestrator
                    .report_terminal(job_id, JobStatus::Failed, Some(reason))?;
            }
            ExecutorRunState::Stopped => {
                // Stopped without a local cancel.
                self.orchestrator.report_terminal(
                    job_id,
                    JobStatus::Failed,
                    Some("run stopped by executor".to_string()),
                )?;
            }
        }

        self.get(job_id)
    }

    /// Refresh every IN_PROGRESS job. Returns how many were polled.
    pub async fn refresh_in_progress(&self) -> ProvisioningResult<usize> {
        let jobs = self
            .orchestrator
            .list_jobs(&JobFilter::with_status(JobStatus::InProgress))?;

        let mut polled = 0;
        for job in jobs {
            match self.refresh_from_executor(job.job_id).await {
                Ok(_) => polled += 1,
                Err(e) => warn!(job_id = %job.job_id, error = %e, "status refresh failed"),
            }
        }
        Ok(polled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GovernanceConfig;
    use crate::jobs::artifacts::InMemoryInputArtifacts;
    use crate::jobs::executor::{ExecutorError, ExecutorRunStatus, InMemoryExecutor};
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::{JobCounters, JobParams, JobReason, JobType};
    use subprov_core::ProvisioningMode;

    fn gateway() -> (
        JobStatusGateway<Arc<InMemoryJobStore>>,
        Arc<JobOrchestrator<Arc<InMemoryJobStore>>>,
        Arc<InMemoryExecutor>,
    ) {
        let executor = Arc::new(InMemoryExecutor::new());
        let orchestrator = Arc::new(JobOrchestrator::new(
            InMemoryJobStore::arc(),
            executor.clone(),
            Arc::new(InMemoryInputArtifacts::default()),
            GovernanceConfig::default(),
        ));
        (
            JobStatusGateway::new(orchestrator.clone()),
            orchestrator,
            executor,
        )
    }

    async fn export(orchestrator: &JobOrchestrator<Arc<InMemoryJobStore>>) -> JobId {
        orchestrator
            .create_job(JobType::Export, ProvisioningMode::Cloud, JobParams::default())
            .await
            .unwrap()
            .job_id
    }

    #[tokio::test]
    async fn polling_applies_progress_then_completion() {
        let (gateway, orchestrator, executor) = gateway();
        let job_id = export(&orchestrator).await;
        let run = executor.run_for(job_id).unwrap();

        executor.set_status(
            &run,
            ExecutorRunStatus {
                state: ExecutorRunState::Running,
                counters: JobCounters::new(4, 1, 0, 1),
            },
        );
        let view = gateway.refresh_from_executor(job_id).await.unwrap();
        assert_eq!(view.job.status, JobStatus::InProgress);
        assert_eq!(view.percent_complete, Some(50.0));

        executor.set_status(
            &run,
            ExecutorRunStatus {
                state: ExecutorRunState::Succeeded,
                counters: JobCounters::new(4, 3, 0, 1),
            },
        );
        let view = gateway.refresh_from_executor(job_id).await.unwrap();
        assert_eq!(view.job.status, JobStatus::Completed);
        assert!(view.is_terminal);
        assert_eq!(view.job.counters.processed(), 4);
    }

    #[tokio::test]
    async fn executor_failure_is_recorded_with_reason() {
        let (gateway, orchestrator, executor) = gateway();
        let job_id = export(&orchestrator).await;
        let run = executor.run_for(job_id).unwrap();

        executor.set_status(
            &run,
            ExecutorRunStatus {
                state: ExecutorRunState::Failed {
                    reason: "bucket missing".to_string(),
                },
                counters: JobCounters::default(),
            },
        );
        let view = gateway.refresh_from_executor(job_id).await.unwrap();
        assert_eq!(view.job.status, JobStatus::Failed);
        assert_eq!(
            view.job.reason,
            Some(JobReason::Executor("bucket missing".to_string()))
        );
    }

    #[tokio::test]
    async fn unreachable_executor_is_not_a_failure() {
        let (gateway, orchestrator, executor) = gateway();
        let job_id = export(&orchestrator).await;

        executor.fail_next(ExecutorError::Unavailable("timeout".to_string()));
        let err = gateway.refresh_from_executor(job_id).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(gateway.get(job_id).unwrap().job.status, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn refresh_in_progress_polls_running_jobs() {
        let (gateway, orchestrator, _executor) = gateway();
        export(&orchestrator).await;
        export(&orchestrator).await;
        orchestrator
            .create_job(JobType::Migration, ProvisioningMode::Dual, JobParams::default())
            .await
            .unwrap();

        assert_eq!(gateway.refresh_in_progress().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn push_channel_sees_callbacks() {
        let (gateway, orchestrator, _executor) = gateway();
        let mut rx = gateway.subscribe();
        let job_id = export(&orchestrator).await;
        orchestrator
            .report_terminal(job_id, JobStatus::Completed, None)
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().status, JobStatus::InProgress);
        assert_eq!(rx.recv().await.unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn view_serializes_flat() {
        let job = Job::new(JobType::Export, ProvisioningMode::Cloud, JobParams::default());
        let json = serde_json::to_value(JobView::from(job)).unwrap();
        assert_eq!(json["status"], "IN_PROGRESS");
        assert_eq!(json["isTerminal"], false);
        assert!(json.get("percentComplete").is_none());
    }
}
