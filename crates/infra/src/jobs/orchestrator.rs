//! Job orchestration: lifecycle, executor hand-off, callbacks and governance.
//!
//! The orchestrator owns every job record. It never processes bulk work; it
//! submits a [`WorkDescriptor`] to the external executor and folds the
//! executor's callbacks back into the job. Every mutation goes through
//! [`JobStore::modify`], so cancel, callbacks and the sweep are serialized
//! per job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use subprov_core::{JobId, ProvisioningError, ProvisioningMode, ProvisioningResult};

use super::artifacts::{InputArtifacts, InputHandle};
use super::executor::{JobExecutor, WorkDescriptor};
use super::store::{JobFilter, JobStats, JobStore, JobStoreError};
use super::types::{Job, JobCounters, JobParams, JobReason, JobStatus, JobTransitionError, JobType};
use crate::config::GovernanceConfig;

const EVENT_CAPACITY: usize = 256;

/// Returned by CreateJob and CopyJob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTicket {
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_handle: Option<InputHandle>,
}

/// Result of an executor callback.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Applied(Job),
    /// The job was already terminal; nothing changed.
    Ignored { status: JobStatus },
}

impl CallbackOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CallbackOutcome::Applied(_))
    }
}

/// Push notification emitted on every accepted change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub counters: JobCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<JobReason>,
    pub at: DateTime<Utc>,
}

impl JobEvent {
    fn of(job: &Job) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            counters: job.counters,
            reason: job.reason.clone(),
            at: job.updated_at,
        }
    }
}

/// Outcome of one governance sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub timed_out: Vec<JobId>,
}

impl From<JobStoreError> for ProvisioningError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => ProvisioningError::JobNotFound(id),
            JobStoreError::Rejected { job_id, source } => {
                ProvisioningError::invalid_transition(job_id, source.to_string())
            }
            other => ProvisioningError::Storage(other.to_string()),
        }
    }
}

fn already_terminal(err: &JobStoreError) -> Option<JobStatus> {
    match err {
        JobStoreError::Rejected {
            source: JobTransitionError::AlreadyTerminal(status),
            ..
        } => Some(*status),
        _ => None,
    }
}

/// Owns the job lifecycle.
pub struct JobOrchestrator<S: JobStore> {
    store: S,
    executor: Arc<dyn JobExecutor>,
    artifacts: Arc<dyn InputArtifacts>,
    governance: GovernanceConfig,
    events: broadcast::Sender<JobEvent>,
}

impl<S: JobStore> JobOrchestrator<S> {
    pub fn new(
        store: S,
        executor: Arc<dyn JobExecutor>,
        artifacts: Arc<dyn InputArtifacts>,
        governance: GovernanceConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            executor,
            artifacts,
            governance,
            events,
        }
    }

    pub fn executor(&self) -> &Arc<dyn JobExecutor> {
        &self.executor
    }

    pub fn governance(&self) -> &GovernanceConfig {
        &self.governance
    }

    /// Subscribe to job change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn emit(&self, job: &Job) {
        // No subscribers is fine.
        let _ = self.events.send(JobEvent::of(job));
    }

    /// CreateJob: validate, persist, and either issue an input handle or
    /// submit straight away.
    pub async fn create_job(
        &self,
        job_type: JobType,
        mode: ProvisioningMode,
        params: JobParams,
    ) -> ProvisioningResult<JobTicket> {
        job_type
            .validate_mode(mode)
            .map_err(ProvisioningError::Validation)?;
        if let Some(scope) = &params.audit_scope {
            if job_type != JobType::Audit {
                return Err(ProvisioningError::validation(
                    "audit scope is only valid for audit jobs",
                ));
            }
            scope.validate().map_err(ProvisioningError::Validation)?;
        }

        self.admit(Job::new(job_type, mode, params)).await
    }

    /// CopyJob: fresh job with the original's type, mode and params.
    pub async fn copy_job(&self, job_id: JobId) -> ProvisioningResult<JobTicket> {
        let original = self.get_job(job_id)?;
        if !original.is_terminal() {
            return Err(ProvisioningError::invalid_transition(
                job_id,
                format!("only terminal jobs can be copied, job is {}", original.status.as_str()),
            ));
        }

        self.admit(Job::copy_of(&original)).await
    }

    async fn admit(&self, mut job: Job) -> ProvisioningResult<JobTicket> {
        let job_id = job.job_id;

        let input_handle = if job.job_type.requires_input() {
            let handle = self
                .artifacts
                .issue(job_id)
                .await
                .map_err(|e| ProvisioningError::ExternalUnavailable(e.to_string()))?;
            job = job.with_input_handle(handle.clone());
            Some(handle)
        } else {
            None
        };

        let submit_now = job.status == JobStatus::InProgress;
        self.store.insert(job.clone())?;
        info!(
            job_id = %job_id,
            job_type = job.job_type.type_name(),
            mode = ?job.mode,
            status = job.status.as_str(),
            copied_from = ?job.copied_from_job_id,
            "job created"
        );
        self.emit(&job);

        if submit_now {
            self.submit(&job).await?;
        }

        Ok(JobTicket {
            job_id,
            input_handle,
        })
    }

    pub fn get_job(&self, job_id: JobId) -> ProvisioningResult<Job> {
        self.store
            .get(job_id)?
            .ok_or(ProvisioningError::JobNotFound(job_id))
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> ProvisioningResult<Vec<Job>> {
        Ok(self.store.list(filter)?)
    }

    pub fn stats(&self) -> ProvisioningResult<JobStats> {
        Ok(self.store.stats()?)
    }

    /// External trigger: the input file for `job_id` has been uploaded.
    pub async fn input_ready(&self, job_id: JobId) -> ProvisioningResult<Job> {
        let current = self.get_job(job_id)?;
        let handle = current.input_handle.clone().ok_or_else(|| {
            ProvisioningError::invalid_transition(job_id, "job has no input handle")
        })?;

        let now = Utc::now();
        let key = handle.key.clone();
        let job = self
            .store
            .modify(job_id, &mut |job| job.mark_input_ready(key.clone(), now))?;
        info!(job_id = %job_id, source_ref = %handle.key, "job input ready");
        self.emit(&job);

        // The upload is consumed; its handle must not accept further writes.
        if let Err(e) = self.artifacts.revoke(&handle).await {
            warn!(job_id = %job_id, error = %e, "failed to revoke input handle");
        }

        self.submit(&job).await
    }

    /// Hand the job to the executor. A submit failure fails the job rather
    /// than the caller's request.
    async fn submit(&self, job: &Job) -> ProvisioningResult<Job> {
        let job_id = job.job_id;
        let work = WorkDescriptor {
            job_id,
            job_type: job.job_type,
            mode: job.mode,
            source_ref: job.source_ref.clone(),
            params: job.params.clone(),
        };

        match self.executor.submit(work).await {
            Ok(run) => {
                let now = Utc::now();
                let attached = self
                    .store
                    .modify(job_id, &mut |job| job.attach_executor(run.clone(), now));
                match attached {
                    Ok(job) => {
                        info!(job_id = %job_id, executor_ref = %run, "job submitted");
                        Ok(job)
                    }
                    Err(err) if already_terminal(&err).is_some() => {
                        // Canceled or timed out while submitting.
                        debug!(job_id = %job_id, executor_ref = %run, "job ended during submit; stopping run");
                        if let Err(e) = self.executor.cancel(&run).await {
                            warn!(job_id = %job_id, error = %e, "failed to stop orphaned run");
                        }
                        self.get_job(job_id)
                    }
                    Err(err) => Err(err.into()),
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "executor rejected job");
                let reason = JobReason::Executor(e.to_string());
                let now = Utc::now();
                let failed = self.store.modify(job_id, &mut |job| {
                    job.finish(JobStatus::Failed, Some(reason.clone()), now)
                });
                match failed {
                    Ok(job) => {
                        self.emit(&job);
                        Ok(job)
                    }
                    Err(err) if already_terminal(&err).is_some() => self.get_job(job_id),
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    /// CancelJob: local state becomes CANCELED immediately; the executor is
    /// asked to stop on a best-effort basis.
    pub async fn cancel_job(&self, job_id: JobId) -> ProvisioningResult<Job> {
        let now = Utc::now();
        let job = self.store.modify(job_id, &mut |job| job.cancel(now))?;
        info!(job_id = %job_id, "job canceled");
        self.emit(&job);

        self.release_external(&job).await;
        Ok(job)
    }

    /// Stop the executor run and revoke an unconsumed input handle.
    async fn release_external(&self, job: &Job) {
        if let Some(run) = &job.executor_ref {
            if let Err(e) = self.executor.cancel(run).await {
                warn!(job_id = %job.job_id, executor_ref = %run, error = %e, "executor cancel failed");
            }
        }
        if job.started_at.is_none() {
            if let Some(handle) = &job.input_handle {
                if let Err(e) = self.artifacts.revoke(handle).await {
                    warn!(job_id = %job.job_id, error = %e, "failed to revoke input handle");
                }
            }
        }
    }

    /// Executor progress callback. Ignored when the job is already terminal.
    pub fn report_progress(
        &self,
        job_id: JobId,
        counters: JobCounters,
    ) -> ProvisioningResult<CallbackOutcome> {
        let now = Utc::now();
        match self
            .store
            .modify(job_id, &mut |job| job.apply_progress(counters, now))
        {
            Ok(job) => {
                debug!(
                    job_id = %job_id,
                    total = job.counters.total,
                    processed = job.counters.processed(),
                    "job progress"
                );
                self.emit(&job);
                Ok(CallbackOutcome::Applied(job))
            }
            Err(err) => {
                if let Some(status) = already_terminal(&err) {
                    debug!(job_id = %job_id, status = status.as_str(), "progress for terminal job ignored");
                    return Ok(CallbackOutcome::Ignored { status });
                }
                warn!(job_id = %job_id, error = %err, "progress rejected");
                Err(err.into())
            }
        }
    }

    /// Executor terminal callback. Only COMPLETED and FAILED are accepted;
    /// CANCELED is reached through [`Self::cancel_job`].
    pub fn report_terminal(
        &self,
        job_id: JobId,
        status: JobStatus,
        reason: Option<String>,
    ) -> ProvisioningResult<CallbackOutcome> {
        let reason = match status {
            JobStatus::Completed => None,
            JobStatus::Failed => Some(JobReason::Executor(
                reason.unwrap_or_else(|| "executor reported failure".to_string()),
            )),
            other => {
                return Err(ProvisioningError::validation(format!(
                    "executor cannot report {} as terminal status",
                    other.as_str()
                )));
            }
        };

        let now = Utc::now();
        match self
            .store
            .modify(job_id, &mut |job| job.finish(status, reason.clone(), now))
        {
            Ok(job) => {
                info!(job_id = %job_id, status = status.as_str(), reason = ?job.reason, "job finished");
                self.emit(&job);
                Ok(CallbackOutcome::Applied(job))
            }
            Err(err) => match already_terminal(&err) {
                Some(current) => {
                    info!(
                        job_id = %job_id,
                        status = current.as_str(),
                        reported = status.as_str(),
                        "late terminal callback ignored"
                    );
                    Ok(CallbackOutcome::Ignored { status: current })
                }
                None => Err(err.into()),
            },
        }
    }

    /// Fail every non-terminal job that has outlived its governance ceiling
    /// as of `now`.
    ///
    /// Each transition is a compare-and-set on the status observed during
    /// the scan; a job that moved in the meantime is left alone.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> ProvisioningResult<SweepReport> {
        let mut report = SweepReport::default();

        for status in [JobStatus::PendingUpload, JobStatus::InProgress] {
            for job in self.store.list(&JobFilter::with_status(status))? {
                report.examined += 1;
                if !self.is_expired(&job, now) {
                    continue;
                }

                let timed_out = self.store.compare_and_set(job.job_id, status, &mut |job| {
                    job.finish(JobStatus::Failed, Some(JobReason::Timeout), now)
                });
                match timed_out {
                    Ok(job) => {
                        warn!(
                            job_id = %job.job_id,
                            job_type = job.job_type.type_name(),
                            was = status.as_str(),
                            "job exceeded governance ceiling; marked FAILED"
                        );
                        self.emit(&job);
                        self.release_external(&job).await;
                        report.timed_out.push(job.job_id);
                    }
                    Err(JobStoreError::Rejected { .. }) => {
                        debug!(job_id = %job.job_id, "job moved during sweep; skipped");
                    }
                    Err(err) => {
                        error!(job_id = %job.job_id, error = %err, "timeout transition failed");
                    }
                }
            }
        }

        Ok(report)
    }

    fn is_expired(&self, job: &Job, now: DateTime<Utc>) -> bool {
        let Some(anchor) = job.governance_anchor() else {
            return false;
        };
        let ceiling = self.governance.ceiling_for(job.job_type);
        match (now - anchor).to_std() {
            Ok(elapsed) => elapsed > ceiling,
            // Anchor in the future.
            Err(_) => false,
        }
    }
}
