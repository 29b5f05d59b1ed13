//! Job storage implementations.
//!
//! All state changes go through [`JobStore::modify`], which applies a
//! mutation atomically with respect to other writers of the same job. The
//! mutation only commits when it returns `Ok`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use subprov_core::{JobId, ProvisioningMode};

use super::types::{Job, JobStatus, JobTransitionError, JobType};

/// In-place job mutation used by [`JobStore::modify`].
pub type JobMutation<'a> = &'a mut dyn FnMut(&mut Job) -> Result<(), JobTransitionError>;

/// Job store abstraction.
pub trait JobStore: Send + Sync {
    /// Persist a new job.
    fn insert(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// List jobs matching `filter`, oldest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError>;

    /// Atomically read-modify-write a job. Returns the updated job.
    fn modify(&self, job_id: JobId, mutation: JobMutation<'_>) -> Result<Job, JobStoreError>;

    /// Apply `mutation` only if the job is still in `expected` status.
    fn compare_and_set(
        &self,
        job_id: JobId,
        expected: JobStatus,
        mutation: JobMutation<'_>,
    ) -> Result<Job, JobStoreError> {
        self.modify(job_id, &mut |job| {
            if job.status != expected {
                return Err(JobTransitionError::StatusChanged {
                    expected,
                    actual: job.status,
                });
            }
            mutation(job)
        })
    }

    /// Get job statistics.
    fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("transition rejected for {job_id}: {source}")]
    Rejected {
        job_id: JobId,
        #[source]
        source: JobTransitionError,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Filters for [`JobStore::list`]. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
    pub mode: Option<ProvisioningMode>,
    pub copied_from: Option<JobId>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn of_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, job: &Job) -> bool {
        self.job_type.is_none_or(|t| job.job_type == t)
            && self.status.is_none_or(|s| job.status == s)
            && self.mode.is_none_or(|m| job.mode == m)
            && self
                .copied_from
                .is_none_or(|id| job.copied_from_job_id == Some(id))
    }
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending_upload: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,
}

impl JobStats {
    pub fn active(&self) -> usize {
        self.pending_upload + self.in_progress
    }
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned() -> JobStoreError {
    JobStoreError::Storage("job store lock poisoned".to_string())
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        if jobs.contains_key(&job.job_id) {
            return Err(JobStoreError::AlreadyExists(job.job_id));
        }
        let id = job.job_id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(jobs.get(&job_id).cloned())
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();

        result.sort_by_key(|j| (j.created_at, j.job_id));
        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    fn modify(&self, job_id: JobId, mutation: JobMutation<'_>) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let current = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;

        // Work on a copy so a rejected mutation leaves no partial changes.
        let mut next = current.clone();
        mutation(&mut next).map_err(|source| JobStoreError::Rejected { job_id, source })?;
        *current = next.clone();
        Ok(next)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut stats = JobStats::default();

        for job in jobs.values() {
            match job.status {
                JobStatus::PendingUpload => stats.pending_upload += 1,
                JobStatus::InProgress => stats.in_progress += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Canceled => stats.canceled += 1,
            }
        }

        Ok(stats)
    }
}

impl<T: JobStore + ?Sized> JobStore for Arc<T> {
    fn insert(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).insert(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(job_id)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        (**self).list(filter)
    }

    fn modify(&self, job_id: JobId, mutation: JobMutation<'_>) -> Result<Job, JobStoreError> {
        (**self).modify(job_id, mutation)
    }

    fn compare_and_set(
        &self,
        job_id: JobId,
        expected: JobStatus,
        mutation: JobMutation<'_>,
    ) -> Result<Job, JobStoreError> {
        (**self).compare_and_set(job_id, expected, mutation)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats()
    }
}
