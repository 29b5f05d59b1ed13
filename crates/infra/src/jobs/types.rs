//! Core job types and lifecycle rules.
//!
//! ```text
//! PENDING_UPLOAD ──input ready──▶ IN_PROGRESS ──▶ COMPLETED | FAILED | CANCELED
//!        │                             │
//!        └──── cancel / timeout ───────┴──▶ CANCELED | FAILED
//! ```
//!
//! Terminal states are final: every mutator below refuses to touch a
//! terminal job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use subprov_core::{JobId, ProvisioningMode};

use super::artifacts::InputHandle;
use super::executor::ExecutorRef;
use crate::audit::AuditScope;

/// Kind of bulk job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Migration,
    BulkDelete,
    Audit,
    Export,
}

impl JobType {
    pub fn type_name(&self) -> &'static str {
        match self {
            JobType::Migration => "migration",
            JobType::BulkDelete => "bulk_delete",
            JobType::Audit => "audit",
            JobType::Export => "export",
        }
    }

    /// Whether the job waits for an out-of-band uploaded input file.
    pub fn requires_input(&self) -> bool {
        matches!(self, JobType::Migration | JobType::BulkDelete)
    }

    /// Check that `mode` makes sense for this job type.
    pub fn validate_mode(&self, mode: ProvisioningMode) -> Result<(), String> {
        let allowed = match self {
            // Migration targets Cloud; Dual keeps Legacy written too.
            JobType::Migration => matches!(mode, ProvisioningMode::Cloud | ProvisioningMode::Dual),
            JobType::BulkDelete => true,
            // Auditing compares both stores.
            JobType::Audit => mode == ProvisioningMode::Dual,
            // Export reads a single source.
            JobType::Export => matches!(mode, ProvisioningMode::Cloud | ProvisioningMode::Legacy),
        };

        if allowed {
            Ok(())
        } else {
            Err(format!(
                "{} jobs cannot run in {:?} mode",
                self.type_name(),
                mode
            ))
        }
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting for the caller to upload the input file.
    PendingUpload,
    /// Handed to the executor.
    InProgress,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::PendingUpload => "PENDING_UPLOAD",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Canceled => "CANCELED",
        }
    }
}

/// Why a job ended up FAILED or CANCELED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobReason {
    /// Governance ceiling exceeded without a terminal callback.
    Timeout,
    /// Canceled through the job API.
    Canceled,
    /// Reported by (or while talking to) the executor.
    Executor(String),
}

/// Progress counters reported by the executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl JobCounters {
    pub fn new(total: u64, succeeded: u64, failed: u64, skipped: u64) -> Self {
        Self {
            total,
            succeeded,
            failed,
            skipped,
        }
    }

    /// `succeeded + failed + skipped`.
    pub fn processed(&self) -> u64 {
        self.succeeded
            .saturating_add(self.failed)
            .saturating_add(self.skipped)
    }

    pub fn percent_complete(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some(self.processed() as f64 * 100.0 / self.total as f64)
    }

    /// Validate `next` as a successor of `self`.
    ///
    /// - the first non-zero `total` fixes the total; it never changes after
    /// - each counter is non-decreasing
    /// - the processed sum never exceeds the total
    pub fn check_advance(&self, next: &JobCounters) -> Result<(), String> {
        if self.total != 0 && next.total != self.total {
            return Err(format!(
                "total changed from {} to {}",
                self.total, next.total
            ));
        }
        if next.succeeded < self.succeeded || next.failed < self.failed || next.skipped < self.skipped
        {
            return Err("counters must not decrease".to_string());
        }
        if next.processed() > next.total {
            return Err(format!(
                "processed {} exceeds total {}",
                next.processed(),
                next.total
            ));
        }
        Ok(())
    }
}

/// Caller-supplied job configuration. Copied verbatim by CopyJob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParams {
    /// Source reference for input-less jobs (e.g. an export target prefix).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_scope: Option<AuditScope>,
    /// Opaque executor options.
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Reasons a lifecycle mutation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobTransitionError {
    #[error("job is already terminal ({0:?})")]
    AlreadyTerminal(JobStatus),
    #[error("cannot move from {from:?} to {to:?}")]
    InvalidState { from: JobStatus, to: JobStatus },
    #[error("status changed: expected {expected:?}, found {actual:?}")]
    StatusChanged { expected: JobStatus, actual: JobStatus },
    #[error("invalid progress: {0}")]
    InvalidProgress(String),
}

/// A bulk job owned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub mode: ProvisioningMode,
    pub params: JobParams,
    /// Input the executor processes (uploaded file key, export target).
    pub source_ref: Option<String>,
    /// Write location issued for the input upload.
    pub input_handle: Option<InputHandle>,
    pub counters: JobCounters,
    pub executor_ref: Option<ExecutorRef>,
    pub reason: Option<JobReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub copied_from_job_id: Option<JobId>,
}

impl Job {
    /// Create a job in its initial state: PENDING_UPLOAD for types that need
    /// an input file, IN_PROGRESS otherwise.
    pub fn new(job_type: JobType, mode: ProvisioningMode, params: JobParams) -> Self {
        let now = Utc::now();
        let (status, started_at, source_ref) = if job_type.requires_input() {
            (JobStatus::PendingUpload, None, None)
        } else {
            (JobStatus::InProgress, Some(now), params.source_ref.clone())
        };

        Self {
            job_id: JobId::new(),
            job_type,
            status,
            mode,
            params,
            source_ref,
            input_handle: None,
            counters: JobCounters::default(),
            executor_ref: None,
            reason: None,
            created_at: now,
            updated_at: now,
            started_at,
            finished_at: None,
            copied_from_job_id: None,
        }
    }

    /// Fresh job with this job's type, mode and params.
    ///
    /// Input handle, source reference and executor run are never carried over.
    pub fn copy_of(original: &Job) -> Self {
        let mut job = Job::new(original.job_type, original.mode, original.params.clone());
        job.copied_from_job_id = Some(original.job_id);
        job
    }

    pub fn with_input_handle(mut self, handle: InputHandle) -> Self {
        self.input_handle = Some(handle);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_live(&self) -> Result<(), JobTransitionError> {
        if self.is_terminal() {
            return Err(JobTransitionError::AlreadyTerminal(self.status));
        }
        Ok(())
    }

    /// PENDING_UPLOAD → IN_PROGRESS once the input file exists.
    pub fn mark_input_ready(
        &mut self,
        source_ref: String,
        now: DateTime<Utc>,
    ) -> Result<(), JobTransitionError> {
        self.ensure_live()?;
        if self.status != JobStatus::PendingUpload {
            return Err(JobTransitionError::InvalidState {
                from: self.status,
                to: JobStatus::InProgress,
            });
        }
        self.status = JobStatus::InProgress;
        self.source_ref = Some(source_ref);
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Record the executor run handling this job.
    pub fn attach_executor(
        &mut self,
        executor_ref: ExecutorRef,
        now: DateTime<Utc>,
    ) -> Result<(), JobTransitionError> {
        self.ensure_live()?;
        self.executor_ref = Some(executor_ref);
        self.updated_at = now;
        Ok(())
    }

    /// Apply an executor progress report.
    pub fn apply_progress(
        &mut self,
        counters: JobCounters,
        now: DateTime<Utc>,
    ) -> Result<(), JobTransitionError> {
        self.ensure_live()?;
        if self.status != JobStatus::InProgress {
            return Err(JobTransitionError::InvalidState {
                from: self.status,
                to: JobStatus::InProgress,
            });
        }
        self.counters
            .check_advance(&counters)
            .map_err(JobTransitionError::InvalidProgress)?;
        self.counters = counters;
        self.updated_at = now;
        Ok(())
    }

    /// Move to a terminal status, stamping `finished_at`.
    pub fn finish(
        &mut self,
        status: JobStatus,
        reason: Option<JobReason>,
        now: DateTime<Utc>,
    ) -> Result<(), JobTransitionError> {
        self.ensure_live()?;
        if !status.is_terminal() {
            return Err(JobTransitionError::InvalidState {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.reason = reason;
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), JobTransitionError> {
        self.finish(JobStatus::Canceled, Some(JobReason::Canceled), now)
    }

    /// When the governance clock for the current state started: `started_at`
    /// while running, `created_at` while waiting for input.
    pub fn governance_anchor(&self) -> Option<DateTime<Utc>> {
        match self.status {
            JobStatus::PendingUpload => Some(self.created_at),
            JobStatus::InProgress => Some(self.started_at.unwrap_or(self.created_at)),
            _ => None,
        }
    }
}
