//! Boundary to the external bulk job executor.
//!
//! The orchestrator never runs bulk work itself. It hands a
//! [`WorkDescriptor`] to a [`JobExecutor`] and learns about progress through
//! callbacks or by polling [`JobExecutor::status`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use subprov_core::{JobId, ProvisioningMode};

use super::types::{JobCounters, JobParams, JobType};

/// Opaque identifier of a run on the executor side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutorRef(String);

impl ExecutorRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the executor needs to run a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkDescriptor {
    pub job_id: JobId,
    pub job_type: JobType,
    pub mode: ProvisioningMode,
    pub source_ref: Option<String>,
    pub params: JobParams,
}

/// Executor-side state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutorRunState {
    Queued,
    Running,
    Succeeded,
    Failed { reason: String },
    /// Stopped after a cancel request.
    Stopped,
}

impl ExecutorRunState {
    pub(crate) fn is_finished(&self) -> bool {
        matches!(
            self,
            ExecutorRunState::Succeeded | ExecutorRunState::Failed { .. } | ExecutorRunState::Stopped
        )
    }
}

/// Snapshot returned by [`JobExecutor::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorRunStatus {
    pub state: ExecutorRunState,
    pub counters: JobCounters,
}

/// Executor error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("executor unavailable: {0}")]
    Unavailable(String),
    #[error("executor rejected work: {0}")]
    Rejected(String),
    #[error("unknown executor run: {0}")]
    UnknownRun(ExecutorRef),
}

/// Bulk job executor.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Start a run for `work`.
    async fn submit(&self, work: WorkDescriptor) -> Result<ExecutorRef, ExecutorError>;

    /// Ask the executor to stop a run. Best effort.
    async fn cancel(&self, run: &ExecutorRef) -> Result<(), ExecutorError>;

    async fn status(&self, run: &ExecutorRef) -> Result<ExecutorRunStatus, ExecutorError>;
}

#[derive(Debug, Default)]
struct ExecutorState {
    submissions: Vec<(ExecutorRef, WorkDescriptor)>,
    statuses: HashMap<ExecutorRef, ExecutorRunStatus>,
    canceled: Vec<ExecutorRef>,
    next_failure: Option<ExecutorError>,
    seq: u64,
}

/// In-process executor for tests/dev. Records submissions and cancels; run
/// status is driven by the test through [`InMemoryExecutor::set_status`].
#[derive(Debug, Default)]
pub struct InMemoryExecutor {
    state: Mutex<ExecutorState>,
}

impl InMemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next executor call fail with `err`.
    pub fn fail_next(&self, err: ExecutorError) {
        if let Ok(mut state) = self.state.lock() {
            state.next_failure = Some(err);
        }
    }

    pub fn set_status(&self, run: &ExecutorRef, status: ExecutorRunStatus) {
        if let Ok(mut state) = self.state.lock() {
            state.statuses.insert(run.clone(), status);
        }
    }

    /// Work submitted so far, in order.
    pub fn submissions(&self) -> Vec<WorkDescriptor> {
        self.state
            .lock()
            .map(|s| s.submissions.iter().map(|(_, w)| w.clone()).collect())
            .unwrap_or_default()
    }

    /// The run started for `job_id`, if any.
    pub fn run_for(&self, job_id: JobId) -> Option<ExecutorRef> {
        let state = self.state.lock().ok()?;
        state
            .submissions
            .iter()
            .find(|(_, w)| w.job_id == job_id)
            .map(|(r, _)| r.clone())
    }

    pub fn canceled(&self) -> Vec<ExecutorRef> {
        self.state
            .lock()
            .map(|s| s.canceled.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ExecutorState>, ExecutorError> {
        self.state
            .lock()
            .map_err(|_| ExecutorError::Unavailable("executor state poisoned".to_string()))
    }
}

#[async_trait]
impl JobExecutor for InMemoryExecutor {
    async fn submit(&self, work: WorkDescriptor) -> Result<ExecutorRef, ExecutorError> {
        let mut state = self.lock()?;
        if let Some(err) = state.next_failure.take() {
            return Err(err);
        }

        state.seq += 1;
        let run = ExecutorRef::new(format!("run-{}", state.seq));
        state.statuses.insert(
            run.clone(),
            ExecutorRunStatus {
                state: ExecutorRunState::Queued,
                counters: JobCounters::default(),
            },
        );
        state.submissions.push((run.clone(), work));
        Ok(run)
    }

    async fn cancel(&self, run: &ExecutorRef) -> Result<(), ExecutorError> {
        let mut state = self.lock()?;
        if let Some(err) = state.next_failure.take() {
            return Err(err);
        }

        let status = state
            .statuses
            .get_mut(run)
            .ok_or_else(|| ExecutorError::UnknownRun(run.clone()))?;
        if !status.state.is_finished() {
            status.state = ExecutorRunState::Stopped;
        }
        state.canceled.push(run.clone());
        Ok(())
    }

    async fn status(&self, run: &ExecutorRef) -> Result<ExecutorRunStatus, ExecutorError> {
        let mut state = self.lock()?;
        if let Some(err) = state.next_failure.take() {
            return Err(err);
        }

        state
            .statuses
            .get(run)
            .cloned()
            .ok_or_else(|| ExecutorError::UnknownRun(run.clone()))
    }
}
