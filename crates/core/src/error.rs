//! Error model for the provisioning core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{JobId, SubscriberUid};
use crate::mode::StoreKind;

/// Result type used across the provisioning core.
pub type ProvisioningResult<T> = Result<T, ProvisioningError>;

/// Failure reported by a single store adapter.
///
/// Adapters map their native driver errors onto this set; the coordinator
/// surfaces it verbatim in single-store modes.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StoreError {
    #[error("subscriber not found: {0}")]
    NotFound(SubscriberUid),

    #[error("subscriber already exists: {0}")]
    AlreadyExists(SubscriberUid),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Transient; the caller may retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Error taxonomy exposed to callers of the coordination core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    /// Bad input; never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("subscriber not found: {0}")]
    NotFound(SubscriberUid),

    #[error("subscriber already exists: {0}")]
    AlreadyExists(SubscriberUid),

    /// Transient; the caller may retry.
    #[error("{store} store unavailable: {reason}")]
    StoreUnavailable { store: StoreKind, reason: String },

    /// Cloud write succeeded, Legacy write failed. Always paired with a
    /// recorded sync conflict.
    #[error("partial write for {uid}: legacy failed: {source}")]
    PartialWriteFailure {
        uid: SubscriberUid,
        #[source]
        source: StoreError,
    },

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("invalid job transition for {job_id}: {reason}")]
    InvalidJobTransition { job_id: JobId, reason: String },

    /// Governance-triggered job failure.
    #[error("job {0} exceeded its governance ceiling")]
    Timeout(JobId),

    /// The job executor or input artifact service could not be reached.
    #[error("external service unavailable: {0}")]
    ExternalUnavailable(String),

    /// The job or conflict store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl ProvisioningError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(job_id: JobId, reason: impl Into<String>) -> Self {
        Self::InvalidJobTransition {
            job_id,
            reason: reason.into(),
        }
    }

    /// Map an adapter failure onto the taxonomy, tagging the store it came from.
    pub fn from_store(store: StoreKind, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(uid) => Self::NotFound(uid),
            StoreError::AlreadyExists(uid) => Self::AlreadyExists(uid),
            StoreError::Validation(msg) => Self::Validation(msg),
            StoreError::Unavailable(reason) => Self::StoreUnavailable { store, reason },
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::ExternalUnavailable(_)
        )
    }
}
