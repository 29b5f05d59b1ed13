//! Write locations for job input files.
//!
//! Callers upload input files out of band. The orchestrator issues a handle
//! at job creation and revokes it once the input has been consumed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use subprov_core::JobId;

/// Pre-authorized location the caller uploads the input file to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputHandle {
    /// Object key the executor later reads from.
    pub key: String,
    pub upload_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Artifact service error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact service unavailable: {0}")]
    Unavailable(String),
    #[error("unknown input handle: {0}")]
    UnknownHandle(String),
}

/// Issues and revokes input upload locations.
#[async_trait]
pub trait InputArtifacts: Send + Sync {
    /// Issue a fresh, unique handle for `job_id`.
    async fn issue(&self, job_id: JobId) -> Result<InputHandle, ArtifactError>;

    /// Invalidate a handle. Revoking twice is not an error.
    async fn revoke(&self, handle: &InputHandle) -> Result<(), ArtifactError>;
}

/// In-memory artifact service for tests/dev.
#[derive(Debug)]
pub struct InMemoryInputArtifacts {
    base_url: String,
    ttl: Duration,
    // key -> revoked
    handles: Mutex<HashMap<String, bool>>,
}

impl Default for InMemoryInputArtifacts {
    fn default() -> Self {
        Self::new("memory://uploads")
    }
}

impl InMemoryInputArtifacts {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ttl: Duration::from_secs(60 * 60),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_revoked(&self, handle: &InputHandle) -> bool {
        self.handles
            .lock()
            .ok()
            .and_then(|h| h.get(&handle.key).copied())
            .unwrap_or(false)
    }

    pub fn issued(&self) -> usize {
        self.handles.lock().map(|h| h.len()).unwrap_or(0)
    }
}

fn poisoned() -> ArtifactError {
    ArtifactError::Unavailable("artifact registry poisoned".to_string())
}

#[async_trait]
impl InputArtifacts for InMemoryInputArtifacts {
    async fn issue(&self, job_id: JobId) -> Result<InputHandle, ArtifactError> {
        let key = format!("uploads/{job_id}/{}.csv", Uuid::now_v7());
        let handle = InputHandle {
            upload_url: format!("{}/{key}", self.base_url.trim_end_matches('/')),
            key: key.clone(),
            expires_at: Utc::now()
                + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(1)),
        };

        self.handles.lock().map_err(|_| poisoned())?.insert(key, false);
        Ok(handle)
    }

    async fn revoke(&self, handle: &InputHandle) -> Result<(), ArtifactError> {
        let mut handles = self.handles.lock().map_err(|_| poisoned())?;
        let revoked = handles
            .get_mut(&handle.key)
            .ok_or_else(|| ArtifactError::UnknownHandle(handle.key.clone()))?;
        *revoked = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handles_are_unique_per_issue() {
        let artifacts = InMemoryInputArtifacts::default();
        let job_id = JobId::new();

        let a = artifacts.issue(job_id).await.unwrap();
        let b = artifacts.issue(job_id).await.unwrap();

        assert_ne!(a.key, b.key);
        assert!(a.key.starts_with(&format!("uploads/{job_id}/")));
        assert!(a.upload_url.ends_with(&a.key));
        assert!(a.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let artifacts = InMemoryInputArtifacts::default();
        let handle = artifacts.issue(JobId::new()).await.unwrap();

        artifacts.revoke(&handle).await.unwrap();
        artifacts.revoke(&handle).await.unwrap();
        assert!(artifacts.is_revoked(&handle));
    }
}
