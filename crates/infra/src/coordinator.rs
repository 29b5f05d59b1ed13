//! Provisioning coordinator: one logical subscriber operation against one or
//! both stores.
//!
//! ## Dual-write protocol
//!
//! - Writes go to Cloud first, then Legacy, sequentially.
//! - Cloud failure aborts before Legacy is touched and is returned as-is.
//! - Legacy failure after a Cloud success is absorbed: the Cloud write stays
//!   (no compensating rollback), a `MISSING_IN_LEGACY` conflict is recorded
//!   and the outcome is flagged `partial`. A pending conflict for the same
//!   subscriber is reused. If the conflict store fails, the outcome carries
//!   `conflict_persisted: false`.
//! - Reads prefer Cloud and fall back to Legacy only when Cloud reports
//!   `NotFound`. Records are never merged field-by-field here.
//!
//! Every adapter call is bounded by the configured timeout; expiry surfaces
//! as `StoreUnavailable`. There is no retry at this layer.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use subprov_core::{
    ConflictType, ProvisioningError, ProvisioningMode, ProvisioningResult, StoreError, StoreKind,
    Subscriber, SubscriberStatus, SubscriberUid, SyncConflict,
};

use crate::adapters::StoreAdapter;
use crate::config::CoordinatorConfig;
use crate::conflict_store::ConflictStore;

/// A single logical subscriber operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberOp {
    Create(Subscriber),
    Read(SubscriberUid),
    Update(Subscriber),
    Delete(SubscriberUid),
}

impl SubscriberOp {
    pub fn uid(&self) -> &SubscriberUid {
        match self {
            SubscriberOp::Create(s) | SubscriberOp::Update(s) => &s.uid,
            SubscriberOp::Read(uid) | SubscriberOp::Delete(uid) => uid,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SubscriberOp::Create(_) => "create",
            SubscriberOp::Read(_) => "read",
            SubscriberOp::Update(_) => "update",
            SubscriberOp::Delete(_) => "delete",
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, SubscriberOp::Read(_))
    }

    fn validate(&self) -> ProvisioningResult<()> {
        match self {
            SubscriberOp::Create(s) | SubscriberOp::Update(s) => s
                .validate()
                .map_err(|e| ProvisioningError::from_store(StoreKind::Cloud, e)),
            SubscriberOp::Read(uid) | SubscriberOp::Delete(uid) if uid.is_blank() => {
                Err(ProvisioningError::validation("uid must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Result of a coordinated operation as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    /// Stored (or, for Delete, removed) record.
    pub record: Option<Subscriber>,
    /// Store the record came from.
    pub served_by: Option<StoreKind>,
    /// Cloud succeeded but Legacy did not.
    pub partial: bool,
    pub conflicts: Vec<SyncConflict>,
    /// Legacy failure behind a partial write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_failure: Option<StoreError>,
    /// False when a partial-write conflict could not be stored; the entries
    /// in `conflicts` then exist only in this outcome.
    #[serde(default = "persisted_by_default")]
    pub conflict_persisted: bool,
}

fn persisted_by_default() -> bool {
    true
}

impl OperationOutcome {
    fn complete(record: Option<Subscriber>, served_by: StoreKind) -> Self {
        Self {
            record,
            served_by: Some(served_by),
            partial: false,
            conflicts: Vec::new(),
            legacy_failure: None,
            conflict_persisted: true,
        }
    }

    /// The partial write expressed as an error, for callers that want one.
    pub fn partial_failure(&self) -> Option<ProvisioningError> {
        let source = self.legacy_failure.clone()?;
        let uid = self.record.as_ref()?.uid.clone();
        Some(ProvisioningError::PartialWriteFailure { uid, source })
    }
}

/// Coordinates subscriber operations across the Cloud and Legacy stores.
pub struct ProvisioningCoordinator<C: ConflictStore> {
    cloud: Arc<dyn StoreAdapter>,
    legacy: Arc<dyn StoreAdapter>,
    conflicts: C,
    config: CoordinatorConfig,
}

impl<C: ConflictStore> ProvisioningCoordinator<C> {
    /// Build a coordinator; the adapters must report the matching store kind.
    pub fn new(
        cloud: Arc<dyn StoreAdapter>,
        legacy: Arc<dyn StoreAdapter>,
        conflicts: C,
        config: CoordinatorConfig,
    ) -> ProvisioningResult<Self> {
        if cloud.kind() != StoreKind::Cloud || legacy.kind() != StoreKind::Legacy {
            return Err(ProvisioningError::validation(format!(
                "adapter kinds mismatched: cloud slot is {}, legacy slot is {}",
                cloud.kind(),
                legacy.kind()
            )));
        }

        Ok(Self {
            cloud,
            legacy,
            conflicts,
            config,
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub async fn create(
        &self,
        mode: ProvisioningMode,
        subscriber: Subscriber,
    ) -> ProvisioningResult<OperationOutcome> {
        self.execute(SubscriberOp::Create(subscriber), mode).await
    }

    pub async fn read(
        &self,
        mode: ProvisioningMode,
        uid: SubscriberUid,
    ) -> ProvisioningResult<OperationOutcome> {
        self.execute(SubscriberOp::Read(uid), mode).await
    }

    pub async fn update(
        &self,
        mode: ProvisioningMode,
        subscriber: Subscriber,
    ) -> ProvisioningResult<OperationOutcome> {
        self.execute(SubscriberOp::Update(subscriber), mode).await
    }

    pub async fn delete(
        &self,
        mode: ProvisioningMode,
        uid: SubscriberUid,
    ) -> ProvisioningResult<OperationOutcome> {
        self.execute(SubscriberOp::Delete(uid), mode).await
    }

    /// Perform `op` in `mode`.
    pub async fn execute(
        &self,
        op: SubscriberOp,
        mode: ProvisioningMode,
    ) -> ProvisioningResult<OperationOutcome> {
        op.validate()?;
        debug!(op = op.name(), uid = %op.uid(), mode = ?mode, "executing subscriber operation");

        match mode.single_store() {
            Some(store) => {
                let record = self
                    .apply(self.adapter(store), &op)
                    .await
                    .map_err(|e| ProvisioningError::from_store(store, e))?;
                Ok(OperationOutcome::complete(Some(record), store))
            }
            None if op.is_write() => self.dual_write(op).await,
            None => self.dual_read(op.uid()).await,
        }
    }

    async fn dual_write(&self, op: SubscriberOp) -> ProvisioningResult<OperationOutcome> {
        let cloud_record = self
            .apply(self.cloud.as_ref(), &op)
            .await
            .map_err(|e| ProvisioningError::from_store(StoreKind::Cloud, e))?;

        match self.apply(self.legacy.as_ref(), &op).await {
            Ok(_) => Ok(OperationOutcome::complete(Some(cloud_record), StoreKind::Cloud)),
            // Nothing left to remove in Legacy; both stores agree.
            Err(StoreError::NotFound(_)) if matches!(op, SubscriberOp::Delete(_)) => {
                Ok(OperationOutcome::complete(Some(cloud_record), StoreKind::Cloud))
            }
            Err(legacy_err) => {
                warn!(
                    op = op.name(),
                    uid = %op.uid(),
                    error = %legacy_err,
                    "legacy write failed after cloud write; recording conflict"
                );

                let mut conflict = self.partial_write_conflict(&op, &cloud_record, &legacy_err);
                let conflict_persisted = match self.conflicts.record_unless_pending(conflict.clone())
                {
                    Ok(id) => {
                        conflict.id = id;
                        true
                    }
                    Err(e) => {
                        error!(uid = %op.uid(), error = %e, "failed to persist partial-write conflict");
                        false
                    }
                };

                Ok(OperationOutcome {
                    record: Some(cloud_record),
                    served_by: Some(StoreKind::Cloud),
                    partial: true,
                    conflicts: vec![conflict],
                    legacy_failure: Some(legacy_err),
                    conflict_persisted,
                })
            }
        }
    }

    async fn dual_read(&self, uid: &SubscriberUid) -> ProvisioningResult<OperationOutcome> {
        match self.call(StoreKind::Cloud, self.cloud.read(uid)).await {
            Ok(record) => Ok(OperationOutcome::complete(Some(record), StoreKind::Cloud)),
            Err(StoreError::NotFound(_)) => {
                debug!(uid = %uid, "not in cloud; falling back to legacy");
                let record = self
                    .call(StoreKind::Legacy, self.legacy.read(uid))
                    .await
                    .map_err(|e| ProvisioningError::from_store(StoreKind::Legacy, e))?;
                Ok(OperationOutcome::complete(Some(record), StoreKind::Legacy))
            }
            Err(e) => Err(ProvisioningError::from_store(StoreKind::Cloud, e)),
        }
    }

    fn partial_write_conflict(
        &self,
        op: &SubscriberOp,
        cloud_record: &Subscriber,
        legacy_err: &StoreError,
    ) -> SyncConflict {
        let cloud_status = match op {
            SubscriberOp::Delete(_) => SubscriberStatus::Deleted,
            _ => cloud_record.status,
        };

        SyncConflict::new(op.uid().clone(), ConflictType::MissingInLegacy)
            .with_values(Some(cloud_status.as_str().to_string()), None)
            .with_note(format!("legacy {} failed: {}", op.name(), legacy_err))
    }

    fn adapter(&self, store: StoreKind) -> &dyn StoreAdapter {
        match store {
            StoreKind::Cloud => self.cloud.as_ref(),
            StoreKind::Legacy => self.legacy.as_ref(),
        }
    }

    async fn apply(
        &self,
        adapter: &dyn StoreAdapter,
        op: &SubscriberOp,
    ) -> Result<Subscriber, StoreError> {
        let store = adapter.kind();
        match op {
            SubscriberOp::Create(s) => {
                self.call(store, adapter.create(s, self.config.create_policy))
                    .await
            }
            SubscriberOp::Read(uid) => self.call(store, adapter.read(uid)).await,
            SubscriberOp::Update(s) => self.call(store, adapter.update(s)).await,
            SubscriberOp::Delete(uid) => self.call(store, adapter.delete(uid)).await,
        }
    }

    async fn call<T, F>(&self, store: StoreKind, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.config.call_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::unavailable(format!(
                "{store} call timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }
}
