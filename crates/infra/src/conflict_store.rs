//! Durable record of detected sync conflicts.
//!
//! Conflicts are written by the coordinator (partial dual writes) and the
//! auditor. They are never deleted; resolution workflows only move them out
//! of `Pending`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use subprov_core::{ConflictId, ConflictResolution, ConflictType, SubscriberUid, SyncConflict};

/// Conflict store abstraction.
pub trait ConflictStore: Send + Sync {
    /// Persist a newly detected conflict.
    fn record(&self, conflict: SyncConflict) -> Result<ConflictId, ConflictStoreError>;

    /// Persist `conflict` unless a pending conflict already covers the same
    /// subscriber, type and field. Returns the id of the pending record.
    fn record_unless_pending(
        &self,
        conflict: SyncConflict,
    ) -> Result<ConflictId, ConflictStoreError> {
        let filter = ConflictFilter::for_uid(conflict.subscriber_uid.clone())
            .of_type(conflict.conflict_type)
            .pending();
        if let Some(existing) = self
            .list(&filter)?
            .into_iter()
            .find(|c| c.field == conflict.field)
        {
            return Ok(existing.id);
        }
        self.record(conflict)
    }

    fn get(&self, id: ConflictId) -> Result<Option<SyncConflict>, ConflictStoreError>;

    /// List conflicts matching `filter`, oldest first.
    fn list(&self, filter: &ConflictFilter) -> Result<Vec<SyncConflict>, ConflictStoreError>;

    /// Move a pending conflict to `Resolved` or `Ignored`.
    fn resolve(
        &self,
        id: ConflictId,
        resolution: ConflictResolution,
    ) -> Result<SyncConflict, ConflictStoreError>;
}

/// Conflict store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConflictStoreError {
    #[error("conflict not found: {0}")]
    NotFound(ConflictId),
    #[error("conflict already exists: {0}")]
    AlreadyExists(ConflictId),
    #[error("conflict {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: ConflictId,
        from: ConflictResolution,
        to: ConflictResolution,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Filters for [`ConflictStore::list`]. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct ConflictFilter {
    pub subscriber_uid: Option<SubscriberUid>,
    pub conflict_type: Option<ConflictType>,
    pub resolution: Option<ConflictResolution>,
    pub limit: Option<usize>,
}

impl ConflictFilter {
    pub fn for_uid(uid: impl Into<SubscriberUid>) -> Self {
        Self {
            subscriber_uid: Some(uid.into()),
            ..Self::default()
        }
    }

    pub fn of_type(mut self, conflict_type: ConflictType) -> Self {
        self.conflict_type = Some(conflict_type);
        self
    }

    pub fn pending(mut self) -> Self {
        self.resolution = Some(ConflictResolution::Pending);
        self
    }

    fn matches(&self, conflict: &SyncConflict) -> bool {
        self.subscriber_uid
            .as_ref()
            .is_none_or(|uid| &conflict.subscriber_uid == uid)
            && self.conflict_type.is_none_or(|t| conflict.conflict_type == t)
            && self.resolution.is_none_or(|r| conflict.resolution == r)
    }
}

/// In-memory conflict store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryConflictStore {
    conflicts: RwLock<HashMap<ConflictId, SyncConflict>>,
}

impl InMemoryConflictStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned() -> ConflictStoreError {
    ConflictStoreError::Storage("conflict store lock poisoned".to_string())
}

impl ConflictStore for InMemoryConflictStore {
    fn record(&self, conflict: SyncConflict) -> Result<ConflictId, ConflictStoreError> {
        let mut conflicts = self.conflicts.write().map_err(|_| poisoned())?;
        if conflicts.contains_key(&conflict.id) {
            return Err(ConflictStoreError::AlreadyExists(conflict.id));
        }
        let id = conflict.id;
        conflicts.insert(id, conflict);
        Ok(id)
    }

    fn record_unless_pending(
        &self,
        conflict: SyncConflict,
    ) -> Result<ConflictId, ConflictStoreError> {
        let mut conflicts = self.conflicts.write().map_err(|_| poisoned())?;
        let existing = conflicts.values().find(|c| {
            c.resolution == ConflictResolution::Pending
                && c.subscriber_uid == conflict.subscriber_uid
                && c.conflict_type == conflict.conflict_type
                && c.field == conflict.field
        });
        if let Some(existing) = existing {
            return Ok(existing.id);
        }
        let id = conflict.id;
        conflicts.insert(id, conflict);
        Ok(id)
    }

    fn get(&self, id: ConflictId) -> Result<Option<SyncConflict>, ConflictStoreError> {
        let conflicts = self.conflicts.read().map_err(|_| poisoned())?;
        Ok(conflicts.get(&id).cloned())
    }

    fn list(&self, filter: &ConflictFilter) -> Result<Vec<SyncConflict>, ConflictStoreError> {
        let conflicts = self.conflicts.read().map_err(|_| poisoned())?;
        let mut result: Vec<_> = conflicts
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();

        result.sort_by_key(|c| (c.detected_at, c.id));
        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    fn resolve(
        &self,
        id: ConflictId,
        resolution: ConflictResolution,
    ) -> Result<SyncConflict, ConflictStoreError> {
        let mut conflicts = self.conflicts.write().map_err(|_| poisoned())?;
        let conflict = conflicts
            .get_mut(&id)
            .ok_or(ConflictStoreError::NotFound(id))?;

        if !conflict.resolution.can_transition_to(resolution) {
            return Err(ConflictStoreError::InvalidTransition {
                id,
                from: conflict.resolution,
                to: resolution,
            });
        }

        conflict.resolution = resolution;
        Ok(conflict.clone())
    }
}

impl<T: ConflictStore + ?Sized> ConflictStore for Arc<T> {
    fn record(&self, conflict: SyncConflict) -> Result<ConflictId, ConflictStoreError> {
        (**self).record(conflict)
    }

    fn record_unless_pending(
        &self,
        conflict: SyncConflict,
    ) -> Result<ConflictId, ConflictStoreError> {
        (**self).record_unless_pending(conflict)
    }

    fn get(&self, id: ConflictId) -> Result<Option<SyncConflict>, ConflictStoreError> {
        (**self).get(id)
    }

    fn list(&self, filter: &ConflictFilter) -> Result<Vec<SyncConflict>, ConflictStoreError> {
        (**self).list(filter)
    }

    fn resolve(
        &self,
        id: ConflictId,
        resolution: ConflictResolution,
    ) -> Result<SyncConflict, ConflictStoreError> {
        (**self).resolve(id, resolution)
    }
}
