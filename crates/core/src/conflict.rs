//! Sync conflicts between the Cloud and Legacy stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ConflictId, SubscriberUid};

/// Kind of drift detected for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    MissingInCloud,
    MissingInLegacy,
    FieldMismatch,
    Stale,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::MissingInCloud => "MISSING_IN_CLOUD",
            ConflictType::MissingInLegacy => "MISSING_IN_LEGACY",
            ConflictType::FieldMismatch => "FIELD_MISMATCH",
            ConflictType::Stale => "STALE",
        }
    }
}

/// Resolution state. Conflicts are never deleted, only transitioned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictResolution {
    #[default]
    Pending,
    Resolved,
    Ignored,
}

impl ConflictResolution {
    /// Only `Pending` may move, and only to `Resolved` or `Ignored`.
    pub fn can_transition_to(&self, next: ConflictResolution) -> bool {
        matches!(
            (self, next),
            (ConflictResolution::Pending, ConflictResolution::Resolved)
                | (ConflictResolution::Pending, ConflictResolution::Ignored)
        )
    }
}

/// A recorded discrepancy for one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub id: ConflictId,
    pub subscriber_uid: SubscriberUid,
    pub conflict_type: ConflictType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_value: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub resolution: ConflictResolution,
    /// Free-form context, e.g. the Legacy failure behind a partial write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl SyncConflict {
    pub fn new(subscriber_uid: SubscriberUid, conflict_type: ConflictType) -> Self {
        Self {
            id: ConflictId::new(),
            subscriber_uid,
            conflict_type,
            field: None,
            cloud_value: None,
            legacy_value: None,
            detected_at: Utc::now(),
            resolution: ConflictResolution::Pending,
            note: None,
        }
    }

    pub fn field_mismatch(
        subscriber_uid: SubscriberUid,
        field: impl Into<String>,
        cloud_value: Option<String>,
        legacy_value: Option<String>,
    ) -> Self {
        Self {
            field: Some(field.into()),
            cloud_value,
            legacy_value,
            ..Self::new(subscriber_uid, ConflictType::FieldMismatch)
        }
    }

    pub fn with_values(mut self, cloud_value: Option<String>, legacy_value: Option<String>) -> Self {
        self.cloud_value = cloud_value;
        self.legacy_value = legacy_value;
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn detected_at(mut self, at: DateTime<Utc>) -> Self {
        self.detected_at = at;
        self
    }
}
