//! Audit report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use subprov_core::{ConflictId, ConflictType, SubscriberUid, SyncConflict};

use super::AuditScope;

/// One detected difference, as listed in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discrepancy {
    pub uid: SubscriberUid,
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_value: Option<String>,
    /// The persisted conflict record.
    pub conflict_id: ConflictId,
}

impl From<&SyncConflict> for Discrepancy {
    fn from(conflict: &SyncConflict) -> Self {
        Self {
            uid: conflict.subscriber_uid.clone(),
            conflict_type: conflict.conflict_type,
            field: conflict.field.clone(),
            cloud_value: conflict.cloud_value.clone(),
            legacy_value: conflict.legacy_value.clone(),
            conflict_id: conflict.id,
        }
    }
}

/// Result of one audit run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub audit_id: Uuid,
    pub scope: AuditScope,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Distinct subscribers examined.
    pub compared_count: u64,
    /// Subscribers present and identical in both stores.
    pub match_count: u64,
    pub missing_in_cloud: u64,
    pub missing_in_legacy: u64,
    /// Differing fields (a subscriber may contribute several).
    pub field_mismatch: u64,
    pub stale: u64,
    pub discrepancies: Vec<Discrepancy>,
}

impl AuditReport {
    pub(crate) fn begin(scope: AuditScope) -> Self {
        let now = Utc::now();
        Self {
            audit_id: Uuid::now_v7(),
            scope,
            started_at: now,
            finished_at: now,
            compared_count: 0,
            match_count: 0,
            missing_in_cloud: 0,
            missing_in_legacy: 0,
            field_mismatch: 0,
            stale: 0,
            discrepancies: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, discrepancy: Discrepancy) {
        match discrepancy.conflict_type {
            ConflictType::MissingInCloud => self.missing_in_cloud += 1,
            ConflictType::MissingInLegacy => self.missing_in_legacy += 1,
            ConflictType::FieldMismatch => self.field_mismatch += 1,
            ConflictType::Stale => self.stale += 1,
        }
        self.discrepancies.push(discrepancy);
    }

    pub fn discrepancy_count(&self) -> usize {
        self.discrepancies.len()
    }

    pub fn count_of(&self, conflict_type: ConflictType) -> u64 {
        match conflict_type {
            ConflictType::MissingInCloud => self.missing_in_cloud,
            ConflictType::MissingInLegacy => self.missing_in_legacy,
            ConflictType::FieldMismatch => self.field_mismatch,
            ConflictType::Stale => self.stale,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }

    /// Discrepancies for a single subscriber.
    pub fn for_uid<'a>(&'a self, uid: &'a SubscriberUid) -> impl Iterator<Item = &'a Discrepancy> {
        self.discrepancies.iter().filter(move |d| &d.uid == uid)
    }
}
