//! Canonical subscriber record.
//!
//! Both stores map their native schema onto this one struct. Cloud keeps
//! flexible attributes and Legacy fixed relational columns; that mapping is
//! the adapters' concern and never leaks past them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::id::SubscriberUid;

/// Lifecycle status of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriberStatus {
    Active,
    Inactive,
    Suspended,
    /// Soft-deleted.
    Deleted,
}

impl SubscriberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriberStatus::Active => "ACTIVE",
            SubscriberStatus::Inactive => "INACTIVE",
            SubscriberStatus::Suspended => "SUSPENDED",
            SubscriberStatus::Deleted => "DELETED",
        }
    }
}

/// Subscriber record as seen by the coordination core.
///
/// `created_at`/`updated_at` are store-local and are not assumed to be
/// synchronized across stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub uid: SubscriberUid,
    pub msisdn: String,
    pub imsi: String,
    pub status: SubscriberStatus,
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields compared across stores by the auditor, in report order.
pub const COMPARED_FIELDS: [&str; 4] = ["status", "planId", "msisdn", "imsi"];

impl Subscriber {
    /// Build an active subscriber with both timestamps set to now.
    pub fn new(
        uid: impl Into<SubscriberUid>,
        msisdn: impl Into<String>,
        imsi: impl Into<String>,
        plan_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            uid: uid.into(),
            msisdn: msisdn.into(),
            imsi: imsi.into(),
            status: SubscriberStatus::Active,
            plan_id: plan_id.into(),
            full_name: None,
            email: None,
            address: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: SubscriberStatus) -> Self {
        self.status = status;
        self
    }

    /// Check the record before it reaches any store.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.uid.is_blank() {
            return Err(StoreError::validation("uid must not be empty"));
        }

        let msisdn = self.msisdn.strip_prefix('+').unwrap_or(&self.msisdn);
        if !is_digits_between(msisdn, 5, 15) {
            return Err(StoreError::validation(format!(
                "msisdn must be 5-15 digits: {}",
                self.msisdn
            )));
        }

        if !is_digits_between(&self.imsi, 6, 15) {
            return Err(StoreError::validation(format!(
                "imsi must be 6-15 digits: {}",
                self.imsi
            )));
        }

        if self.plan_id.trim().is_empty() {
            return Err(StoreError::validation("planId must not be empty"));
        }

        Ok(())
    }

    /// Value of one compared field, as rendered in conflicts and reports.
    pub fn field_value(&self, field: &str) -> Option<String> {
        match field {
            "status" => Some(self.status.as_str().to_string()),
            "planId" => Some(self.plan_id.clone()),
            "msisdn" => Some(self.msisdn.clone()),
            "imsi" => Some(self.imsi.clone()),
            "updatedAt" => Some(self.updated_at.to_rfc3339()),
            _ => None,
        }
    }
}

fn is_digits_between(value: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&value.len()) && value.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscriber() -> Subscriber {
        Subscriber::new("U1", "+15551234567", "310150123456789", "plan-basic")
    }

    #[test]
    fn valid_subscriber_passes() {
        assert!(subscriber().validate().is_ok());
    }

    #[test]
    fn rejects_malformed_msisdn_and_imsi() {
        let mut s = subscriber();
        s.msisdn = "12ab".to_string();
        assert!(matches!(s.validate(), Err(StoreError::Validation(msg)) if msg.contains("msisdn")));

        let mut s = subscriber();
        s.imsi = "123".to_string();
        assert!(matches!(s.validate(), Err(StoreError::Validation(msg)) if msg.contains("imsi")));
    }

    #[test]
    fn rejects_blank_uid() {
        let mut s = subscriber();
        s.uid = SubscriberUid::new("");
        assert!(s.validate().is_err());
    }

    #[test]
    fn field_values_cover_compared_fields() {
        let s = subscriber();
        for field in COMPARED_FIELDS {
            assert!(s.field_value(field).is_some(), "missing {field}");
        }
        assert_eq!(s.field_value("status").as_deref(), Some("ACTIVE"));
        assert_eq!(s.field_value("nope"), None);
    }

    #[test]
    fn serializes_camel_case_and_skips_absent_pii() {
        let json = serde_json::to_value(subscriber()).unwrap();
        assert_eq!(json["planId"], "plan-basic");
        assert!(json.get("fullName").is_none());
    }
}
