//! Cross-store consistency auditing.
//!
//! The auditor reads both stores, classifies every difference it finds and
//! records each one as a pending sync conflict. It never writes subscriber
//! data; resolving conflicts is left to later workflows.

pub mod auditor;
pub mod report;

use serde::{Deserialize, Serialize};

pub use auditor::ConsistencyAuditor;
pub use report::{AuditReport, Discrepancy};

/// How much of the key space an audit covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "size", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditScope {
    /// Every key in both stores.
    Full,
    /// The first `n` keys of each store, in key order.
    Sample(usize),
}

impl AuditScope {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            AuditScope::Sample(0) => Err("sample size must be at least 1".to_string()),
            _ => Ok(()),
        }
    }

    /// Per-store key limit.
    pub fn key_limit(&self) -> Option<usize> {
        match self {
            AuditScope::Full => None,
            AuditScope::Sample(n) => Some(*n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_wire_format() {
        assert_eq!(
            serde_json::to_value(AuditScope::Sample(50)).unwrap(),
            serde_json::json!({"kind": "SAMPLE", "size": 50})
        );
        assert_eq!(
            serde_json::to_value(AuditScope::Full).unwrap(),
            serde_json::json!({"kind": "FULL"})
        );
    }

    #[test]
    fn empty_sample_is_invalid() {
        assert!(AuditScope::Sample(0).validate().is_err());
        assert_eq!(AuditScope::Sample(3).key_limit(), Some(3));
        assert_eq!(AuditScope::Full.key_limit(), None);
    }
}
