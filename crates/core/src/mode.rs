//! Provisioning modes and store identities.

use serde::{Deserialize, Serialize};

/// Which physical store a record or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreKind {
    /// Cloud-native key-value store (source of truth on write conflicts).
    Cloud,
    /// Legacy relational store.
    Legacy,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Cloud => "cloud",
            StoreKind::Legacy => "legacy",
        }
    }
}

impl core::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stores a logical operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningMode {
    Cloud,
    Legacy,
    Dual,
}

impl ProvisioningMode {
    /// The single store targeted by this mode, or `None` for Dual.
    pub fn single_store(&self) -> Option<StoreKind> {
        match self {
            ProvisioningMode::Cloud => Some(StoreKind::Cloud),
            ProvisioningMode::Legacy => Some(StoreKind::Legacy),
            ProvisioningMode::Dual => None,
        }
    }

    pub fn includes(&self, store: StoreKind) -> bool {
        match self.single_store() {
            Some(only) => only == store,
            None => true,
        }
    }
}

/// What a second Create with an existing `uid` does.
///
/// The coordinator passes the same policy to both adapters so Dual mode can
/// never diverge on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatePolicy {
    /// Overwrite the existing record.
    Upsert,
    /// Fail with `AlreadyExists`.
    #[default]
    Reject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dual_includes_both_stores() {
        assert!(ProvisioningMode::Dual.includes(StoreKind::Cloud));
        assert!(ProvisioningMode::Dual.includes(StoreKind::Legacy));
        assert!(!ProvisioningMode::Cloud.includes(StoreKind::Legacy));
        assert_eq!(ProvisioningMode::Legacy.single_store(), Some(StoreKind::Legacy));
    }

    #[test]
    fn mode_serializes_upper_case() {
        let json = serde_json::to_string(&ProvisioningMode::Dual).unwrap();
        assert_eq!(json, "\"DUAL\"");
    }
}
