//! Configuration loading and representation.
//!
//! Every setting has a default, so an empty environment yields a working
//! configuration. Values come from `SUBPROV_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use subprov_core::CreatePolicy;

use crate::jobs::JobType;

/// Configuration error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubprovConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Provisioning coordinator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Per-adapter-call timeout.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Behaviour of Create on an existing `uid`, applied to both stores.
    #[serde(default)]
    pub create_policy: CreatePolicy,
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            create_policy: CreatePolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Job governance settings: maximum durations and sweep cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    #[serde(default = "default_long_ceiling_secs")]
    pub migration_ceiling_secs: u64,
    #[serde(default = "default_long_ceiling_secs")]
    pub bulk_delete_ceiling_secs: u64,
    #[serde(default = "default_short_ceiling_secs")]
    pub audit_ceiling_secs: u64,
    #[serde(default = "default_short_ceiling_secs")]
    pub export_ceiling_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_long_ceiling_secs() -> u64 {
    60 * 60
}

fn default_short_ceiling_secs() -> u64 {
    15 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            migration_ceiling_secs: default_long_ceiling_secs(),
            bulk_delete_ceiling_secs: default_long_ceiling_secs(),
            audit_ceiling_secs: default_short_ceiling_secs(),
            export_ceiling_secs: default_short_ceiling_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl GovernanceConfig {
    /// Maximum time a job of `job_type` may stay non-terminal.
    pub fn ceiling_for(&self, job_type: JobType) -> Duration {
        let secs = match job_type {
            JobType::Migration => self.migration_ceiling_secs,
            JobType::BulkDelete => self.bulk_delete_ceiling_secs,
            JobType::Audit => self.audit_ceiling_secs,
            JobType::Export => self.export_ceiling_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Consistency auditor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Timestamp divergence tolerated before identical records count as stale.
    #[serde(default = "default_stale_tolerance_secs")]
    pub stale_tolerance_secs: u64,
    #[serde(default = "default_sample_size")]
    pub default_sample_size: usize,
}

fn default_stale_tolerance_secs() -> u64 {
    300
}

fn default_sample_size() -> usize {
    1_000
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            stale_tolerance_secs: default_stale_tolerance_secs(),
            default_sample_size: default_sample_size(),
        }
    }
}

impl AuditConfig {
    pub fn stale_tolerance(&self) -> Duration {
        Duration::from_secs(self.stale_tolerance_secs)
    }
}

impl SubprovConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "SUBPROV_CALL_TIMEOUT_MS")? {
            config.coordinator.call_timeout_ms = v;
        }
        if let Some(raw) = lookup("SUBPROV_CREATE_POLICY") {
            config.coordinator.create_policy = match raw.trim() {
                "upsert" => CreatePolicy::Upsert,
                "reject" => CreatePolicy::Reject,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "SUBPROV_CREATE_POLICY",
                        value: raw,
                        reason: "expected `upsert` or `reject`".to_string(),
                    });
                }
            };
        }

        let g = &mut config.governance;
        if let Some(v) = parse_var(&lookup, "SUBPROV_MIGRATION_CEILING_SECS")? {
            g.migration_ceiling_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "SUBPROV_BULK_DELETE_CEILING_SECS")? {
            g.bulk_delete_ceiling_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "SUBPROV_AUDIT_CEILING_SECS")? {
            g.audit_ceiling_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "SUBPROV_EXPORT_CEILING_SECS")? {
            g.export_ceiling_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "SUBPROV_SWEEP_INTERVAL_SECS")? {
            g.sweep_interval_secs = v;
        }

        if let Some(v) = parse_var(&lookup, "SUBPROV_STALE_TOLERANCE_SECS")? {
            config.audit.stale_tolerance_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "SUBPROV_AUDIT_SAMPLE_SIZE")? {
            config.audit.default_sample_size = v;
        }

        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
