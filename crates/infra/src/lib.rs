//! Infrastructure layer: store adapters, coordination, jobs, auditing, config.

pub mod adapters;
pub mod audit;
pub mod config;
pub mod conflict_store;
pub mod coordinator;
pub mod jobs;

#[cfg(test)]
mod integration_tests;

pub use adapters::{AdapterOp, InMemoryStoreAdapter, StoreAdapter};
pub use audit::{AuditReport, AuditScope, ConsistencyAuditor, Discrepancy};
pub use config::{ConfigError, SubprovConfig};
pub use conflict_store::{ConflictFilter, ConflictStore, ConflictStoreError, InMemoryConflictStore};
pub use coordinator::{OperationOutcome, ProvisioningCoordinator, SubscriberOp};
