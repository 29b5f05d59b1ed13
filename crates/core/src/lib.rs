//! `subprov-core`: domain foundation for subscriber provisioning.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! identifiers, the canonical subscriber record, sync conflicts and the
//! error taxonomy shared by the coordinator, job orchestrator and auditor.

pub mod conflict;
pub mod error;
pub mod id;
pub mod mode;
pub mod subscriber;

pub use conflict::{ConflictResolution, ConflictType, SyncConflict};
pub use error::{ProvisioningError, ProvisioningResult, StoreError};
pub use id::{ConflictId, JobId, SubscriberUid};
pub use mode::{CreatePolicy, ProvisioningMode, StoreKind};
pub use subscriber::{COMPARED_FIELDS, Subscriber, SubscriberStatus};
