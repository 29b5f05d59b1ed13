//! Asynchronous bulk jobs: migration, bulk delete, audit and export.
//!
//! ## Design
//!
//! - Jobs are owned by the orchestrator; the executor only reports back
//! - Jobs that need an uploaded file wait in PENDING_UPLOAD until an external
//!   trigger says the input is ready
//! - Terminal states are final; late callbacks are recorded as no-ops
//! - A background sweep fails jobs that outlive their ceiling
//!
//! ## Components
//!
//! - `Job`: lifecycle state and counters
//! - `JobStore`: persistence with atomic per-job mutation
//! - `JobOrchestrator`: the job API and executor callbacks
//! - `GovernanceSweeper`: periodic timeout enforcement
//! - `JobStatusGateway`: pull/push progress view

pub mod artifacts;
pub mod executor;
pub mod gateway;
pub mod governance;
pub mod orchestrator;
pub mod store;
pub mod types;

pub use artifacts::{ArtifactError, InMemoryInputArtifacts, InputArtifacts, InputHandle};
pub use executor::{
    ExecutorError, ExecutorRef, ExecutorRunState, ExecutorRunStatus, InMemoryExecutor,
    JobExecutor, WorkDescriptor,
};
pub use gateway::{JobStatusGateway, JobView};
pub use governance::{GovernanceSweeper, SweeperHandle, SweeperStats};
pub use orchestrator::{CallbackOutcome, JobEvent, JobOrchestrator, JobTicket, SweepReport};
pub use store::{InMemoryJobStore, JobFilter, JobStats, JobStore, JobStoreError};
pub use types::{
    Job, JobCounters, JobParams, JobReason, JobStatus, JobTransitionError, JobType,
};
