//! Process wiring for the provisioning core.
//!
//! Builds every component over in-memory collaborators. Real store drivers,
//! the executor client and the artifact service plug in through the same
//! traits.

use std::sync::Arc;

use subprov_core::ProvisioningResult;
use subprov_infra::jobs::{
    GovernanceSweeper, InMemoryExecutor, InMemoryInputArtifacts, InMemoryJobStore,
    JobOrchestrator, JobStatusGateway, SweeperHandle,
};
use subprov_infra::{
    ConsistencyAuditor, InMemoryConflictStore, InMemoryStoreAdapter, ProvisioningCoordinator,
    SubprovConfig,
};

pub type JobStoreHandle = Arc<InMemoryJobStore>;
pub type ConflictStoreHandle = Arc<InMemoryConflictStore>;

/// Every long-lived component of the service.
pub struct Services {
    pub config: SubprovConfig,
    pub coordinator: ProvisioningCoordinator<ConflictStoreHandle>,
    pub auditor: ConsistencyAuditor<ConflictStoreHandle>,
    pub orchestrator: Arc<JobOrchestrator<JobStoreHandle>>,
    pub gateway: JobStatusGateway<JobStoreHandle>,
    pub conflicts: ConflictStoreHandle,
}

impl Services {
    pub fn in_memory(config: SubprovConfig) -> ProvisioningResult<Self> {
        let cloud = Arc::new(InMemoryStoreAdapter::cloud());
        let legacy = Arc::new(InMemoryStoreAdapter::legacy());
        let conflicts = InMemoryConflictStore::arc();

        let coordinator = ProvisioningCoordinator::new(
            cloud.clone(),
            legacy.clone(),
            conflicts.clone(),
            config.coordinator.clone(),
        )?;
        let auditor = ConsistencyAuditor::new(
            cloud,
            legacy,
            conflicts.clone(),
            config.audit.clone(),
        )?;

        let orchestrator = Arc::new(JobOrchestrator::new(
            InMemoryJobStore::arc(),
            Arc::new(InMemoryExecutor::new()),
            Arc::new(InMemoryInputArtifacts::default()),
            config.governance.clone(),
        ));
        let gateway = JobStatusGateway::new(orchestrator.clone());

        Ok(Self {
            config,
            coordinator,
            auditor,
            orchestrator,
            gateway,
            conflicts,
        })
    }

    /// Start the governance sweep at the configured interval.
    pub fn start_sweeper(&self) -> SweeperHandle {
        GovernanceSweeper::spawn(
            self.orchestrator.clone(),
            self.config.governance.sweep_interval(),
        )
    }
}
