//! Integration tests for the coordination core.
//!
//! Tests: Coordinator → Adapters → ConflictStore → Auditor, and
//! Orchestrator → Executor → Gateway over in-memory collaborators.
//!
//! Verifies:
//! - A dual write that fails on Legacy is reported as partial with one conflict
//! - Abandoned jobs are failed by governance
//! - A canceled job stays canceled after a late completion
//! - The auditor agrees with what the coordinator recorded

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use subprov_core::{
        ConflictType, ProvisioningMode, StoreError, StoreKind, Subscriber, SubscriberStatus,
        SubscriberUid,
    };

    use crate::adapters::{AdapterOp, InMemoryStoreAdapter};
    use crate::audit::{AuditScope, ConsistencyAuditor};
    use crate::config::SubprovConfig;
    use crate::conflict_store::{ConflictFilter, ConflictStore, InMemoryConflictStore};
    use crate::coordinator::ProvisioningCoordinator;
    use crate::jobs::{
        ExecutorRunState, ExecutorRunStatus, GovernanceSweeper, InMemoryExecutor,
        InMemoryInputArtifacts, InMemoryJobStore, JobCounters, JobOrchestrator, JobParams,
        JobReason, JobStatus, JobStatusGateway, JobType,
    };

    struct Stores {
        cloud: Arc<InMemoryStoreAdapter>,
        legacy: Arc<InMemoryStoreAdapter>,
        conflicts: Arc<InMemoryConflictStore>,
        coordinator: ProvisioningCoordinator<Arc<InMemoryConflictStore>>,
        auditor: ConsistencyAuditor<Arc<InMemoryConflictStore>>,
    }

    fn stores() -> Stores {
        let config = SubprovConfig::default();
        let cloud = Arc::new(InMemoryStoreAdapter::cloud());
        let legacy = Arc::new(InMemoryStoreAdapter::legacy());
        let conflicts = InMemoryConflictStore::arc();

        let coordinator = ProvisioningCoordinator::new(
            cloud.clone(),
            legacy.clone(),
            conflicts.clone(),
            config.coordinator.clone(),
        )
        .unwrap();
        let auditor = ConsistencyAuditor::new(
            cloud.clone(),
            legacy.clone(),
            conflicts.clone(),
            config.audit.clone(),
        )
        .unwrap();

        Stores {
            cloud,
            legacy,
            conflicts,
            coordinator,
            auditor,
        }
    }

    struct Jobs {
        orchestrator: Arc<JobOrchestrator<Arc<InMemoryJobStore>>>,
        executor: Arc<InMemoryExecutor>,
        gateway: JobStatusGateway<Arc<InMemoryJobStore>>,
    }

    fn jobs() -> Jobs {
        let executor = Arc::new(InMemoryExecutor::new());
        let orchestrator = Arc::new(JobOrchestrator::new(
            InMemoryJobStore::arc(),
            executor.clone(),
            Arc::new(InMemoryInputArtifacts::default()),
            SubprovConfig::default().governance,
        ));
        Jobs {
            gateway: JobStatusGateway::new(orchestrator.clone()),
            orchestrator,
            executor,
        }
    }

    fn subscriber(uid: &str) -> Subscriber {
        Subscriber::new(uid, "+15551234567", "310150123456789", "plan-basic")
    }

    #[tokio::test]
    async fn dual_create_with_legacy_outage_is_partial() {
        let s = stores();
        s.legacy.set_unavailable(Some("connection refused"));

        let outcome = s
            .coordinator
            .create(ProvisioningMode::Dual, subscriber("U1"))
            .await
            .unwrap();

        assert!(outcome.partial);
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].subscriber_uid, SubscriberUid::new("U1"));
        assert_eq!(outcome.conflicts[0].conflict_type, ConflictType::MissingInLegacy);

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["partial"], true);
        assert_eq!(json["conflicts"][0]["subscriberUid"], "U1");
        assert_eq!(json["conflicts"][0]["conflictType"], "MISSING_IN_LEGACY");

        // Cloud kept the record; the conflict is durable.
        assert!(s.cloud.get(&SubscriberUid::new("U1")).is_some());
        assert_eq!(s.conflicts.list(&ConflictFilter::for_uid("U1")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cloud_failure_never_reaches_legacy() {
        let s = stores();
        s.cloud
            .fail_next(AdapterOp::Create, StoreError::unavailable("throttled"));

        let err = s
            .coordinator
            .create(ProvisioningMode::Dual, subscriber("U1"))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(s.legacy.call_count(AdapterOp::Create), 0);
        assert!(s.conflicts.list(&ConflictFilter::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn auditor_sees_what_partial_writes_left_behind() {
        let s = stores();
        for uid in ["U1", "U2", "U3"] {
            s.coordinator
                .create(ProvisioningMode::Dual, subscriber(uid))
                .await
                .unwrap();
        }

        // Legacy misses one write, and drifts on another record behind our back.
        s.legacy
            .fail_next(AdapterOp::Create, StoreError::unavailable("timeout"));
        let partial = s
            .coordinator
            .create(ProvisioningMode::Dual, subscriber("U4"))
            .await
            .unwrap();
        s.legacy
            .insert(subscriber("U2").with_status(SubscriberStatus::Suspended));

        let report = s.auditor.audit(AuditScope::Full).await.unwrap();
        assert_eq!(report.compared_count, 4);
        assert_eq!(report.match_count, 2);
        assert_eq!(report.missing_in_legacy, 1);
        assert_eq!(report.field_mismatch, 1);
        let u4_uid = SubscriberUid::new("U4");
        let u4: Vec<_> = report.for_uid(&u4_uid).collect();
        assert_eq!(u4.len(), 1);

        // The audit points at the conflict the coordinator already recorded
        // for U4 and adds only the U2 mismatch.
        assert_eq!(u4[0].conflict_id, partial.conflicts[0].id);
        let pending = s.conflicts.list(&ConflictFilter::default().pending()).unwrap();
        assert_eq!(pending.len(), 2);

        s.auditor.audit(AuditScope::Full).await.unwrap();
        let pending = s.conflicts.list(&ConflictFilter::default().pending()).unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn read_falls_back_to_legacy_after_partial_migration() {
        let s = stores();
        s.legacy.insert(subscriber("L1"));

        let outcome = s
            .coordinator
            .read(ProvisioningMode::Dual, SubscriberUid::new("L1"))
            .await
            .unwrap();
        assert_eq!(outcome.served_by, Some(StoreKind::Legacy));
        assert!(!outcome.partial);
    }

    #[tokio::test]
    async fn abandoned_migration_times_out() {
        let j = jobs();
        let ticket = j
            .orchestrator
            .create_job(JobType::Migration, ProvisioningMode::Dual, JobParams::default())
            .await
            .unwrap();
        assert_eq!(
            j.orchestrator.get_job(ticket.job_id).unwrap().status,
            JobStatus::PendingUpload
        );

        let ceiling = j.orchestrator.governance().ceiling_for(JobType::Migration);
        let later = Utc::now()
            + chrono::Duration::from_std(ceiling).unwrap()
            + chrono::Duration::seconds(1);
        let report = j.orchestrator.sweep_expired(later).await.unwrap();
        assert_eq!(report.timed_out, vec![ticket.job_id]);

        let job = j.orchestrator.get_job(ticket.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.reason, Some(JobReason::Timeout));
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn cancel_beats_late_completion() {
        let j = jobs();
        let ticket = j
            .orchestrator
            .create_job(JobType::Migration, ProvisioningMode::Dual, JobParams::default())
            .await
            .unwrap();
        j.orchestrator.input_ready(ticket.job_id).await.unwrap();
        j.orchestrator
            .report_progress(ticket.job_id, JobCounters::new(10, 4, 0, 0))
            .unwrap();

        j.orchestrator.cancel_job(ticket.job_id).await.unwrap();

        // The executor finished anyway and says so, both via callback and via
        // its status API.
        j.orchestrator
            .report_terminal(ticket.job_id, JobStatus::Completed, None)
            .unwrap();
        let run = j.executor.run_for(ticket.job_id).unwrap();
        j.executor.set_status(
            &run,
            ExecutorRunStatus {
                state: ExecutorRunState::Succeeded,
                counters: JobCounters::new(10, 10, 0, 0),
            },
        );
        let view = j.gateway.refresh_from_executor(ticket.job_id).await.unwrap();

        assert_eq!(view.job.status, JobStatus::Canceled);
        assert_eq!(view.job.counters, JobCounters::new(10, 4, 0, 0));
    }

    #[tokio::test]
    async fn copy_of_failed_job_runs_again() {
        let j = jobs();
        let params = JobParams {
            options: serde_json::json!({"batchSize": 500}),
            ..JobParams::default()
        };
        let first = j
            .orchestrator
            .create_job(JobType::BulkDelete, ProvisioningMode::Dual, params.clone())
            .await
            .unwrap();
        j.orchestrator.input_ready(first.job_id).await.unwrap();
        j.orchestrator
            .report_terminal(first.job_id, JobStatus::Failed, Some("bad csv".to_string()))
            .unwrap();

        let copy = j.orchestrator.copy_job(first.job_id).await.unwrap();
        assert_ne!(copy.job_id, first.job_id);
        assert_ne!(
            copy.input_handle.as_ref().map(|h| &h.key),
            first.input_handle.as_ref().map(|h| &h.key)
        );

        let job = j.orchestrator.input_ready(copy.job_id).await.unwrap();
        assert_eq!(job.params, params);
        assert_eq!(job.copied_from_job_id, Some(first.job_id));
        assert_eq!(j.executor.submissions().len(), 2);
    }

    #[tokio::test]
    async fn sweeper_runs_in_background() {
        let j = jobs();
        let handle = GovernanceSweeper::spawn(j.orchestrator.clone(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;

        let stats = handle.stats();
        assert!(stats.sweeps >= 1);
        assert_eq!(stats.timed_out, 0);
        handle.shutdown().await;
    }
}
