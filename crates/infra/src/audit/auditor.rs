//! Consistency auditor.
//!
//! Enumerates keys in both stores, reads each key from both sides and
//! classifies the pair:
//!
//! | Cloud | Legacy | Result                                      |
//! |-------|--------|---------------------------------------------|
//! | yes   | no     | MISSING_IN_LEGACY                           |
//! | no    | yes    | MISSING_IN_CLOUD                            |
//! | yes   | yes    | FIELD_MISMATCH per differing field, else    |
//! |       |        | STALE if `updatedAt` diverges, else a match |
//!
//! Runs concurrently with coordinator writes, so a record changed mid-scan
//! can show up as a transient conflict.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use subprov_core::{
    COMPARED_FIELDS, ConflictType, ProvisioningError, ProvisioningResult, StoreError, StoreKind,
    Subscriber, SubscriberUid, SyncConflict,
};

use super::AuditScope;
use super::report::{AuditReport, Discrepancy};
use crate::adapters::StoreAdapter;
use crate::config::AuditConfig;
use crate::conflict_store::ConflictStore;

/// Compare one subscriber present in both stores.
///
/// Returns one FIELD_MISMATCH per differing compared field. Only when every
/// compared field agrees are the timestamps checked; a divergence beyond
/// `stale_tolerance` yields a single STALE conflict.
pub fn compare_records(
    cloud: &Subscriber,
    legacy: &Subscriber,
    stale_tolerance: Duration,
) -> Vec<SyncConflict> {
    let uid = &cloud.uid;
    let mismatches: Vec<SyncConflict> = COMPARED_FIELDS
        .iter()
        .filter_map(|field| {
            let (c, l) = (cloud.field_value(field), legacy.field_value(field));
            (c != l).then(|| SyncConflict::field_mismatch(uid.clone(), *field, c, l))
        })
        .collect();
    if !mismatches.is_empty() {
        return mismatches;
    }

    let drift = (cloud.updated_at - legacy.updated_at).abs();
    let stale = match drift.to_std() {
        Ok(drift) => drift > stale_tolerance,
        Err(_) => false,
    };
    if stale {
        return vec![
            SyncConflict::new(uid.clone(), ConflictType::Stale)
                .with_field("updatedAt")
                .with_values(
                    cloud.field_value("updatedAt"),
                    legacy.field_value("updatedAt"),
                ),
        ];
    }

    Vec::new()
}

pub struct ConsistencyAuditor<C: ConflictStore> {
    cloud: Arc<dyn StoreAdapter>,
    legacy: Arc<dyn StoreAdapter>,
    conflicts: C,
    config: AuditConfig,
}

impl<C: ConflictStore> ConsistencyAuditor<C> {
    pub fn new(
        cloud: Arc<dyn StoreAdapter>,
        legacy: Arc<dyn StoreAdapter>,
        conflicts: C,
        config: AuditConfig,
    ) -> ProvisioningResult<Self> {
        if cloud.kind() != StoreKind::Cloud || legacy.kind() != StoreKind::Legacy {
            return Err(ProvisioningError::validation(
                "auditor needs a cloud adapter and a legacy adapter",
            ));
        }
        Ok(Self {
            cloud,
            legacy,
            conflicts,
            config,
        })
    }

    /// Audit a sample of the configured default size.
    pub async fn audit_default_sample(&self) -> ProvisioningResult<AuditReport> {
        self.audit(AuditScope::Sample(self.config.default_sample_size))
            .await
    }

    /// Run an audit and persist every discrepancy as a pending conflict.
    pub async fn audit(&self, scope: AuditScope) -> ProvisioningResult<AuditReport> {
        scope.validate().map_err(ProvisioningError::Validation)?;
        let mut report = AuditReport::begin(scope);
        info!(audit_id = %report.audit_id, scope = ?scope, "audit started");

        let limit = scope.key_limit();
        let mut keys: BTreeSet<SubscriberUid> = BTreeSet::new();
        keys.extend(list(self.cloud.as_ref(), limit).await?);
        keys.extend(list(self.legacy.as_ref(), limit).await?);

        let tolerance = self.config.stale_tolerance();
        for uid in &keys {
            let cloud = read(self.cloud.as_ref(), uid).await?;
            let legacy = read(self.legacy.as_ref(), uid).await?;

            let found = match (cloud, legacy) {
                // Deleted from both stores since listing.
                (None, None) => continue,
                (Some(c), None) => vec![
                    SyncConflict::new(uid.clone(), ConflictType::MissingInLegacy)
                        .with_values(c.field_value("status"), None),
                ],
                (None, Some(l)) => vec![
                    SyncConflict::new(uid.clone(), ConflictType::MissingInCloud)
                        .with_values(None, l.field_value("status")),
                ],
                (Some(c), Some(l)) => compare_records(&c, &l, tolerance),
            };

            report.compared_count += 1;
            if found.is_empty() {
                report.match_count += 1;
                continue;
            }

            for conflict in found {
                debug!(
                    uid = %uid,
                    conflict_type = conflict.conflict_type.as_str(),
                    field = ?conflict.field,
                    "discrepancy detected"
                );
                let mut discrepancy = Discrepancy::from(&conflict);
                match self.conflicts.record_unless_pending(conflict) {
                    Ok(id) => discrepancy.conflict_id = id,
                    Err(e) => {
                        error!(audit_id = %report.audit_id, uid = %uid, error = %e, "failed to persist conflict");
                        return Err(ProvisioningError::Storage(e.to_string()));
                    }
                }
                report.push(discrepancy);
            }
        }

        report.finished_at = Utc::now();
        info!(
            audit_id = %report.audit_id,
            compared = report.compared_count,
            matched = report.match_count,
            missing_in_cloud = report.missing_in_cloud,
            missing_in_legacy = report.missing_in_legacy,
            field_mismatch = report.field_mismatch,
            stale = report.stale,
            "audit finished"
        );
        Ok(report)
    }
}

async fn list(
    adapter: &dyn StoreAdapter,
    limit: Option<usize>,
) -> ProvisioningResult<Vec<SubscriberUid>> {
    adapter
        .list_uids(limit)
        .await
        .map_err(|e| ProvisioningError::from_store(adapter.kind(), e))
}

async fn read(
    adapter: &dyn StoreAdapter,
    uid: &SubscriberUid,
) -> ProvisioningResult<Option<Subscriber>> {
    match adapter.read(uid).await {
        Ok(record) => Ok(Some(record)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(ProvisioningError::from_store(adapter.kind(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterOp, InMemoryStoreAdapter};
    use crate::conflict_store::{ConflictFilter, InMemoryConflictStore};
    use proptest::prelude::*;
    use subprov_core::{ConflictId, ConflictResolution, SubscriberStatus};

    struct Fixture {
        cloud: Arc<InMemoryStoreAdapter>,
        legacy: Arc<InMemoryStoreAdapter>,
        conflicts: Arc<InMemoryConflictStore>,
        auditor: ConsistencyAuditor<Arc<InMemoryConflictStore>>,
    }

    fn fixture() -> Fixture {
        let cloud = Arc::new(InMemoryStoreAdapter::cloud());
        let legacy = Arc::new(InMemoryStoreAdapter::legacy());
        let conflicts = InMemoryConflictStore::arc();
        let auditor = ConsistencyAuditor::new(
            cloud.clone(),
            legacy.clone(),
            conflicts.clone(),
            AuditConfig::default(),
        )
        .unwrap();
        Fixture {
            cloud,
            legacy,
            conflicts,
            auditor,
        }
    }

    fn subscriber(uid: &str) -> Subscriber {
        Subscriber::new(uid, "15551234567", "310150123456789", "plan-basic")
    }

    fn seed_both(f: &Fixture, uids: &[&str]) {
        for uid in uids {
            let record = subscriber(uid);
            f.cloud.insert(record.clone());
            f.legacy.insert(record);
        }
    }

    #[test]
    fn mismatch_wins_over_stale() {
        let cloud = subscriber("U1");
        let mut legacy = cloud.clone().with_status(SubscriberStatus::Suspended);
        legacy.updated_at = cloud.updated_at - chrono::Duration::hours(2);

        let found = compare_records(&cloud, &legacy, Duration::from_secs(60));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].conflict_type, ConflictType::FieldMismatch);
        assert_eq!(found[0].field.as_deref(), Some("status"));
        assert_eq!(found[0].cloud_value.as_deref(), Some("ACTIVE"));
        assert_eq!(found[0].legacy_value.as_deref(), Some("SUSPENDED"));
    }

    #[test]
    fn stale_only_beyond_tolerance() {
        let cloud = subscriber("U1");
        let mut legacy = cloud.clone();

        legacy.updated_at = cloud.updated_at - chrono::Duration::seconds(30);
        assert!(compare_records(&cloud, &legacy, Duration::from_secs(60)).is_empty());

        legacy.updated_at = cloud.updated_at - chrono::Duration::seconds(90);
        let found = compare_records(&cloud, &legacy, Duration::from_secs(60));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].conflict_type, ConflictType::Stale);
    }

    #[test]
    fn one_mismatch_per_field() {
        let cloud = subscriber("U1");
        let mut legacy = cloud.clone();
        legacy.plan_id = "plan-gold".to_string();
        legacy.imsi = "310150000000000".to_string();

        let fields: Vec<_> = compare_records(&cloud, &legacy, Duration::from_secs(60))
            .into_iter()
            .filter_map(|c| c.field)
            .collect();
        assert_eq!(fields, vec!["planId".to_string(), "imsi".to_string()]);
    }

    #[tokio::test]
    async fn full_audit_classifies_and_persists() {
        let f = fixture();
        seed_both(&f, &["U1", "U2"]);
        f.cloud.insert(subscriber("U3"));
        f.legacy.insert(subscriber("U4"));
        f.legacy
            .insert(subscriber("U2").with_status(SubscriberStatus::Inactive));

        let report = f.auditor.audit(AuditScope::Full).await.unwrap();
        assert_eq!(report.compared_count, 4);
        assert_eq!(report.match_count, 1);
        assert_eq!(report.missing_in_legacy, 1);
        assert_eq!(report.missing_in_cloud, 1);
        assert_eq!(report.field_mismatch, 1);
        assert_eq!(report.discrepancy_count(), 3);

        let stored = f.conflicts.list(&ConflictFilter::default().pending()).unwrap();
        assert_eq!(stored.len(), 3);
        let u3 = f
            .conflicts
            .list(&ConflictFilter::for_uid("U3"))
            .unwrap();
        assert_eq!(u3[0].conflict_type, ConflictType::MissingInLegacy);
    }

    #[tokio::test]
    async fn sample_reads_both_sides_for_each_key() {
        let f = fixture();
        seed_both(&f, &["U1", "U2", "U3"]);
        f.legacy.insert(subscriber("A0"));

        // Cloud samples {U1, U2}, Legacy samples {A0, U1}. U2 is outside
        // Legacy's sample but present there, so it must not be reported.
        let report = f.auditor.audit(AuditScope::Sample(2)).await.unwrap();
        assert_eq!(report.compared_count, 3);
        assert_eq!(report.match_count, 2);
        assert_eq!(report.missing_in_cloud, 1);
        assert_eq!(report.missing_in_legacy, 0);
        assert_eq!(f.cloud.call_count(AdapterOp::ListUids), 1);
    }

    #[tokio::test]
    async fn repeated_audits_reuse_pending_conflicts() {
        let f = fixture();
        f.cloud.insert(subscriber("U1"));
        f.cloud.insert(subscriber("U2"));
        f.legacy
            .insert(subscriber("U2").with_status(SubscriberStatus::Suspended));

        let first = f.auditor.audit(AuditScope::Full).await.unwrap();
        let second = f.auditor.audit(AuditScope::Full).await.unwrap();
        f.auditor.audit(AuditScope::Full).await.unwrap();

        let u1 = f.conflicts.list(&ConflictFilter::for_uid("U1").pending()).unwrap();
        assert_eq!(u1.len(), 1);
        let u2 = f.conflicts.list(&ConflictFilter::for_uid("U2").pending()).unwrap();
        assert_eq!(u2.len(), 1);

        let ids = |r: &AuditReport| -> Vec<ConflictId> {
            r.discrepancies.iter().map(|d| d.conflict_id).collect()
        };
        assert_eq!(ids(&first), ids(&second));
        assert!(ids(&first).contains(&u1[0].id));
    }

    #[tokio::test]
    async fn resolved_drift_is_recorded_again_when_it_persists() {
        let f = fixture();
        f.cloud.insert(subscriber("U1"));

        let first = f.auditor.audit(AuditScope::Full).await.unwrap();
        f.conflicts
            .resolve(first.discrepancies[0].conflict_id, ConflictResolution::Ignored)
            .unwrap();

        let second = f.auditor.audit(AuditScope::Full).await.unwrap();
        assert_ne!(
            second.discrepancies[0].conflict_id,
            first.discrepancies[0].conflict_id
        );
        assert_eq!(
            f.conflicts.list(&ConflictFilter::for_uid("U1").pending()).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn default_sample_uses_configured_size() {
        let cloud = Arc::new(InMemoryStoreAdapter::cloud());
        let legacy = Arc::new(InMemoryStoreAdapter::legacy());
        let auditor = ConsistencyAuditor::new(
            cloud.clone(),
            legacy.clone(),
            InMemoryConflictStore::arc(),
            AuditConfig {
                default_sample_size: 2,
                ..AuditConfig::default()
            },
        )
        .unwrap();
        for uid in ["U1", "U2", "U3", "U4"] {
            cloud.insert(subscriber(uid));
            legacy.insert(subscriber(uid));
        }

        let report = auditor.audit_default_sample().await.unwrap();
        assert_eq!(report.scope, AuditScope::Sample(2));
        assert_eq!(report.compared_count, 2);
        assert!(report.is_consistent());
    }

    #[tokio::test]
    async fn store_outage_aborts_audit() {
        let f = fixture();
        seed_both(&f, &["U1"]);
        f.legacy.set_unavailable(Some("maintenance"));

        let err = f.auditor.audit(AuditScope::Full).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisioningError::StoreUnavailable {
                store: StoreKind::Legacy,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn empty_sample_rejected() {
        let f = fixture();
        assert!(matches!(
            f.auditor.audit(AuditScope::Sample(0)).await,
            Err(ProvisioningError::Validation(_))
        ));
    }

    #[test]
    fn adapters_must_match_roles() {
        let result = ConsistencyAuditor::new(
            Arc::new(InMemoryStoreAdapter::legacy()),
            Arc::new(InMemoryStoreAdapter::legacy()),
            InMemoryConflictStore::arc(),
            AuditConfig::default(),
        );
        assert!(result.is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: identical stores audit clean; dropping one Legacy record
        /// yields exactly one MISSING_IN_LEGACY for that uid.
        #[test]
        fn audit_symmetry(
            uids in prop::collection::btree_set("[A-Z][0-9]{1,4}", 1..30),
            pick in any::<prop::sample::Index>(),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let uids: Vec<String> = uids.into_iter().collect();

            rt.block_on(async {
                let f = fixture();
                let refs: Vec<&str> = uids.iter().map(String::as_str).collect();
                seed_both(&f, &refs);

                let clean = f.auditor.audit(AuditScope::Full).await.unwrap();
                prop_assert!(clean.is_consistent());
                prop_assert_eq!(clean.match_count, uids.len() as u64);

                let removed = SubscriberUid::new(pick.get(&uids).as_str());
                f.legacy.remove(&removed);

                let report = f.auditor.audit(AuditScope::Full).await.unwrap();
                prop_assert_eq!(report.discrepancy_count(), 1);
                prop_assert_eq!(report.missing_in_legacy, 1);
                prop_assert_eq!(&report.discrepancies[0].uid, &removed);
                Ok(())
            })?;
        }
    }
}
