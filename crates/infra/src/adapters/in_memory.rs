//! In-memory store adapter for tests/dev.
//!
//! Stands in for either store (`StoreKind` is a constructor argument) and can
//! inject failures and latency per operation, while counting every call.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use subprov_core::{CreatePolicy, StoreError, StoreKind, Subscriber, SubscriberUid};

use super::StoreAdapter;

/// Adapter operation, used to target fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterOp {
    Create,
    Read,
    Update,
    Delete,
    ListUids,
}

#[derive(Debug, Default)]
struct Faults {
    queued: HashMap<AdapterOp, VecDeque<StoreError>>,
    unavailable: Option<String>,
}

/// In-memory adapter keyed by `uid`.
#[derive(Debug)]
pub struct InMemoryStoreAdapter {
    kind: StoreKind,
    records: RwLock<BTreeMap<SubscriberUid, Subscriber>>,
    faults: Mutex<Faults>,
    calls: Mutex<HashMap<AdapterOp, u64>>,
    latency: Option<Duration>,
}

impl InMemoryStoreAdapter {
    pub fn new(kind: StoreKind) -> Self {
        Self {
            kind,
            records: RwLock::new(BTreeMap::new()),
            faults: Mutex::new(Faults::default()),
            calls: Mutex::new(HashMap::new()),
            latency: None,
        }
    }

    pub fn cloud() -> Self {
        Self::new(StoreKind::Cloud)
    }

    pub fn legacy() -> Self {
        Self::new(StoreKind::Legacy)
    }

    /// Delay every call by `latency` before it touches the records.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next call of `op` with `error`. Queued faults fire in order.
    pub fn fail_next(&self, op: AdapterOp, error: StoreError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.queued.entry(op).or_default().push_back(error);
        }
    }

    /// Make every call fail with `Unavailable` until cleared with `None`.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.unavailable = reason.map(str::to_string);
        }
    }

    /// Number of calls received for `op`, including failed ones.
    pub fn call_count(&self, op: AdapterOp) -> u64 {
        self.calls
            .lock()
            .map(|calls| calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Seed a record directly, bypassing validation, faults and counters.
    pub fn insert(&self, subscriber: Subscriber) {
        if let Ok(mut records) = self.records.write() {
            records.insert(subscriber.uid.clone(), subscriber);
        }
    }

    /// Drop a record directly, bypassing faults and counters.
    pub fn remove(&self, uid: &SubscriberUid) -> Option<Subscriber> {
        self.records.write().ok()?.remove(uid)
    }

    /// Current copy of a record, bypassing faults and counters.
    pub fn get(&self, uid: &SubscriberUid) -> Option<Subscriber> {
        self.records.read().ok()?.get(uid).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn enter(&self, op: AdapterOp) -> Result<(), StoreError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(op).or_insert(0) += 1;
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut faults = self.faults.lock().map_err(|_| self.poisoned())?;
        if let Some(reason) = &faults.unavailable {
            return Err(StoreError::unavailable(reason.clone()));
        }
        if let Some(err) = faults.queued.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(())
    }

    fn poisoned(&self) -> StoreError {
        StoreError::unavailable(format!("{} adapter lock poisoned", self.kind))
    }
}

#[async_trait]
impl StoreAdapter for InMemoryStoreAdapter {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    async fn create(
        &self,
        subscriber: &Subscriber,
        policy: CreatePolicy,
    ) -> Result<Subscriber, StoreError> {
        self.enter(AdapterOp::Create).await?;
        subscriber.validate()?;

        let mut records = self.records.write().map_err(|_| self.poisoned())?;
        let now = Utc::now();
        let mut stored = subscriber.clone();

        match records.get(&subscriber.uid) {
            Some(_) if policy == CreatePolicy::Reject => {
                return Err(StoreError::AlreadyExists(subscriber.uid.clone()));
            }
            Some(existing) => {
                stored.created_at = existing.created_at;
                stored.updated_at = now;
            }
            None => {
                stored.created_at = now;
                stored.updated_at = now;
            }
        }

        records.insert(stored.uid.clone(), stored.clone());
        Ok(stored)
    }

    async fn read(&self, uid: &SubscriberUid) -> Result<Subscriber, StoreError> {
        self.enter(AdapterOp::Read).await?;
        let records = self.records.read().map_err(|_| self.poisoned())?;
        records
            .get(uid)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(uid.clone()))
    }

    async fn update(&self, subscriber: &Subscriber) -> Result<Subscriber, StoreError> {
        self.enter(AdapterOp::Update).await?;
        subscriber.validate()?;

        let mut records = self.records.write().map_err(|_| self.poisoned())?;
        let existing = records
            .get(&subscriber.uid)
            .ok_or_else(|| StoreError::NotFound(subscriber.uid.clone()))?;

        let mut stored = subscriber.clone();
        stored.created_at = existing.created_at;
        stored.updated_at = Utc::now();
        records.insert(stored.uid.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete(&self, uid: &SubscriberUid) -> Result<Subscriber, StoreError> {
        self.enter(AdapterOp::Delete).await?;
        let mut records = self.records.write().map_err(|_| self.poisoned())?;
        records
            .remove(uid)
            .ok_or_else(|| StoreError::NotFound(uid.clone()))
    }

    async fn list_uids(&self, limit: Option<usize>) -> Result<Vec<SubscriberUid>, StoreError> {
        self.enter(AdapterOp::ListUids).await?;
        let records = self.records.read().map_err(|_| self.poisoned())?;
        let keys = records.keys().cloned();
        Ok(match limit {
            Some(n) => keys.take(n).collect(),
            None => keys.collect(),
        })
    }
}
