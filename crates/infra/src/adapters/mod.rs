//! Store adapters: one uniform CRUD surface per physical store.
//!
//! Each adapter owns the mapping between the canonical [`Subscriber`] and its
//! native schema, and maps driver failures onto [`StoreError`]. The raw
//! drivers themselves live outside this crate.

pub mod in_memory;

use async_trait::async_trait;

use subprov_core::{CreatePolicy, StoreError, StoreKind, Subscriber, SubscriberUid};

pub use in_memory::{AdapterOp, InMemoryStoreAdapter};

/// CRUD interface over one physical store.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Which store this adapter talks to.
    fn kind(&self) -> StoreKind;

    /// Insert a subscriber. An existing `uid` is overwritten or rejected
    /// according to `policy`.
    async fn create(
        &self,
        subscriber: &Subscriber,
        policy: CreatePolicy,
    ) -> Result<Subscriber, StoreError>;

    async fn read(&self, uid: &SubscriberUid) -> Result<Subscriber, StoreError>;

    /// Replace an existing subscriber; `NotFound` if absent.
    async fn update(&self, subscriber: &Subscriber) -> Result<Subscriber, StoreError>;

    /// Hard-delete a subscriber, returning the removed record.
    async fn delete(&self, uid: &SubscriberUid) -> Result<Subscriber, StoreError>;

    /// Keys in ascending order, bounded by `limit` when set.
    async fn list_uids(&self, limit: Option<usize>) -> Result<Vec<SubscriberUid>, StoreError>;
}
