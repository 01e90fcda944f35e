//! Checkpoint store contract.
//!
//! The store is the only cross-process shared mutable state. Every mutation
//! is a single-record conditional write; the store, not the client, is the
//! sole arbiter of "exactly one winner" for a partition at a given instant.
//! No transactions across records are ever assumed.

mod memory;

pub use memory::InMemoryCheckpointStore;

use crate::error::Result;
use crate::types::{Checkpoint, Ownership};
use async_trait::async_trait;

/// Durable, optimistic-concurrency key-value collaborator holding ownership
/// and checkpoint records.
///
/// Implementations back this with whatever storage they like (blob metadata,
/// a database row per record, an in-memory map for tests); the contract only
/// requires per-record conditional writes keyed on the record's etag.
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// List current ownership records for the scope. Results may be stale
    /// by network latency; callers must tolerate losing claims they derive
    /// from this snapshot.
    async fn list_ownership(
        &self,
        fully_qualified_namespace: &str,
        eventhub_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<Ownership>>;

    /// Attempt a conditional write per record: if-match on the supplied
    /// etag for an existing record, if-none-match for a brand-new one
    /// (`etag == None`). Returns only the subset that succeeded, each with
    /// its new etag and refreshed `last_modified_time`.
    ///
    /// Losing a race for a partition is not an error; the caller simply
    /// does not receive that partition back.
    async fn claim_ownership(&self, requested: Vec<Ownership>) -> Result<Vec<Ownership>>;

    /// List current checkpoint records for the scope.
    async fn list_checkpoints(
        &self,
        fully_qualified_namespace: &str,
        eventhub_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<Checkpoint>>;

    /// Write a checkpoint on behalf of `owner_id`. Fails with
    /// [`Error::OwnershipLost`](crate::Error::OwnershipLost) when the
    /// partition's ownership record no longer names `owner_id` (someone
    /// else claimed the partition). Rewriting an identical checkpoint is
    /// not an error.
    async fn update_checkpoint(&self, checkpoint: Checkpoint, owner_id: &str) -> Result<()>;
}
