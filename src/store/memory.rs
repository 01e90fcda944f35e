//! In-memory checkpoint store.
//!
//! Reference implementation of [`CheckpointStore`] used as the canonical
//! fixture for balancing tests and for local development. Etags are a
//! monotonically incrementing counter; every conditional write goes through
//! a single map entry, so racing claimers resolve to exactly one winner.

use crate::error::{Error, Result};
use crate::store::CheckpointStore;
use crate::types::{Checkpoint, Ownership, RecordKey};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::debug;

/// A plain in-memory map keyed by `(namespace, eventhub, consumer group,
/// partition)` with counter etags.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    ownerships: DashMap<RecordKey, Ownership>,
    checkpoints: DashMap<RecordKey, Checkpoint>,
    etag_counter: AtomicU64,
}

impl InMemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_etag(&self) -> String {
        self.etag_counter.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn in_scope(key: &RecordKey, namespace: &str, eventhub: &str, consumer_group: &str) -> bool {
        key.fully_qualified_namespace == namespace
            && key.eventhub_name == eventhub
            && key.consumer_group == consumer_group
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn list_ownership(
        &self,
        fully_qualified_namespace: &str,
        eventhub_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<Ownership>> {
        Ok(self
            .ownerships
            .iter()
            .filter(|entry| {
                Self::in_scope(
                    entry.key(),
                    fully_qualified_namespace,
                    eventhub_name,
                    consumer_group,
                )
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn claim_ownership(&self, requested: Vec<Ownership>) -> Result<Vec<Ownership>> {
        let mut claimed = Vec::with_capacity(requested.len());
        let now = SystemTime::now();

        for mut request in requested {
            match self.ownerships.entry(request.key()) {
                Entry::Occupied(mut slot) => {
                    // If-match: only the holder of the current etag wins.
                    if request.etag.is_some() && request.etag == slot.get().etag {
                        request.etag = Some(self.next_etag());
                        request.last_modified_time = now;
                        slot.insert(request.clone());
                        claimed.push(request);
                    } else {
                        debug!(
                            partition_id = %request.partition_id,
                            owner_id = %request.owner_id,
                            "Claim lost: etag mismatch"
                        );
                    }
                }
                Entry::Vacant(slot) => {
                    // If-none-match: only a brand-new request may create.
                    if request.etag.is_none() {
                        request.etag = Some(self.next_etag());
                        request.last_modified_time = now;
                        slot.insert(request.clone());
                        claimed.push(request);
                    } else {
                        debug!(
                            partition_id = %request.partition_id,
                            owner_id = %request.owner_id,
                            "Claim lost: record no longer exists"
                        );
                    }
                }
            }
        }

        Ok(claimed)
    }

    async fn list_checkpoints(
        &self,
        fully_qualified_namespace: &str,
        eventhub_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<Checkpoint>> {
        Ok(self
            .checkpoints
            .iter()
            .filter(|entry| {
                Self::in_scope(
                    entry.key(),
                    fully_qualified_namespace,
                    eventhub_name,
                    consumer_group,
                )
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn update_checkpoint(&self, checkpoint: Checkpoint, owner_id: &str) -> Result<()> {
        let key = checkpoint.key();

        let owned = self
            .ownerships
            .get(&key)
            .map(|record| record.owner_id == owner_id)
            .unwrap_or(false);
        if !owned {
            return Err(Error::OwnershipLost {
                partition_id: checkpoint.partition_id,
            });
        }

        self.checkpoints.insert(key, checkpoint);
        Ok(())
    }
}
