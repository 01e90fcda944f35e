//! Per-partition identity handle exposed to user callbacks.

use crate::error::Result;
use crate::store::CheckpointStore;
use crate::stream::ReceivedEvent;
use crate::types::{Checkpoint, LastEnqueuedEventProperties};
use parking_lot::RwLock;
use std::sync::Arc;

/// Identity of one owned partition plus the checkpoint write path.
///
/// Created when a partition task starts and destroyed when it closes. The
/// identity fields are immutable; the last-enqueued cache is observational
/// only and has no effect on coordination.
pub struct PartitionContext {
    fully_qualified_namespace: String,
    eventhub_name: String,
    consumer_group: String,
    partition_id: String,
    owner_id: String,
    store: Arc<dyn CheckpointStore>,
    last_enqueued: RwLock<Option<LastEnqueuedEventProperties>>,
}

impl PartitionContext {
    pub(crate) fn new(
        fully_qualified_namespace: String,
        eventhub_name: String,
        consumer_group: String,
        partition_id: String,
        owner_id: String,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            fully_qualified_namespace,
            eventhub_name,
            consumer_group,
            partition_id,
            owner_id,
            store,
            last_enqueued: RwLock::new(None),
        }
    }

    pub fn fully_qualified_namespace(&self) -> &str {
        &self.fully_qualified_namespace
    }

    pub fn eventhub_name(&self) -> &str {
        &self.eventhub_name
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    /// Owner id of the instance running this partition's task.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Record read progress for this partition.
    ///
    /// Propagates [`Error::OwnershipLost`](crate::Error::OwnershipLost)
    /// when another instance has claimed the partition; returning that
    /// error from the event handler closes the task with the
    /// [`CloseReason::OwnershipLost`](crate::CloseReason::OwnershipLost)
    /// reason.
    pub async fn update_checkpoint(
        &self,
        offset: impl Into<String>,
        sequence_number: i64,
    ) -> Result<()> {
        let checkpoint = Checkpoint {
            fully_qualified_namespace: self.fully_qualified_namespace.clone(),
            eventhub_name: self.eventhub_name.clone(),
            consumer_group: self.consumer_group.clone(),
            partition_id: self.partition_id.clone(),
            offset: offset.into(),
            sequence_number,
        };
        self.store
            .update_checkpoint(checkpoint, &self.owner_id)
            .await
    }

    /// Checkpoint at a received event's position.
    pub async fn update_checkpoint_from_event(&self, event: &ReceivedEvent) -> Result<()> {
        self.update_checkpoint(event.offset.clone(), event.sequence_number)
            .await
    }

    /// Metadata about the newest event in the partition, when tracking is
    /// enabled and the transport has reported it.
    pub fn last_enqueued_event_properties(&self) -> Option<LastEnqueuedEventProperties> {
        self.last_enqueued.read().clone()
    }

    pub(crate) fn set_last_enqueued(&self, properties: LastEnqueuedEventProperties) {
        *self.last_enqueued.write() = Some(properties);
    }
}

impl std::fmt::Debug for PartitionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionContext")
            .field("partition_id", &self.partition_id)
            .field("consumer_group", &self.consumer_group)
            .field("owner_id", &self.owner_id)
            .finish()
    }
}
