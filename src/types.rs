//! Core record types shared by the balancer, the processor, and checkpoint
//! store implementations.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Scope key identifying one partition's records within a consumer group.
///
/// Ownership and checkpoint records are both keyed by
/// `(namespace, eventhub, consumer group, partition)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub fully_qualified_namespace: String,
    pub eventhub_name: String,
    pub consumer_group: String,
    pub partition_id: String,
}

/// A time-bounded claim by one processor instance on one partition.
///
/// At most one record exists per [`RecordKey`]. A record is *active* while
/// it was modified less than the ownership timeout ago; an empty `owner_id`
/// denotes an explicitly released partition and is never active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ownership {
    pub fully_qualified_namespace: String,
    pub eventhub_name: String,
    pub consumer_group: String,
    pub partition_id: String,

    /// Identifier of the instance currently claiming the partition.
    /// Empty string means explicitly released.
    pub owner_id: String,

    /// Last time the record was written by a successful claim.
    pub last_modified_time: SystemTime,

    /// Opaque optimistic-concurrency token assigned by the store.
    /// `None` for a record that has never been written.
    pub etag: Option<String>,
}

impl Ownership {
    /// Whether this record is still a live claim as of `now`.
    pub fn is_active(&self, now: SystemTime, ownership_timeout: Duration) -> bool {
        if self.owner_id.is_empty() {
            return false;
        }
        match now.duration_since(self.last_modified_time) {
            Ok(age) => age < ownership_timeout,
            // Record from the future (clock skew between instances): treat
            // as freshly modified rather than expired.
            Err(_) => true,
        }
    }

    /// The record's scope key.
    pub fn key(&self) -> RecordKey {
        RecordKey {
            fully_qualified_namespace: self.fully_qualified_namespace.clone(),
            eventhub_name: self.eventhub_name.clone(),
            consumer_group: self.consumer_group.clone(),
            partition_id: self.partition_id.clone(),
        }
    }
}

/// A durable bookmark of read progress for a partition within a consumer
/// group. `sequence_number` is expected to be non-decreasing per partition
/// but the store does not enforce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub fully_qualified_namespace: String,
    pub eventhub_name: String,
    pub consumer_group: String,
    pub partition_id: String,

    /// Opaque offset string understood by the transport.
    pub offset: String,

    /// Sequence number of the last handled event.
    pub sequence_number: i64,
}

impl Checkpoint {
    /// The record's scope key.
    pub fn key(&self) -> RecordKey {
        RecordKey {
            fully_qualified_namespace: self.fully_qualified_namespace.clone(),
            eventhub_name: self.eventhub_name.clone(),
            consumer_group: self.consumer_group.clone(),
            partition_id: self.partition_id.clone(),
        }
    }
}

/// Why a per-partition consumer task closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The processor is stopping.
    Shutdown,
    /// The partition's ownership moved to another instance, or a
    /// checkpoint write was rejected because ownership changed.
    OwnershipLost,
    /// The transport failed while receiving from the partition.
    EventhubException,
    /// A user-supplied handler returned an error.
    ProcessEventsError,
}

/// How aggressively an instance claims partitions it is entitled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancingStrategy {
    /// Claim every currently claimable partition in one round when under
    /// the expected share. Never steals more than one per round.
    #[default]
    Greedy,
    /// Adjust at most one partition per round (claim or steal).
    Balanced,
}

/// Observational metadata about the newest event in a partition, refreshed
/// from transport metadata when tracking is enabled. Has no effect on
/// coordination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastEnqueuedEventProperties {
    pub sequence_number: i64,
    pub offset: String,
    pub enqueued_time: SystemTime,
    /// When this metadata was observed locally.
    pub retrieval_time: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ownership(owner_id: &str, age: Duration) -> Ownership {
        Ownership {
            fully_qualified_namespace: "ns".into(),
            eventhub_name: "hub".into(),
            consumer_group: "$default".into(),
            partition_id: "0".into(),
            owner_id: owner_id.into(),
            last_modified_time: SystemTime::now() - age,
            etag: Some("1".into()),
        }
    }

    #[test]
    fn test_fresh_record_is_active() {
        let record = ownership("a", Duration::from_secs(1));
        assert!(record.is_active(SystemTime::now(), Duration::from_secs(30)));
    }

    #[test]
    fn test_expired_record_is_inactive() {
        let record = ownership("a", Duration::from_secs(60));
        assert!(!record.is_active(SystemTime::now(), Duration::from_secs(30)));
    }

    #[test]
    fn test_released_record_is_never_active() {
        let record = ownership("", Duration::from_secs(0));
        assert!(!record.is_active(SystemTime::now(), Duration::from_secs(30)));
    }

    #[test]
    fn test_future_record_is_active() {
        let mut record = ownership("a", Duration::from_secs(0));
        record.last_modified_time = SystemTime::now() + Duration::from_secs(5);
        assert!(record.is_active(SystemTime::now(), Duration::from_secs(30)));
    }

    #[test]
    fn test_keys_match_across_record_kinds() {
        let own = ownership("a", Duration::from_secs(0));
        let checkpoint = Checkpoint {
            fully_qualified_namespace: "ns".into(),
            eventhub_name: "hub".into(),
            consumer_group: "$default".into(),
            partition_id: "0".into(),
            offset: "42".into(),
            sequence_number: 42,
        };
        assert_eq!(own.key(), checkpoint.key());
    }
}
