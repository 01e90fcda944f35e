//! Transport collaborator interfaces.
//!
//! The wire protocol that actually moves events (framing, sessions, links,
//! authentication) lives behind these traits. The processor only needs the
//! partition-id set and a per-partition consumer handle with a bounded
//! receive and a close.

mod simulated;

pub use simulated::SimulatedStream;

use crate::error::Result;
use crate::types::LastEnqueuedEventProperties;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::{Duration, SystemTime};

/// Where a partition consumer starts reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartingPosition {
    /// From the oldest retained event.
    Earliest,
    /// Only events enqueued after the consumer is created.
    Latest,
    /// Just after the event with this offset (checkpoint resume).
    Offset(String),
    /// Just after the event with this sequence number.
    SequenceNumber(i64),
}

/// One event pulled from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedEvent {
    /// Opaque payload.
    pub body: Bytes,
    /// Opaque offset usable as a checkpoint position.
    pub offset: String,
    /// Sequence number within the partition.
    pub sequence_number: i64,
    /// When the service accepted the event.
    pub enqueued_time: SystemTime,
}

/// Client for a partitioned event stream (consumed interface).
#[async_trait]
pub trait StreamClient: Send + Sync + 'static {
    /// The full partition-id set of the stream.
    async fn partition_ids(&self) -> Result<Vec<String>>;

    /// Open a consumer on one partition.
    async fn create_consumer(
        &self,
        consumer_group: &str,
        partition_id: &str,
        starting_position: StartingPosition,
    ) -> Result<Box<dyn PartitionConsumer>>;
}

/// A consumer handle on one partition.
#[async_trait]
pub trait PartitionConsumer: Send {
    /// Receive up to `max_batch` events, waiting at most `max_wait`.
    /// Returns an empty batch when the wait elapses with nothing to read.
    async fn receive(&mut self, max_batch: usize, max_wait: Duration) -> Result<Vec<ReceivedEvent>>;

    /// Metadata about the newest event in the partition, when the transport
    /// exposes it.
    fn last_enqueued_event_properties(&self) -> Option<LastEnqueuedEventProperties>;

    /// Release the consumer's transport resources.
    async fn close(&mut self) -> Result<()>;
}
