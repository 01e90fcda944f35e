//! In-memory event stream.
//!
//! Implements the transport traits against per-partition append logs.
//! Used by the scenario tests and for local development; events are
//! published with [`SimulatedStream::push`] and retained indefinitely.

use crate::error::{Error, Result};
use crate::stream::{PartitionConsumer, ReceivedEvent, StartingPosition, StreamClient};
use crate::types::LastEnqueuedEventProperties;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Notify;
use tokio::time::timeout;

struct PartitionLog {
    events: RwLock<Vec<ReceivedEvent>>,
    publish: Notify,
    /// Sticky flag making the next receive fail, for transport-error tests.
    fail_next_receive: AtomicBool,
}

impl PartitionLog {
    fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            publish: Notify::new(),
            fail_next_receive: AtomicBool::new(false),
        }
    }
}

/// An in-memory partitioned stream with a fixed partition count.
pub struct SimulatedStream {
    partitions: Vec<(String, Arc<PartitionLog>)>,
}

impl SimulatedStream {
    /// Create a stream with partitions `"0"` through `"{count - 1}"`.
    pub fn new(partition_count: usize) -> Self {
        let partitions = (0..partition_count)
            .map(|id| (id.to_string(), Arc::new(PartitionLog::new())))
            .collect();
        Self { partitions }
    }

    fn log(&self, partition_id: &str) -> Result<&Arc<PartitionLog>> {
        self.partitions
            .iter()
            .find(|(id, _)| id == partition_id)
            .map(|(_, log)| log)
            .ok_or_else(|| Error::transport(format!("unknown partition {partition_id}")))
    }

    /// Publish an event to a partition. Offsets and sequence numbers are
    /// assigned in append order.
    pub fn push(&self, partition_id: &str, body: impl Into<Bytes>) {
        if let Ok(log) = self.log(partition_id) {
            let mut events = log.events.write();
            let sequence_number = events.len() as i64;
            events.push(ReceivedEvent {
                body: body.into(),
                offset: sequence_number.to_string(),
                sequence_number,
                enqueued_time: SystemTime::now(),
            });
            drop(events);
            log.publish.notify_waiters();
        }
    }

    /// Number of events published to a partition.
    pub fn len(&self, partition_id: &str) -> usize {
        self.log(partition_id)
            .map(|log| log.events.read().len())
            .unwrap_or(0)
    }

    /// Whether a partition has no events.
    pub fn is_empty(&self, partition_id: &str) -> bool {
        self.len(partition_id) == 0
    }

    /// Make the next receive on a partition fail with a transport error.
    pub fn inject_receive_failure(&self, partition_id: &str) {
        if let Ok(log) = self.log(partition_id) {
            log.fail_next_receive.store(true, Ordering::SeqCst);
            log.publish.notify_waiters();
        }
    }
}

#[async_trait]
impl StreamClient for SimulatedStream {
    async fn partition_ids(&self) -> Result<Vec<String>> {
        Ok(self.partitions.iter().map(|(id, _)| id.clone()).collect())
    }

    async fn create_consumer(
        &self,
        _consumer_group: &str,
        partition_id: &str,
        starting_position: StartingPosition,
    ) -> Result<Box<dyn PartitionConsumer>> {
        let log = self.log(partition_id)?.clone();

        let cursor = {
            let events = log.events.read();
            match starting_position {
                StartingPosition::Earliest => 0,
                StartingPosition::Latest => events.len(),
                StartingPosition::Offset(offset) => {
                    // Resume just after the checkpointed event.
                    offset
                        .parse::<usize>()
                        .map_err(|_| Error::transport(format!("malformed offset {offset:?}")))?
                        + 1
                }
                StartingPosition::SequenceNumber(sequence) => (sequence + 1).max(0) as usize,
            }
        };

        Ok(Box::new(SimulatedConsumer { log, cursor }))
    }
}

struct SimulatedConsumer {
    log: Arc<PartitionLog>,
    cursor: usize,
}

impl SimulatedConsumer {
    fn take_batch(&mut self, max_batch: usize) -> Vec<ReceivedEvent> {
        let events = self.log.events.read();
        let available = events.len().saturating_sub(self.cursor);
        let count = available.min(max_batch);
        let batch = events[self.cursor..self.cursor + count].to_vec();
        self.cursor += count;
        batch
    }
}

#[async_trait]
impl PartitionConsumer for SimulatedConsumer {
    async fn receive(&mut self, max_batch: usize, max_wait: Duration) -> Result<Vec<ReceivedEvent>> {
        let deadline = Instant::now() + max_wait;

        loop {
            // Register for publish wakeups before checking the log so a
            // concurrent push cannot slip between check and wait.
            let log = self.log.clone();
            let published = log.publish.notified();

            if self.log.fail_next_receive.swap(false, Ordering::SeqCst) {
                return Err(Error::transport("simulated receive failure"));
            }

            let batch = self.take_batch(max_batch);
            if !batch.is_empty() {
                return Ok(batch);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || timeout(remaining, published).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    fn last_enqueued_event_properties(&self) -> Option<LastEnqueuedEventProperties> {
        let events = self.log.events.read();
        events.last().map(|event| LastEnqueuedEventProperties {
            sequence_number: event.sequence_number,
            offset: event.offset.clone(),
            enqueued_time: event.enqueued_time,
            retrieval_time: SystemTime::now(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
