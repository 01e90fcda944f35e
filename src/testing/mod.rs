//! Testing utilities for the event processor.
//!
//! Provides a collecting [`EventHandler`] that records everything it
//! observes, a checkpoint-store wrapper with injectable listing failures,
//! and eventual-condition helpers. Multi-instance scenario tests live in
//! the sibling `*_tests` files.

mod load_balancing_tests;

use crate::error::{BoxError, Error, Result};
use crate::processor::{EventHandler, PartitionContext};
use crate::store::{CheckpointStore, InMemoryCheckpointStore};
use crate::stream::ReceivedEvent;
use crate::types::{Checkpoint, CloseReason, Ownership};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Poll a condition every 10ms until it holds or the timeout elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Async-condition variant of [`wait_until`].
pub async fn wait_until_async<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Handler that records batches, closes, errors, and initializations, and
/// checkpoints every event it handles (unless disabled). Failure injection
/// flags make the next callback of a kind fail once.
#[derive(Default)]
pub struct CollectingHandler {
    auto_checkpoint: bool,
    events: Mutex<HashMap<String, Vec<ReceivedEvent>>>,
    initialized: Mutex<Vec<String>>,
    closes: Mutex<Vec<(String, CloseReason)>>,
    errors: Mutex<Vec<(Option<String>, String)>>,
    batches: AtomicUsize,
    fail_next_batch: AtomicBool,
    fail_next_initialize: AtomicBool,
}

impl CollectingHandler {
    /// A handler that checkpoints after every non-empty batch.
    pub fn new() -> Self {
        Self {
            auto_checkpoint: true,
            ..Default::default()
        }
    }

    /// A handler that never writes checkpoints.
    pub fn without_checkpointing() -> Self {
        Self::default()
    }

    /// Number of `on_events` invocations, empty batches included.
    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Total events handled across partitions.
    pub fn event_count(&self) -> usize {
        self.events.lock().values().map(Vec::len).sum()
    }

    /// Events handled for one partition, in order.
    pub fn events_for(&self, partition_id: &str) -> Vec<ReceivedEvent> {
        self.events
            .lock()
            .get(partition_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Partition ids the initialize callback ran for.
    pub fn initialized(&self) -> Vec<String> {
        self.initialized.lock().clone()
    }

    /// `(partition_id, reason)` pairs, in close order.
    pub fn closes(&self) -> Vec<(String, CloseReason)> {
        self.closes.lock().clone()
    }

    /// `(partition_id, message)` pairs reported through the error callback;
    /// the partition id is `None` for round-global failures.
    pub fn errors(&self) -> Vec<(Option<String>, String)> {
        self.errors.lock().clone()
    }

    /// Make the next `on_events` invocation return an error.
    pub fn fail_next_batch(&self) {
        self.fail_next_batch.store(true, Ordering::SeqCst);
    }

    /// Make the next `on_partition_initialize` invocation return an error.
    pub fn fail_next_initialize(&self) {
        self.fail_next_initialize.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventHandler for CollectingHandler {
    async fn on_events(
        &self,
        context: &PartitionContext,
        events: &[ReceivedEvent],
    ) -> std::result::Result<(), BoxError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_batch.swap(false, Ordering::SeqCst) {
            return Err("injected batch failure".into());
        }
        if events.is_empty() {
            return Ok(());
        }

        self.events
            .lock()
            .entry(context.partition_id().to_string())
            .or_default()
            .extend_from_slice(events);

        if self.auto_checkpoint {
            if let Some(last) = events.last() {
                context
                    .update_checkpoint_from_event(last)
                    .await
                    .map_err(|err| -> BoxError { Box::new(err) })?;
            }
        }
        Ok(())
    }

    async fn on_error(&self, context: Option<&PartitionContext>, error: &Error) {
        self.errors.lock().push((
            context.map(|ctx| ctx.partition_id().to_string()),
            error.to_string(),
        ));
    }

    async fn on_partition_initialize(
        &self,
        context: &PartitionContext,
    ) -> std::result::Result<(), BoxError> {
        if self.fail_next_initialize.swap(false, Ordering::SeqCst) {
            return Err("injected initialize failure".into());
        }
        self.initialized
            .lock()
            .push(context.partition_id().to_string());
        Ok(())
    }

    async fn on_partition_close(&self, context: &PartitionContext, reason: CloseReason) {
        self.closes
            .lock()
            .push((context.partition_id().to_string(), reason));
    }
}

/// Checkpoint store wrapper that fails a configurable number of upcoming
/// `list_ownership` calls, then behaves normally.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryCheckpointStore,
    list_ownership_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls to `list_ownership`.
    pub fn fail_list_ownership(&self, count: usize) {
        self.list_ownership_failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn list_ownership(
        &self,
        fully_qualified_namespace: &str,
        eventhub_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<Ownership>> {
        let remaining = self.list_ownership_failures.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .list_ownership_failures
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(Error::store("injected listing failure"));
        }
        self.inner
            .list_ownership(fully_qualified_namespace, eventhub_name, consumer_group)
            .await
    }

    async fn claim_ownership(&self, requested: Vec<Ownership>) -> Result<Vec<Ownership>> {
        self.inner.claim_ownership(requested).await
    }

    async fn list_checkpoints(
        &self,
        fully_qualified_namespace: &str,
        eventhub_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<Checkpoint>> {
        self.inner
            .list_checkpoints(fully_qualified_namespace, eventhub_name, consumer_group)
            .await
    }

    async fn update_checkpoint(&self, checkpoint: Checkpoint, owner_id: &str) -> Result<()> {
        self.inner.update_checkpoint(checkpoint, owner_id).await
    }
}
