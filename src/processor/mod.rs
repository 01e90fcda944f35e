//! Event processor orchestration.
//!
//! The processor runs one balancing loop plus one supervised pump per owned
//! partition. The loop periodically asks the [`OwnershipManager`] for this
//! round's claim set and reconciles it against running pumps: partitions
//! gained get a pump started, partitions lost get their pump cancelled with
//! the `OwnershipLost` reason. `stop()` cancels everything and does not
//! return until every pump has fully closed.

mod context;
mod handlers;
mod pump;

pub use context::PartitionContext;
pub use handlers::EventHandler;

use crate::balancer::OwnershipManager;
use crate::config::ProcessorConfig;
use crate::error::{Error, Result};
use crate::store::CheckpointStore;
use crate::stream::{StartingPosition, StreamClient};
use crate::types::{Checkpoint, CloseReason, Ownership};
use parking_lot::Mutex;
use pump::PartitionPump;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle state of an [`EventProcessor`]. The processor is single-use:
/// `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

struct PumpHandle {
    cancel: CancellationToken,
    close_reason: Arc<Mutex<CloseReason>>,
    handle: JoinHandle<()>,
}

/// Coordinates cooperative consumption of a partitioned event stream.
///
/// Each instance generates a unique owner id at construction. Instances
/// sharing one checkpoint store and consumer group converge over multiple
/// balancing rounds to a disjoint, balanced partition assignment.
///
/// Data-plane failures are observed only through [`EventHandler`]
/// callbacks; nothing is fatal to the processor except an explicit
/// [`stop`](Self::stop).
pub struct EventProcessor {
    config: ProcessorConfig,
    owner_id: String,
    store: Arc<dyn CheckpointStore>,
    client: Arc<dyn StreamClient>,
    handler: Arc<dyn EventHandler>,
    state: Mutex<ProcessorState>,
    shutdown: CancellationToken,
    /// Single writer: the balancing loop. `stop()` only signals.
    pumps: Mutex<HashMap<String, PumpHandle>>,
    /// Pumps cancelled mid-flight, kept so shutdown can await them.
    draining: Mutex<Vec<JoinHandle<()>>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    stopped_tx: watch::Sender<bool>,
}

impl EventProcessor {
    /// Create a processor. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: ProcessorConfig,
        client: Arc<dyn StreamClient>,
        store: Arc<dyn CheckpointStore>,
        handler: Arc<dyn EventHandler>,
    ) -> Arc<Self> {
        let (stopped_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            owner_id: Uuid::new_v4().to_string(),
            store,
            client,
            handler,
            state: Mutex::new(ProcessorState::NotStarted),
            shutdown: CancellationToken::new(),
            pumps: Mutex::new(HashMap::new()),
            draining: Mutex::new(Vec::new()),
            loop_handle: Mutex::new(None),
            stopped_tx,
        })
    }

    /// This instance's generated owner id.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessorState {
        *self.state.lock()
    }

    /// Partitions with a currently running pump.
    pub fn owned_partitions(&self) -> Vec<String> {
        self.pumps
            .lock()
            .iter()
            .filter(|(_, pump)| !pump.handle.is_finished())
            .map(|(partition_id, _)| partition_id.clone())
            .collect()
    }

    /// Validate configuration and launch the balancing loop.
    ///
    /// Fails only on invalid configuration or when called more than once;
    /// data-plane failures are reported through the handler.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.config.validate()?;

        let mut state = self.state.lock();
        if *state != ProcessorState::NotStarted {
            return Err(Error::Config(format!(
                "processor already started (state: {:?})",
                *state
            )));
        }

        let manager = OwnershipManager::new(
            self.store.clone(),
            self.client.clone(),
            &self.config,
            self.owner_id.clone(),
        );
        let processor = Arc::clone(self);
        let handle = tokio::spawn(processor.run_balancing_loop(manager));
        *self.loop_handle.lock() = Some(handle);
        *state = ProcessorState::Running;

        info!(
            owner_id = %self.owner_id,
            consumer_group = %self.config.consumer_group,
            eventhub = %self.config.eventhub_name,
            strategy = ?self.config.strategy,
            "Event processor started"
        );
        Ok(())
    }

    /// Stop the processor and wait for every pump to fully close.
    ///
    /// Idempotent and safe to call from any task; never raises for
    /// data-plane errors. Still-held ownership records are explicitly
    /// released so surviving instances can claim them without waiting out
    /// the lease.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                ProcessorState::NotStarted => {
                    *state = ProcessorState::Stopped;
                    let _ = self.stopped_tx.send(true);
                    return;
                }
                ProcessorState::Running => *state = ProcessorState::Stopping,
                ProcessorState::Stopping | ProcessorState::Stopped => {}
            }
        }

        self.shutdown.cancel();

        let handle = self.loop_handle.lock().take();
        match handle {
            Some(handle) => {
                if let Err(join_error) = handle.await {
                    error!(error = %join_error, "Balancing loop terminated abnormally");
                }
                *self.state.lock() = ProcessorState::Stopped;
                let _ = self.stopped_tx.send(true);
                info!(owner_id = %self.owner_id, "Event processor stopped");
            }
            None => {
                // Another caller is draining; wait for it to finish.
                let mut stopped = self.stopped_tx.subscribe();
                while !*stopped.borrow_and_update() {
                    if stopped.changed().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn run_balancing_loop(self: Arc<Self>, mut manager: OwnershipManager) {
        let mut ticker = tokio::time::interval(self.config.load_balancing_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match manager.claim_ownership().await {
                        Ok(claimed) => self.reconcile(claimed).await,
                        Err(claim_error) => {
                            // Global to this round; balancing resumes next
                            // round with previously-owned pumps untouched.
                            warn!(
                                owner_id = %self.owner_id,
                                error = %claim_error,
                                "Balancing round failed"
                            );
                            self.handler.on_error(None, &claim_error).await;
                        }
                    }
                }
            }
        }

        self.drain(&manager).await;
    }

    /// Reconcile this round's claim set against running pumps.
    async fn reconcile(self: &Arc<Self>, claimed: Vec<Ownership>) {
        let claimed_ids: HashSet<&str> = claimed
            .iter()
            .map(|ownership| ownership.partition_id.as_str())
            .collect();

        let mut new_partitions = Vec::new();
        {
            let mut pumps = self.pumps.lock();

            // Reap pumps that closed on their own (local failures). Their
            // partitions are still claimed, so they restart below.
            pumps.retain(|_, pump| !pump.handle.is_finished());

            let lost: Vec<String> = pumps
                .keys()
                .filter(|partition_id| !claimed_ids.contains(partition_id.as_str()))
                .cloned()
                .collect();
            for partition_id in lost {
                if let Some(pump) = pumps.remove(&partition_id) {
                    *pump.close_reason.lock() = CloseReason::OwnershipLost;
                    pump.cancel.cancel();
                    self.draining.lock().push(pump.handle);
                    info!(partition_id = %partition_id, "Partition reassigned, stopping pump");
                }
            }

            for ownership in claimed {
                if !pumps.contains_key(&ownership.partition_id) {
                    new_partitions.push(ownership);
                }
            }
        }

        self.draining.lock().retain(|handle| !handle.is_finished());

        if new_partitions.is_empty() {
            return;
        }

        let mut checkpoints: HashMap<String, Checkpoint> = match self
            .store
            .list_checkpoints(
                &self.config.fully_qualified_namespace,
                &self.config.eventhub_name,
                &self.config.consumer_group,
            )
            .await
        {
            Ok(list) => list
                .into_iter()
                .map(|checkpoint| (checkpoint.partition_id.clone(), checkpoint))
                .collect(),
            Err(list_error) => {
                warn!(
                    error = %list_error,
                    "Failed to list checkpoints, deferring new pumps to next round"
                );
                self.handler.on_error(None, &list_error).await;
                return;
            }
        };

        for ownership in new_partitions {
            let checkpoint = checkpoints.remove(&ownership.partition_id);
            self.spawn_pump(ownership, checkpoint);
        }
    }

    fn spawn_pump(self: &Arc<Self>, ownership: Ownership, checkpoint: Option<Checkpoint>) {
        let starting_position = match checkpoint {
            Some(checkpoint) => {
                debug!(
                    partition_id = %ownership.partition_id,
                    offset = %checkpoint.offset,
                    "Resuming from checkpoint"
                );
                StartingPosition::Offset(checkpoint.offset)
            }
            None => self.config.default_starting_position.clone(),
        };

        let context = Arc::new(PartitionContext::new(
            self.config.fully_qualified_namespace.clone(),
            self.config.eventhub_name.clone(),
            self.config.consumer_group.clone(),
            ownership.partition_id.clone(),
            self.owner_id.clone(),
            self.store.clone(),
        ));

        let cancel = self.shutdown.child_token();
        let close_reason = Arc::new(Mutex::new(CloseReason::Shutdown));
        let pump = PartitionPump {
            client: self.client.clone(),
            handler: self.handler.clone(),
            context,
            starting_position,
            max_batch_size: self.config.max_batch_size,
            max_wait_time: self.config.max_wait_time,
            track_last_enqueued: self.config.track_last_enqueued_event_properties,
            cancel: cancel.clone(),
            close_reason: close_reason.clone(),
        };

        info!(
            partition_id = %ownership.partition_id,
            owner_id = %self.owner_id,
            "Starting partition pump"
        );
        let handle = tokio::spawn(pump.run());
        self.pumps.lock().insert(
            ownership.partition_id,
            PumpHandle {
                cancel,
                close_reason,
                handle,
            },
        );
    }

    /// Wait for every pump to close, then release held ownership records.
    async fn drain(&self, manager: &OwnershipManager) {
        let pumps: Vec<(String, PumpHandle)> = self.pumps.lock().drain().collect();
        for (_, pump) in &pumps {
            pump.cancel.cancel();
        }

        let mut owned = Vec::with_capacity(pumps.len());
        for (partition_id, pump) in pumps {
            if let Err(join_error) = pump.handle.await {
                // A panicking handler is logged and swallowed; it never
                // reaches the caller of stop().
                error!(
                    partition_id = %partition_id,
                    error = %join_error,
                    "Partition pump terminated abnormally"
                );
            }
            owned.push(partition_id);
        }

        let draining = std::mem::take(&mut *self.draining.lock());
        for handle in draining {
            if let Err(join_error) = handle.await {
                error!(error = %join_error, "Partition pump terminated abnormally");
            }
        }

        for partition_id in owned {
            if let Err(release_error) = manager.release_ownership(&partition_id).await {
                warn!(
                    partition_id = %partition_id,
                    error = %release_error,
                    "Failed to release ownership during shutdown"
                );
            }
        }
    }
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("owner_id", &self.owner_id)
            .field("state", &self.state())
            .field("consumer_group", &self.config.consumer_group)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCheckpointStore;
    use crate::stream::SimulatedStream;
    use crate::testing::{wait_until, wait_until_async, CollectingHandler};
    use std::time::Duration;

    fn fast_config() -> ProcessorConfig {
        ProcessorConfig::new("ns", "hub")
            .with_load_balancing_interval(Duration::from_millis(50))
            .with_ownership_timeout(Duration::from_secs(30))
            .with_max_wait_time(Duration::from_millis(50))
    }

    fn fixture(
        partitions: usize,
    ) -> (
        Arc<SimulatedStream>,
        Arc<InMemoryCheckpointStore>,
        Arc<CollectingHandler>,
        Arc<EventProcessor>,
    ) {
        let stream = Arc::new(SimulatedStream::new(partitions));
        let store = Arc::new(InMemoryCheckpointStore::new());
        let handler = Arc::new(CollectingHandler::new());
        let processor = EventProcessor::new(
            fast_config(),
            stream.clone(),
            store.clone(),
            handler.clone(),
        );
        (stream, store, handler, processor)
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let stream = Arc::new(SimulatedStream::new(1));
        let store = Arc::new(InMemoryCheckpointStore::new());
        let handler = Arc::new(CollectingHandler::new());
        let processor = EventProcessor::new(
            ProcessorConfig::default(),
            stream,
            store,
            handler,
        );

        assert!(matches!(processor.start(), Err(Error::Config(_))));
        assert_eq!(processor.state(), ProcessorState::NotStarted);
    }

    #[tokio::test]
    async fn test_start_twice_errors() {
        let (_, _, _, processor) = fixture(1);
        processor.start().unwrap();
        assert!(matches!(processor.start(), Err(Error::Config(_))));
        processor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let (_, _, _, processor) = fixture(1);
        processor.stop().await;
        assert_eq!(processor.state(), ProcessorState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (_, _, _, processor) = fixture(1);
        processor.start().unwrap();
        processor.stop().await;
        processor.stop().await;
        assert_eq!(processor.state(), ProcessorState::Stopped);
    }

    #[tokio::test]
    async fn test_processes_events_and_checkpoints() {
        let (stream, store, handler, processor) = fixture(2);
        processor.start().unwrap();

        assert!(
            wait_until(
                || processor.owned_partitions().len() == 2,
                Duration::from_secs(5)
            )
            .await
        );

        stream.push("0", "alpha");
        stream.push("1", "beta");

        assert!(
            wait_until(|| handler.event_count() == 2, Duration::from_secs(5)).await
        );

        // The collecting handler checkpoints every event it sees.
        assert!(
            wait_until_async(
                || {
                    let store = store.clone();
                    async move {
                        store
                            .list_checkpoints("ns", "hub", "$default")
                            .await
                            .map(|list| list.len() == 2)
                            .unwrap_or(false)
                    }
                },
                Duration::from_secs(5)
            )
            .await
        );

        processor.stop().await;

        let closes = handler.closes();
        assert_eq!(closes.len(), 2);
        assert!(closes
            .iter()
            .all(|(_, reason)| *reason == CloseReason::Shutdown));
    }

    #[tokio::test]
    async fn test_stop_releases_ownership() {
        let (_, store, _, processor) = fixture(2);
        processor.start().unwrap();
        assert!(
            wait_until(
                || processor.owned_partitions().len() == 2,
                Duration::from_secs(5)
            )
            .await
        );

        processor.stop().await;

        let records = store.list_ownership("ns", "hub", "$default").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.owner_id.is_empty()));
    }
}
