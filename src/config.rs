//! Configuration for the event processor.

use crate::error::{Error, Result};
use crate::stream::StartingPosition;
use crate::types::LoadBalancingStrategy;
use std::time::Duration;

/// Main configuration for an [`EventProcessor`](crate::EventProcessor).
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Fully qualified namespace of the event stream service.
    pub fully_qualified_namespace: String,

    /// Name of the event hub (the partitioned stream) to read.
    pub eventhub_name: String,

    /// Consumer group scoping ownership and checkpoints.
    pub consumer_group: String,

    /// How often the balancing loop runs. Must be materially smaller than
    /// `ownership_timeout` so active leases are refreshed well before they
    /// expire.
    pub load_balancing_interval: Duration,

    /// How long an ownership record stays active after its last refresh.
    pub ownership_timeout: Duration,

    /// How aggressively this instance claims partitions.
    pub strategy: LoadBalancingStrategy,

    /// Where to start reading a partition that has no checkpoint yet.
    pub default_starting_position: StartingPosition,

    /// Maximum events handed to the event handler per invocation.
    pub max_batch_size: usize,

    /// Longest a receive waits before invoking the event handler with an
    /// empty batch.
    pub max_wait_time: Duration,

    /// Refresh [`LastEnqueuedEventProperties`](crate::LastEnqueuedEventProperties)
    /// on each receive.
    pub track_last_enqueued_event_properties: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            fully_qualified_namespace: String::new(),
            eventhub_name: String::new(),
            consumer_group: "$default".to_string(),
            load_balancing_interval: Duration::from_secs(10),
            ownership_timeout: Duration::from_secs(60),
            strategy: LoadBalancingStrategy::default(),
            default_starting_position: StartingPosition::Earliest,
            max_batch_size: 100,
            max_wait_time: Duration::from_secs(2),
            track_last_enqueued_event_properties: false,
        }
    }
}

impl ProcessorConfig {
    /// Create a configuration for the given namespace and event hub.
    pub fn new(
        fully_qualified_namespace: impl Into<String>,
        eventhub_name: impl Into<String>,
    ) -> Self {
        Self {
            fully_qualified_namespace: fully_qualified_namespace.into(),
            eventhub_name: eventhub_name.into(),
            ..Default::default()
        }
    }

    /// Set the consumer group.
    pub fn with_consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = consumer_group.into();
        self
    }

    /// Set the balancing loop interval.
    pub fn with_load_balancing_interval(mut self, interval: Duration) -> Self {
        self.load_balancing_interval = interval;
        self
    }

    /// Set the ownership lease timeout.
    pub fn with_ownership_timeout(mut self, timeout: Duration) -> Self {
        self.ownership_timeout = timeout;
        self
    }

    /// Set the load balancing strategy.
    pub fn with_strategy(mut self, strategy: LoadBalancingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the default starting position for partitions without a checkpoint.
    pub fn with_default_starting_position(mut self, position: StartingPosition) -> Self {
        self.default_starting_position = position;
        self
    }

    /// Set the maximum receive batch size.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Set the maximum receive wait time.
    pub fn with_max_wait_time(mut self, wait: Duration) -> Self {
        self.max_wait_time = wait;
        self
    }

    /// Enable last-enqueued event metadata tracking.
    pub fn with_last_enqueued_tracking(mut self, enabled: bool) -> Self {
        self.track_last_enqueued_event_properties = enabled;
        self
    }

    /// Validate the configuration. Called by `EventProcessor::start`.
    pub fn validate(&self) -> Result<()> {
        if self.fully_qualified_namespace.is_empty() {
            return Err(Error::Config(
                "fully_qualified_namespace must not be empty".into(),
            ));
        }
        if self.eventhub_name.is_empty() {
            return Err(Error::Config("eventhub_name must not be empty".into()));
        }
        if self.consumer_group.is_empty() {
            return Err(Error::Config("consumer_group must not be empty".into()));
        }
        if self.load_balancing_interval.is_zero() {
            return Err(Error::Config(
                "load_balancing_interval must be non-zero".into(),
            ));
        }
        if self.load_balancing_interval >= self.ownership_timeout {
            return Err(Error::Config(format!(
                "load_balancing_interval ({:?}) must be smaller than ownership_timeout ({:?})",
                self.load_balancing_interval, self.ownership_timeout
            )));
        }
        if self.max_batch_size == 0 {
            return Err(Error::Config("max_batch_size must be non-zero".into()));
        }
        Ok(())
    }
}
