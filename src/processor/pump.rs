//! The per-partition consumer task.

use crate::error::Error;
use crate::processor::{EventHandler, PartitionContext};
use crate::stream::{PartitionConsumer, StartingPosition, StreamClient};
use crate::types::CloseReason;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One supervised receive loop for one owned partition.
///
/// The pump runs until cancelled or until a local failure; either way it
/// reports through the handler's callbacks and releases its consumer. A
/// failing pump never takes the processor down with it.
pub(crate) struct PartitionPump {
    pub client: Arc<dyn StreamClient>,
    pub handler: Arc<dyn EventHandler>,
    pub context: Arc<PartitionContext>,
    pub starting_position: StartingPosition,
    pub max_batch_size: usize,
    pub max_wait_time: Duration,
    pub track_last_enqueued: bool,
    pub cancel: CancellationToken,
    /// Written by whoever cancels the pump, read once on the way out.
    /// Defaults to `Shutdown`; the balancing loop flips it to
    /// `OwnershipLost` before cancelling a reassigned partition.
    pub close_reason: Arc<Mutex<CloseReason>>,
}

impl PartitionPump {
    pub(crate) async fn run(self) {
        let partition_id = self.context.partition_id().to_string();
        debug!(
            partition_id = %partition_id,
            owner_id = %self.context.owner_id(),
            "Partition pump starting"
        );

        if let Err(err) = self.handler.on_partition_initialize(&self.context).await {
            let error = Error::handler(err);
            let reason = Self::user_error_reason(&error);
            self.handler.on_error(Some(&self.context), &error).await;
            self.finish(None, reason).await;
            return;
        }

        let mut consumer = match self
            .client
            .create_consumer(
                self.context.consumer_group(),
                &partition_id,
                self.starting_position.clone(),
            )
            .await
        {
            Ok(consumer) => consumer,
            Err(error) => {
                self.handler.on_error(Some(&self.context), &error).await;
                self.finish(None, CloseReason::EventhubException).await;
                return;
            }
        };

        let reason = loop {
            select! {
                _ = self.cancel.cancelled() => {
                    break *self.close_reason.lock();
                }
                received = consumer.receive(self.max_batch_size, self.max_wait_time) => {
                    match received {
                        Ok(events) => {
                            if self.track_last_enqueued {
                                if let Some(props) = consumer.last_enqueued_event_properties() {
                                    self.context.set_last_enqueued(props);
                                }
                            }
                            if let Err(err) = self.handler.on_events(&self.context, &events).await {
                                let error = Error::handler(err);
                                let reason = Self::user_error_reason(&error);
                                self.handler.on_error(Some(&self.context), &error).await;
                                break reason;
                            }
                        }
                        Err(error) => {
                            self.handler.on_error(Some(&self.context), &error).await;
                            break CloseReason::EventhubException;
                        }
                    }
                }
            }
        };

        self.finish(Some(consumer), reason).await;
    }

    fn user_error_reason(error: &Error) -> CloseReason {
        if error.is_ownership_lost() {
            CloseReason::OwnershipLost
        } else {
            CloseReason::ProcessEventsError
        }
    }

    /// Close the pump: user close callback first, then the transport handle
    /// is always released.
    async fn finish(&self, consumer: Option<Box<dyn PartitionConsumer>>, reason: CloseReason) {
        self.handler.on_partition_close(&self.context, reason).await;

        if let Some(mut consumer) = consumer {
            if let Err(error) = consumer.close().await {
                warn!(
                    partition_id = %self.context.partition_id(),
                    error = %error,
                    "Failed to close partition consumer"
                );
            }
        }

        info!(
            partition_id = %self.context.partition_id(),
            reason = ?reason,
            "Partition pump closed"
        );
    }
}
