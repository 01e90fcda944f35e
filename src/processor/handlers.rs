//! Application callback surface.

use crate::error::{BoxError, Error};
use crate::processor::PartitionContext;
use crate::stream::ReceivedEvent;
use crate::types::CloseReason;
use async_trait::async_trait;

/// Callbacks bound at processor construction.
///
/// Invocations for different partitions may overlap; within one partition,
/// receive, handle, and checkpoint are strictly sequential. Only
/// [`on_events`](Self::on_events) is required.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one received batch. The batch is empty when `max_wait_time`
    /// elapsed with nothing to read, so applications can observe liveness.
    ///
    /// Returning an error closes the partition task: with
    /// `CloseReason::OwnershipLost` when the error is an
    /// [`Error::OwnershipLost`](crate::Error::OwnershipLost) propagated
    /// from a checkpoint write, with `CloseReason::ProcessEventsError`
    /// otherwise.
    async fn on_events(
        &self,
        context: &PartitionContext,
        events: &[ReceivedEvent],
    ) -> std::result::Result<(), BoxError>;

    /// Observe a data-plane failure. `context` is `None` for failures
    /// global to one balancing round (a store listing error, say).
    async fn on_error(&self, _context: Option<&PartitionContext>, _error: &Error) {}

    /// Called once when a partition task starts, before the first receive.
    /// An error closes the task the same way an `on_events` error does.
    async fn on_partition_initialize(
        &self,
        _context: &PartitionContext,
    ) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Called once when a partition task closes, whatever the reason.
    async fn on_partition_close(&self, _context: &PartitionContext, _reason: CloseReason) {}
}
