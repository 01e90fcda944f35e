//! Cooperative consumer coordination for partitioned event streams.
//!
//! This crate lets a fleet of independent consumer instances share the
//! partitions of an event stream without talking to each other. Each
//! instance runs an [`EventProcessor`] that:
//! - **Balances load** by claiming short-lived partition ownerships in a
//!   shared [`CheckpointStore`], converging on an even split
//! - **Pumps events** from each owned partition through a user
//!   [`EventHandler`], one supervised task per partition
//! - **Checkpoints progress** so a restarted or replacement instance
//!   resumes where the previous owner left off
//!
//! Coordination is entirely client-side: the store arbitrates competing
//! claims with conditional writes, and stale owners are fenced by lease
//! expiry and checkpoint-time ownership checks.
//!
//! # Example
//!
//! ```rust,no_run
//! use streamshare::{
//!     EventHandler, EventProcessor, InMemoryCheckpointStore, PartitionContext,
//!     ProcessorConfig, ReceivedEvent, SimulatedStream,
//! };
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl EventHandler for Printer {
//!     async fn on_events(
//!         &self,
//!         context: &PartitionContext,
//!         events: &[ReceivedEvent],
//!     ) -> Result<(), streamshare::BoxError> {
//!         for event in events {
//!             println!("partition {}: {:?}", context.partition_id(), event.body);
//!         }
//!         if let Some(last) = events.last() {
//!             context.update_checkpoint_from_event(last).await?;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProcessorConfig::new("my-namespace", "my-hub");
//!     let stream = Arc::new(SimulatedStream::new(4));
//!     let store = Arc::new(InMemoryCheckpointStore::new());
//!
//!     let processor = EventProcessor::new(config, stream, store, Arc::new(Printer));
//!     processor.start()?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     processor.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               EventProcessor                 │
//! │   start / stop, balancing loop, pump set     │
//! └──────────────────────────────────────────────┘
//!          │                          │
//!          ▼                          ▼
//! ┌─────────────────┐     ┌──────────────────────┐
//! │OwnershipManager │     │  PartitionPump (xN)  │
//! │ claim / release │     │ receive → on_events  │
//! └─────────────────┘     └──────────────────────┘
//!          │                          │
//!          ▼                          ▼
//! ┌─────────────────┐     ┌──────────────────────┐
//! │ CheckpointStore │     │    StreamClient      │
//! └─────────────────┘     └──────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Single active owner** per partition, arbitrated by the store's
//!   conditional writes; a lost claim is an outcome, not an error
//! - **At-least-once** delivery: a crash between handling and
//!   checkpointing replays the gap on the next owner
//! - **Failure isolation**: a failing pump closes and reports through the
//!   handler callbacks without taking the processor down

pub mod balancer;
pub mod config;
pub mod error;
pub mod processor;
pub mod store;
pub mod stream;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use config::ProcessorConfig;
pub use error::{BoxError, Error, Result};
pub use processor::{EventHandler, EventProcessor, PartitionContext, ProcessorState};
pub use types::{
    Checkpoint, CloseReason, LastEnqueuedEventProperties, LoadBalancingStrategy, Ownership,
};

// Re-export balancing types
pub use balancer::OwnershipManager;

// Re-export store types
pub use store::{CheckpointStore, InMemoryCheckpointStore};

// Re-export stream types
pub use stream::{
    PartitionConsumer, ReceivedEvent, SimulatedStream, StartingPosition, StreamClient,
};
