//! Cooperative, durable event-stream processor core for a partitioned
//! pub/sub log (an "event hub").
//!
//! Multiple processor instances sharing a consumer group cooperate
//! through a shared durable [`store::CheckpointStore`] to balance
//! partition ownership, read each owned partition from a resumable
//! position via a [`transport::Transport`], and persist progress as
//! [`ownership::Checkpoint`]s.
//!
//! # Key types
//!
//! - [`processor::Processor`] — the façade: register callbacks, start/stop.
//! - [`balancer::LoadBalancer`] — the ownership renew/reap/heal/claim loop.
//! - [`pump::PartitionPump`] — per-partition event delivery.
//! - [`reader::PartitionReader`] — per-partition read link with reopen-on-retry.
//! - [`store::CheckpointStore`] / [`transport::Transport`] — external interfaces.

pub mod balancer;
pub mod config;
pub mod error;
pub mod event;
pub mod ownership;
pub mod processor;
pub mod pump;
pub mod reader;
pub mod retry;
pub mod store;
pub mod store_memory;
pub mod transport;
pub mod transport_memory;

pub use config::ProcessorConfig;
pub use error::{Error, Operation, Result};
pub use event::{Event, EventBatch, EventPosition, OffsetValue, PartitionId, SequenceNumber};
pub use ownership::{Checkpoint, OwnerId, PartitionOwnership, VersionToken};
pub use processor::Processor;
pub use pump::{CheckpointHandle, CloseReason, Handlers, PartitionContext, PartitionPump};
pub use reader::PartitionReader;
pub use retry::{RetryMode, RetryOptions, RetryPolicy};
pub use store::CheckpointStore;
pub use store_memory::InMemoryStore;
pub use transport::{Consumer, ConsumerOptions, Transport};
pub use transport_memory::InMemoryTransport;
