//! The broker/transport interface consumed by [`crate::reader::PartitionReader`].
//!
//! This is explicitly out of scope to implement for real (spec.md §1): no
//! AMQP/Event-Hubs client lives in this crate. Only the trait and an
//! in-memory reference implementation ([`crate::transport_memory`]) ship,
//! so the reader/pump/load-balancer can be exercised end-to-end in tests.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::event::{EventBatch, EventPosition, PartitionId};

/// Per-consumer options passed to `open_consumer`.
#[derive(Debug, Clone, Default)]
pub struct ConsumerOptions {
    pub prefetch: Option<u32>,
    pub track_last_enqueued_event_properties: bool,
}

/// The broker client surface the core depends on but does not implement.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The current partition id set of the event hub. The core observes
    /// this each load-balancer cycle; it does not react to the set growing
    /// (no automatic resharding — spec.md §1 Non-goals).
    async fn get_partition_ids(&self) -> Result<Vec<PartitionId>>;

    /// Open a consumer for one partition at a starting position.
    async fn open_consumer(
        &self,
        group: &str,
        partition: &PartitionId,
        position: EventPosition,
        options: ConsumerOptions,
    ) -> Result<Box<dyn Consumer>>;
}

/// A single partition's read link, opened at some position.
#[async_trait]
pub trait Consumer: Send {
    /// Read up to `max_batch` events, waiting at most `max_wait` for the
    /// first one. An empty batch after `max_wait` elapses is "no events
    /// yet", not an error. Cancellation stops the wait early and also
    /// returns an empty batch (not an error).
    async fn read_events(
        &mut self,
        max_batch: usize,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<EventBatch>;

    /// Release the underlying link.
    async fn close(&mut self) -> Result<()>;
}
