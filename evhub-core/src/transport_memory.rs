//! In-memory [`Transport`] for tests: a fixed partition id set, each
//! partition an append-only log a test can push events onto directly.
//!
//! Unlike a real broker this never grows or shrinks its partition set —
//! spec.md's Non-goals exclude automatic resharding, so the reference
//! transport doesn't need to model it either.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Operation, Result};
use crate::event::{Event, EventBatch, EventPosition, PartitionId};
use crate::transport::{Consumer, ConsumerOptions, Transport};

struct PartitionLog {
    events: Vec<Event>,
    notify: Notify,
}

impl Default for PartitionLog {
    fn default() -> Self {
        Self { events: Vec::new(), notify: Notify::new() }
    }
}

/// In-memory reference implementation of [`Transport`].
pub struct InMemoryTransport {
    partitions: HashMap<PartitionId, Arc<RwLock<PartitionLog>>>,
}

impl InMemoryTransport {
    /// Create a transport with a fixed set of empty partitions.
    #[must_use]
    pub fn new(partition_ids: impl IntoIterator<Item = PartitionId>) -> Self {
        let partitions = partition_ids
            .into_iter()
            .map(|id| (id, Arc::new(RwLock::new(PartitionLog::default()))))
            .collect();
        Self { partitions }
    }

    /// Append an event to a partition's log, as a test producer would.
    /// Sequence number and offset are assigned sequentially.
    ///
    /// # Panics
    ///
    /// Panics if `partition` isn't one of the ids this transport was
    /// constructed with — a test bug, not a runtime condition.
    pub async fn publish(&self, partition: &PartitionId, mut event: Event) {
        let log = self.partitions.get(partition).expect("unknown partition in test transport");
        let mut log = log.write().await;
        let sequence_number = log.events.len() as i64;
        event.sequence_number = sequence_number;
        event.offset = sequence_number;
        log.events.push(event);
        log.notify.notify_waiters();
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn get_partition_ids(&self) -> Result<Vec<PartitionId>> {
        Ok(self.partitions.keys().cloned().collect())
    }

    async fn open_consumer(
        &self,
        _group: &str,
        partition: &PartitionId,
        position: EventPosition,
        _options: ConsumerOptions,
    ) -> Result<Box<dyn Consumer>> {
        let log = self
            .partitions
            .get(partition)
            .ok_or_else(|| {
                Error::permanent(Operation::ReadEvents, format!("unknown partition {partition}"))
            })?
            .clone();

        let start_sequence = {
            let log = log.read().await;
            match position {
                EventPosition::Earliest => 0,
                EventPosition::Latest => log.events.len() as i64,
                EventPosition::FromOffset(offset) => offset,
                EventPosition::FromSequence { sequence, inclusive } => {
                    if inclusive { sequence } else { sequence + 1 }
                }
                EventPosition::FromEnqueuedTime(cutoff) => log
                    .events
                    .iter()
                    .find(|e| e.enqueued_time >= cutoff)
                    .map_or(log.events.len() as i64, |e| e.sequence_number),
            }
        };

        Ok(Box::new(InMemoryConsumer { log, next_sequence: start_sequence }))
    }
}

struct InMemoryConsumer {
    log: Arc<RwLock<PartitionLog>>,
    next_sequence: i64,
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    async fn read_events(
        &mut self,
        max_batch: usize,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<EventBatch> {
        let start = self.next_sequence as usize;

        // Fast path: events already available.
        {
            let log = self.log.read().await;
            if start < log.events.len() {
                let end = std::cmp::min(start + max_batch, log.events.len());
                let batch: Vec<Event> = log.events[start..end].to_vec();
                self.next_sequence = end as i64;
                return Ok(EventBatch::new(batch));
            }
        }

        // Nothing yet: wait for a publish, a timeout, or cancellation —
        // whichever comes first. Timeout and cancellation both resolve to
        // an empty batch, never an error (spec.md §4.2).
        let notified = self.log.read().await.notify.notified();
        tokio::select! {
            () = notified => {}
            () = tokio::time::sleep(max_wait) => {}
            () = cancel.cancelled() => {}
        }

        let log = self.log.read().await;
        if start >= log.events.len() {
            return Ok(EventBatch::empty());
        }
        let end = std::cmp::min(start + max_batch, log.events.len());
        let batch: Vec<Event> = log.events[start..end].to_vec();
        self.next_sequence = end as i64;
        Ok(EventBatch::new(batch))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
