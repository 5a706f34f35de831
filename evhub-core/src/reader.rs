//! Per-partition read link: opens a [`Consumer`] lazily and reopens it at
//! the last-delivered position after a transient transport failure.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Operation, Result};
use crate::event::{EventBatch, EventPosition, PartitionId};
use crate::retry::RetryPolicy;
use crate::transport::{Consumer, ConsumerOptions, Transport};

/// Wraps a [`Transport`]'s per-partition consumer with the reopen-on-retry
/// behavior spec'd for the partition reader: a transient read failure
/// closes the link and opens a fresh one at the position just after the
/// last event this reader actually delivered, rather than propagating the
/// error up to the pump.
pub struct PartitionReader {
    transport: Arc<dyn Transport>,
    group: String,
    partition: PartitionId,
    position: EventPosition,
    options: ConsumerOptions,
    retry: RetryPolicy,
    consumer: Option<Box<dyn Consumer>>,
}

impl PartitionReader {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        group: impl Into<String>,
        partition: PartitionId,
        initial_position: EventPosition,
        options: ConsumerOptions,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            group: group.into(),
            partition,
            position: initial_position,
            options,
            retry,
            consumer: None,
        }
    }

    /// Read the next batch, opening a consumer on first use or after a
    /// prior transient failure closed one.
    pub async fn read(
        &mut self,
        max_batch: usize,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<EventBatch> {
        if self.consumer.is_none() {
            self.open().await?;
        }

        let attempt = {
            let consumer = self.consumer.as_mut().expect("opened above");
            consumer.read_events(max_batch, max_wait, cancel).await
        };

        match attempt {
            Ok(batch) => {
                if let Some(last) = batch.events.last() {
                    self.position =
                        EventPosition::FromSequence { sequence: last.sequence_number, inclusive: false };
                }
                Ok(batch)
            }
            Err(err) if err.is_retryable() => {
                warn!(partition = %self.partition, error = %err, "reopening consumer after transient read error");
                self.consumer = None;
                self.open().await?;
                let consumer = self.consumer.as_mut().expect("opened above");
                consumer.read_events(max_batch, max_wait, cancel).await
            }
            Err(err) => Err(err),
        }
    }

    async fn open(&mut self) -> Result<()> {
        let transport = self.transport.clone();
        let group = self.group.clone();
        let partition = self.partition.clone();
        let position = self.position;
        let options = self.options.clone();

        let consumer = self
            .retry
            .run(Operation::ReadEvents, || {
                let transport = transport.clone();
                let group = group.clone();
                let partition = partition.clone();
                let options = options.clone();
                async move { transport.open_consumer(&group, &partition, position, options).await }
            })
            .await?;

        self.consumer = Some(consumer);
        Ok(())
    }

    /// Release the underlying consumer, if one is open.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut consumer) = self.consumer.take() {
            consumer.close().await?;
        }
        Ok(())
    }

    #[must_use]
    pub fn position(&self) -> EventPosition {
        self.position
    }
}

impl Drop for PartitionReader {
    fn drop(&mut self) {
        if self.consumer.is_some() {
            debug!(partition = %self.partition, "partition reader dropped with an open consumer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::retry::RetryOptions;
    use crate::transport_memory::InMemoryTransport;

    fn reader(transport: Arc<InMemoryTransport>, partition: PartitionId) -> PartitionReader {
        PartitionReader::new(
            transport,
            "$Default",
            partition,
            EventPosition::Earliest,
            ConsumerOptions::default(),
            RetryPolicy::new(RetryOptions { max_retries: 1, ..RetryOptions::default() }),
        )
    }

    #[tokio::test]
    async fn reads_events_and_advances_position() {
        let transport = Arc::new(InMemoryTransport::new(["0".to_string()]));
        transport.publish(&"0".to_string(), Event::new(b"a".to_vec(), 0, 0)).await;

        let mut reader = reader(transport, "0".to_string());
        let cancel = CancellationToken::new();
        let batch = reader.read(10, Duration::from_millis(50), &cancel).await.unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(
            reader.position(),
            EventPosition::FromSequence { sequence: 0, inclusive: false }
        );
    }

    #[tokio::test]
    async fn reopening_unknown_partition_surfaces_permanent_error() {
        let transport = Arc::new(InMemoryTransport::new(["0".to_string()]));
        let mut reader = reader(transport, "missing".to_string());
        let cancel = CancellationToken::new();

        let err = reader.read(10, Duration::from_millis(10), &cancel).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
