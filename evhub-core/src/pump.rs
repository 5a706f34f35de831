//! Per-partition pump: drives a [`PartitionReader`], invokes user
//! callbacks per event, and relays checkpoint requests to the store.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Operation, Result};
use crate::event::{Event, EventPosition, PartitionId};
use crate::ownership::Checkpoint as CheckpointRecord;
use crate::reader::PartitionReader;
use crate::store::CheckpointStore;
use crate::transport::{ConsumerOptions, Transport};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identifies the partition a callback invocation concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionContext {
    pub fully_qualified_namespace: String,
    pub event_hub_name: String,
    pub consumer_group: String,
    pub partition_id: PartitionId,
}

/// Why a pump stopped, passed to `on_partition_closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The processor is stopping entirely.
    Shutdown,
    /// The load-balancer loop reaped this partition; another instance (or
    /// no one, transiently) owns it now.
    OwnershipLost,
    /// The user's `on_event` handler returned an error.
    ProcessingError,
}

/// Passed to `on_event`; calling `commit` persists a checkpoint at the
/// event's offset/sequence number.
pub struct CheckpointHandle {
    context: PartitionContext,
    store: Arc<dyn CheckpointStore>,
    position: Option<(i64, i64)>,
}

impl CheckpointHandle {
    fn for_event(context: PartitionContext, store: Arc<dyn CheckpointStore>, event: &Event) -> Self {
        Self { context, store, position: Some((event.offset, event.sequence_number)) }
    }

    /// A handle with no backing position, as spec'd for an empty/synthetic
    /// event: `commit` fails with a logic error rather than silently doing
    /// nothing.
    #[cfg(test)]
    #[must_use]
    pub fn synthetic(context: PartitionContext, store: Arc<dyn CheckpointStore>) -> Self {
        Self { context, store, position: None }
    }

    /// Persist a checkpoint at the captured position.
    pub async fn commit(&self) -> Result<()> {
        let Some((offset, sequence_number)) = self.position else {
            return Err(Error::Logic(
                "cannot checkpoint an event with no offset/sequence number".into(),
            ));
        };
        self.store
            .update_checkpoint(CheckpointRecord {
                fully_qualified_namespace: self.context.fully_qualified_namespace.clone(),
                event_hub_name: self.context.event_hub_name.clone(),
                consumer_group: self.context.consumer_group.clone(),
                partition_id: self.context.partition_id.clone(),
                offset,
                sequence_number,
            })
            .await
    }
}

type OnEvent = dyn Fn(PartitionContext, Event, CheckpointHandle) -> BoxFuture<'static, Result<()>>
    + Send
    + Sync;
type OnError =
    dyn Fn(Option<PartitionContext>, Operation, Error) -> BoxFuture<'static, ()> + Send + Sync;
type OnPartitionInitializing =
    dyn Fn(PartitionContext, EventPosition) -> BoxFuture<'static, EventPosition> + Send + Sync;
type OnPartitionClosing =
    dyn Fn(PartitionContext, CloseReason) -> BoxFuture<'static, ()> + Send + Sync;

/// The processor's registered callback set. `on_event` and `on_error` are
/// mandatory before a processor can start; the rest are optional.
#[derive(Clone)]
pub struct Handlers {
    pub(crate) on_event: Arc<OnEvent>,
    pub(crate) on_error: Arc<OnError>,
    pub(crate) on_partition_initializing: Option<Arc<OnPartitionInitializing>>,
    pub(crate) on_partition_closing: Option<Arc<OnPartitionClosing>>,
}

impl Handlers {
    async fn initial_position(&self, context: &PartitionContext) -> EventPosition {
        let default = EventPosition::DEFAULT;
        match &self.on_partition_initializing {
            Some(handler) => handler(context.clone(), default).await,
            None => default,
        }
    }

    async fn notify_closing(&self, context: &PartitionContext, reason: CloseReason) {
        if let Some(handler) = &self.on_partition_closing {
            handler(context.clone(), reason).await;
        }
    }

    /// Fire-and-forget notification to `on_error`. Used by both the pump
    /// (per-partition failures) and the load-balancer loop (store/transport
    /// failures not attributable to any one partition).
    pub(crate) async fn notify_error(
        &self,
        context: Option<&PartitionContext>,
        operation: Operation,
        error: Error,
    ) {
        (self.on_error)(context.cloned(), operation, error).await;
    }
}

/// Drives one partition: owns a [`PartitionReader`] and invokes `Handlers`
/// per event until cancelled or the handler errors.
pub struct PartitionPump {
    context: PartitionContext,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CheckpointStore>,
    handlers: Handlers,
    /// Starting position from the most recent checkpoint, if any. Wins
    /// over whatever `on_partition_initializing` returns.
    existing_checkpoint: Option<EventPosition>,
    consumer_options: ConsumerOptions,
    retry: crate::retry::RetryPolicy,
    max_batch: usize,
    max_wait: Duration,
    /// What to report to `on_partition_closing` when `cancel` fires.
    /// Whoever stops the pump sets this before cancelling.
    close_reason: Arc<Mutex<CloseReason>>,
}

impl PartitionPump {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: PartitionContext,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CheckpointStore>,
        handlers: Handlers,
        existing_checkpoint: Option<EventPosition>,
        consumer_options: ConsumerOptions,
        retry: crate::retry::RetryPolicy,
        max_batch: usize,
        max_wait: Duration,
    ) -> Self {
        Self {
            context,
            transport,
            store,
            handlers,
            existing_checkpoint,
            consumer_options,
            retry,
            max_batch,
            max_wait,
            close_reason: Arc::new(Mutex::new(CloseReason::Shutdown)),
        }
    }

    /// Shared handle a caller uses to request a specific close reason
    /// before cancelling this pump's token.
    #[must_use]
    pub fn close_reason_handle(&self) -> Arc<Mutex<CloseReason>> {
        self.close_reason.clone()
    }

    /// Run until `cancel` fires or the user's `on_event` handler errors.
    /// Returns `Ok(())` on a clean stop, `Err` if the handler errored (the
    /// caller — the load-balancer loop — treats this pump as crashed and
    /// restarts it next cycle).
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let default_position = self.handlers.initial_position(&self.context).await;
        let starting_position = self.existing_checkpoint.unwrap_or(default_position);

        let mut reader = PartitionReader::new(
            self.transport.clone(),
            self.context.consumer_group.clone(),
            self.context.partition_id.clone(),
            starting_position,
            self.consumer_options.clone(),
            self.retry.clone(),
        );

        let result = self.pump_loop(&mut reader, &cancel).await;
        let _ = reader.close().await;

        let reason = if result.is_err() {
            CloseReason::ProcessingError
        } else {
            *self.close_reason.lock().expect("close_reason mutex poisoned")
        };
        self.handlers.notify_closing(&self.context, reason).await;

        result
    }

    async fn pump_loop(&self, reader: &mut PartitionReader, cancel: &CancellationToken) -> Result<()> {
        while !cancel.is_cancelled() {
            let batch = match reader.read(self.max_batch, self.max_wait, cancel).await {
                Ok(batch) => batch,
                Err(err) => {
                    self.handlers.notify_error(Some(&self.context), Operation::ReadEvents, err.clone()).await;
                    return Err(err);
                }
            };

            for event in batch {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                let handle = CheckpointHandle::for_event(self.context.clone(), self.store.clone(), &event);
                let sequence_number = event.sequence_number;
                if let Err(err) = (self.handlers.on_event)(self.context.clone(), event, handle).await {
                    warn!(partition = %self.context.partition_id, sequence_number, error = %err, "on_event handler failed, terminating pump");
                    self.handlers
                        .notify_error(Some(&self.context), Operation::ReadEvents, err.clone())
                        .await;
                    return Err(err);
                }
            }
        }
        debug!(partition = %self.context.partition_id, "pump cancelled");
        Ok(())
    }
}
