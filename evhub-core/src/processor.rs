//! The external façade: owns the load-balancer loop, registers user
//! callbacks, and exposes `start`/`stop` (spec.md §4.5).

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::balancer::LoadBalancer;
use crate::config::ProcessorConfig;
use crate::error::{Error, Operation, Result};
use crate::event::{Event, EventPosition};
use crate::ownership::OwnerId;
use crate::pump::{BoxFuture, CheckpointHandle, CloseReason, Handlers, PartitionContext};
use crate::store::CheckpointStore;
use crate::transport::Transport;

type OnEventFn =
    dyn Fn(PartitionContext, Event, CheckpointHandle) -> BoxFuture<'static, Result<()>> + Send + Sync;
type OnErrorFn =
    dyn Fn(Option<PartitionContext>, Operation, Error) -> BoxFuture<'static, ()> + Send + Sync;
type OnInitFn =
    dyn Fn(PartitionContext, EventPosition) -> BoxFuture<'static, EventPosition> + Send + Sync;
type OnClosingFn = dyn Fn(PartitionContext, CloseReason) -> BoxFuture<'static, ()> + Send + Sync;

#[derive(Default)]
struct HandlerSet {
    on_event: Option<Arc<OnEventFn>>,
    on_error: Option<Arc<OnErrorFn>>,
    on_partition_initializing: Option<Arc<OnInitFn>>,
    on_partition_closing: Option<Arc<OnClosingFn>>,
}

enum RunState {
    Idle,
    Running { cancel: CancellationToken, join: JoinHandle<()> },
}

/// The processor instance: one per live consumer-group participant.
pub struct Processor {
    namespace: String,
    hub: String,
    group: String,
    config: ProcessorConfig,
    store: Arc<dyn CheckpointStore>,
    transport: Arc<dyn Transport>,
    handlers: StdMutex<HandlerSet>,
    state: AsyncMutex<RunState>,
    running: AtomicBool,
}

impl Processor {
    /// Construct a processor. Fails with `Error::Configuration` if
    /// `config` doesn't satisfy `ownership_expiration >= 2 *
    /// load_balance_update`.
    pub fn new(
        namespace: impl Into<String>,
        hub: impl Into<String>,
        group: impl Into<String>,
        config: ProcessorConfig,
        store: Arc<dyn CheckpointStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            namespace: namespace.into(),
            hub: hub.into(),
            group: group.into(),
            config,
            store,
            transport,
            handlers: StdMutex::new(HandlerSet::default()),
            state: AsyncMutex::new(RunState::Idle),
            running: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn hub(&self) -> &str {
        &self.hub
    }

    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.group
    }

    #[must_use]
    pub fn identifier(&self) -> &OwnerId {
        &self.config.identifier
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn ensure_idle_for_registration(&self) -> Result<()> {
        if self.is_running() {
            return Err(Error::Configuration(
                "cannot register a handler while the processor is running".into(),
            ));
        }
        Ok(())
    }

    /// Register the mandatory per-event handler. Fails if the processor is
    /// running, or if `on_event` is already registered.
    pub fn on_event<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(PartitionContext, Event, CheckpointHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.ensure_idle_for_registration()?;
        let mut handlers = self.handlers.lock().expect("handlers mutex poisoned");
        if handlers.on_event.is_some() {
            return Err(Error::Configuration("on_event handler already registered".into()));
        }
        handlers.on_event =
            Some(Arc::new(move |ctx, event, checkpoint| Box::pin(handler(ctx, event, checkpoint))));
        Ok(())
    }

    /// Register the mandatory error handler. Invoked fire-and-forget;
    /// exceptions from the handler itself are the caller's problem to
    /// avoid, not caught by the core.
    pub fn on_error<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(Option<PartitionContext>, Operation, Error) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensure_idle_for_registration()?;
        let mut handlers = self.handlers.lock().expect("handlers mutex poisoned");
        if handlers.on_error.is_some() {
            return Err(Error::Configuration("on_error handler already registered".into()));
        }
        handlers.on_error = Some(Arc::new(move |ctx, op, err| Box::pin(handler(ctx, op, err))));
        Ok(())
    }

    /// Register the optional partition-initializing handler.
    pub fn on_partition_initializing<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(PartitionContext, EventPosition) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EventPosition> + Send + 'static,
    {
        self.ensure_idle_for_registration()?;
        let mut handlers = self.handlers.lock().expect("handlers mutex poisoned");
        if handlers.on_partition_initializing.is_some() {
            return Err(Error::Configuration(
                "on_partition_initializing handler already registered".into(),
            ));
        }
        handlers.on_partition_initializing =
            Some(Arc::new(move |ctx, default_position| Box::pin(handler(ctx, default_position))));
        Ok(())
    }

    /// Register the optional partition-closing handler.
    pub fn on_partition_closing<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(PartitionContext, CloseReason) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensure_idle_for_registration()?;
        let mut handlers = self.handlers.lock().expect("handlers mutex poisoned");
        if handlers.on_partition_closing.is_some() {
            return Err(Error::Configuration("on_partition_closing handler already registered".into()));
        }
        handlers.on_partition_closing = Some(Arc::new(move |ctx, reason| Box::pin(handler(ctx, reason))));
        Ok(())
    }

    /// Clear every registered handler, allowing re-registration. Only
    /// valid while idle.
    pub fn clear_handlers(&self) -> Result<()> {
        self.ensure_idle_for_registration()?;
        *self.handlers.lock().expect("handlers mutex poisoned") = HandlerSet::default();
        Ok(())
    }

    /// Start the load-balancer loop. No-op if already running. Fails with
    /// `Error::Configuration` if `on_event` or `on_error` isn't registered.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(&*state, RunState::Running { .. }) {
            return Ok(());
        }

        let handlers = {
            let guard = self.handlers.lock().expect("handlers mutex poisoned");
            let on_event = guard
                .on_event
                .clone()
                .ok_or_else(|| Error::Configuration("on_event handler is required before start".into()))?;
            let on_error = guard
                .on_error
                .clone()
                .ok_or_else(|| Error::Configuration("on_error handler is required before start".into()))?;
            Handlers {
                on_event,
                on_error,
                on_partition_initializing: guard.on_partition_initializing.clone(),
                on_partition_closing: guard.on_partition_closing.clone(),
            }
        };

        let balancer = LoadBalancer::new(
            self.namespace.clone(),
            self.hub.clone(),
            self.group.clone(),
            self.config.clone(),
            self.store.clone(),
            self.transport.clone(),
            handlers,
        );

        let cancel = CancellationToken::new();
        let join = tokio::spawn(balancer.run(cancel.clone()));
        info!(namespace = %self.namespace, hub = %self.hub, group = %self.group, "processor started");
        self.running.store(true, Ordering::SeqCst);
        *state = RunState::Running { cancel, join };
        Ok(())
    }

    /// Stop the load-balancer loop and every active pump, then return to
    /// `Idle`. No-op if already idle.
    pub async fn stop(&self) -> Result<()> {
        self.stop_with_cancellation(CancellationToken::new()).await
    }

    /// Like [`Processor::stop`], but the caller may cancel the stop itself.
    /// If `stop_cancel` fires before the loop finishes tearing down, the
    /// processor remains `Running` (spec.md §5).
    pub async fn stop_with_cancellation(&self, stop_cancel: CancellationToken) -> Result<()> {
        let mut state = self.state.lock().await;
        let (cancel, mut join) = match std::mem::replace(&mut *state, RunState::Idle) {
            RunState::Idle => return Ok(()),
            RunState::Running { cancel, join } => (cancel, join),
        };
        cancel.cancel();

        tokio::select! {
            result = &mut join => {
                if let Err(err) = result {
                    warn!(error = %err, "load-balancer task panicked during stop");
                }
                self.running.store(false, Ordering::SeqCst);
                info!("processor stopped");
                Ok(())
            }
            () = stop_cancel.cancelled() => {
                warn!("stop cancelled mid-way; processor remains running");
                *state = RunState::Running { cancel, join };
                Ok(())
            }
        }
    }
}
