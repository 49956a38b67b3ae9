//! The pipeline orchestrator.
//!
//! One pipeline is an ordered arrangement of stages around a mutable
//! context: input filters, exactly one binding, output filters, then a
//! best-effort fan-out to side channels. The orchestrator owns the
//! discipline between them; the stages themselves stay oblivious to each
//! other.
//!
//! Failure handling is deliberately asymmetric:
//! - a filter fault skips the rest of its stage group but the binding still
//!   runs and decides for itself (the REST binding skips fatal contexts)
//! - a binding fault is fatal for the execution
//! - a channel fault is logged, published and otherwise ignored
//!
//! A pipeline never fails its caller: `execute` always hands the context
//! back with a valid response status on it.

use std::sync::{Arc, Mutex};

use fhirgate_core::{ContextFault, RequestContext};
use http::StatusCode;
use tracing::{debug, instrument, warn};

use crate::binding::{Binding, CoupledBinding};
use crate::channel::{Channel, ChannelState, SendOptions};
use crate::error::ChannelError;
use crate::events::{PipelineEvent, PipelineEventBus};
use crate::filter::{Filter, FilterCollection};

/// Lifecycle of a pipeline as observed between executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Never executed.
    Idle,
    /// An execution is in flight.
    Running,
    /// The most recent execution finished without a fault.
    Completed,
    /// The most recent execution finished fatal.
    Faulted,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Faulted => "faulted",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ChannelRegistration {
    channel: Arc<dyn Channel>,
    /// Owned channels are closed by [`Pipeline::shutdown`].
    owned: bool,
}

/// Orchestrates filters, a binding and channels over one context at a time.
pub struct Pipeline {
    name: String,
    input_filters: FilterCollection,
    output_filters: FilterCollection,
    binding: Arc<dyn Binding>,
    channels: Vec<ChannelRegistration>,
    events: PipelineEventBus,
    state: Mutex<PipelineState>,
    execution_lock: tokio::sync::Mutex<()>,
}

impl Pipeline {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bus carrying this pipeline's lifecycle events.
    pub fn events(&self) -> &PipelineEventBus {
        &self.events
    }

    /// State of the most recent execution.
    pub fn state(&self) -> PipelineState {
        *self.lock_state()
    }

    pub fn input_filters(&self) -> &FilterCollection {
        &self.input_filters
    }

    pub fn output_filters(&self) -> &FilterCollection {
        &self.output_filters
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Run one context through every stage.
    ///
    /// Executions are serialized: a second caller waits until the first
    /// finishes. The returned context always carries a response status;
    /// fatal executions carry a 4xx/5xx one.
    #[instrument(skip(self, ctx), fields(pipeline = %self.name, request_id = %ctx.request_id()))]
    pub async fn execute(&self, mut ctx: RequestContext) -> RequestContext {
        let _running = self.execution_lock.lock().await;
        self.set_state(PipelineState::Running);

        // A context that arrives already fatal skips every stage.
        if ctx.is_fatal() {
            debug!("context arrived fatal, skipping all stages");
            return self.finish(ctx);
        }

        self.run_filters(&self.input_filters, &mut ctx, "input").await;
        self.run_binding(&mut ctx).await;
        self.run_filters(&self.output_filters, &mut ctx, "output").await;
        self.fan_out(&ctx).await;

        self.finish(ctx)
    }

    /// Close every channel registered as pipeline-owned.
    ///
    /// Close failures are logged and do not interrupt the remaining
    /// channels.
    pub async fn shutdown(&self) {
        let closing = self.channels.iter().filter(|r| r.owned).map(|r| async {
            if let Err(error) = r.channel.close().await {
                warn!(channel = r.channel.name(), error = %error, "channel close failed");
            }
        });
        futures_util::future::join_all(closing).await;
        debug!(pipeline = %self.name, "owned channels closed");
    }

    async fn run_filters(&self, filters: &FilterCollection, ctx: &mut RequestContext, stage: &str) {
        for filter in filters.iter() {
            if ctx.is_fatal() {
                debug!(stage, filter = filter.name(), "skipping filter after fault");
                continue;
            }
            debug!(stage, filter = filter.name(), "running filter");
            if let Err(error) = filter.execute(ctx).await {
                warn!(
                    stage,
                    filter = filter.name(),
                    status = %error.status,
                    error = %error,
                    "filter fault"
                );
                self.events.send(PipelineEvent::filter_faulted(
                    ctx.request_id(),
                    filter.name(),
                    error.status,
                    error.message.clone(),
                ));
                ctx.record_fault(ContextFault::new(error.status, error.message, filter.name()));
            }
        }
    }

    async fn run_binding(&self, ctx: &mut RequestContext) {
        debug!(binding = self.binding.name(), "running binding");
        match self.binding.execute(ctx).await {
            Ok(()) => {
                if !ctx.is_fatal() {
                    self.events.send(PipelineEvent::binding_completed(
                        ctx.request_id(),
                        self.binding.name(),
                        ctx.status(),
                    ));
                }
            }
            Err(error) => {
                warn!(binding = self.binding.name(), error = %error, "binding fault");
                self.events.send(PipelineEvent::binding_faulted(
                    ctx.request_id(),
                    self.binding.name(),
                    error.to_string(),
                ));
                // Bindings normally record their own fault before returning;
                // cover the ones that only return an error.
                if !ctx.is_fatal() {
                    ctx.record_fault(ContextFault::new(
                        error.status(),
                        error.to_string(),
                        self.binding.name(),
                    ));
                }
            }
        }
    }

    /// Deliver the response body to every channel, best-effort.
    ///
    /// Channels are opened lazily on first use. Fatal executions are not
    /// fanned out; side transports only see real responses.
    async fn fan_out(&self, ctx: &RequestContext) {
        if ctx.is_fatal() || self.channels.is_empty() {
            return;
        }
        let options = SendOptions {
            correlation_id: Some(ctx.request_id()),
            content_type: ctx
                .headers
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
        };
        for registration in &self.channels {
            let channel = registration.channel.as_ref();
            if let Err(error) = self.send_to_channel(channel, ctx, &options).await {
                warn!(channel = channel.name(), error = %error, "channel send failed");
                self.events.send(PipelineEvent::channel_faulted(
                    ctx.request_id(),
                    channel.name(),
                    error.to_string(),
                ));
            } else {
                debug!(channel = channel.name(), bytes = ctx.body().len(), "channel send ok");
            }
        }
    }

    async fn send_to_channel(
        &self,
        channel: &dyn Channel,
        ctx: &RequestContext,
        options: &SendOptions,
    ) -> Result<(), ChannelError> {
        if channel.state() != ChannelState::Open {
            channel.open().await?;
        }
        channel.send(ctx.body().clone(), options).await
    }

    /// Settle the response status, record the final state and publish the
    /// terminal event.
    fn finish(&self, mut ctx: RequestContext) -> RequestContext {
        if ctx.is_fatal() {
            // Fatal executions must answer with an error status.
            match ctx.status() {
                Some(status) if status.is_client_error() || status.is_server_error() => {}
                _ => ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR),
            }
            let status = ctx.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            self.set_state(PipelineState::Faulted);
            self.events.send(PipelineEvent::faulted(
                ctx.request_id(),
                status,
                ctx.fault().map(|f| f.stage.clone()),
            ));
            debug!(status = %status, "execution faulted");
        } else {
            if ctx.status().is_none() {
                ctx.set_status(StatusCode::OK);
            }
            let status = ctx.status().unwrap_or(StatusCode::OK);
            self.set_state(PipelineState::Completed);
            self.events
                .send(PipelineEvent::completed(ctx.request_id(), status));
            debug!(status = %status, "execution completed");
        }
        ctx
    }

    fn set_state(&self, state: PipelineState) {
        *self.lock_state() = state;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("input_filters", &self.input_filters)
            .field("binding", &self.binding.name())
            .field("output_filters", &self.output_filters)
            .field("channels", &self.channels.len())
            .field("state", &self.state())
            .finish()
    }
}

/// Builds a [`Pipeline`]. Stage order follows the call order.
pub struct PipelineBuilder {
    name: String,
    input_filters: FilterCollection,
    output_filters: FilterCollection,
    binding: Option<Arc<dyn Binding>>,
    channels: Vec<ChannelRegistration>,
    events: Option<PipelineEventBus>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_filters: FilterCollection::new(),
            output_filters: FilterCollection::new(),
            binding: None,
            channels: Vec::new(),
            events: None,
        }
    }

    /// Append an input filter.
    #[must_use]
    pub fn input_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.input_filters.add(filter);
        self
    }

    /// Append an output filter.
    #[must_use]
    pub fn output_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.output_filters.add(filter);
        self
    }

    /// Set the binding. Unset defaults to [`CoupledBinding`].
    #[must_use]
    pub fn binding(mut self, binding: Arc<dyn Binding>) -> Self {
        self.binding = Some(binding);
        self
    }

    /// Register a channel the pipeline uses but does not own.
    #[must_use]
    pub fn channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channels.push(ChannelRegistration {
            channel,
            owned: false,
        });
        self
    }

    /// Register a channel the pipeline owns and closes on shutdown.
    #[must_use]
    pub fn owned_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channels.push(ChannelRegistration {
            channel,
            owned: true,
        });
        self
    }

    /// Use a shared event bus instead of a private one.
    #[must_use]
    pub fn events(mut self, events: PipelineEventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            name: self.name,
            input_filters: self.input_filters,
            output_filters: self.output_filters,
            binding: self
                .binding
                .unwrap_or_else(|| Arc::new(CoupledBinding::new())),
            channels: self.channels,
            events: self.events.unwrap_or_default(),
            state: Mutex::new(PipelineState::Idle),
            execution_lock: tokio::sync::Mutex::new(()),
        }
    }
}
