//! Pipeline lifecycle events and the in-process bus that publishes them.
//!
//! The bus is a thin wrapper over a tokio broadcast channel. Publishing is
//! non-blocking and best-effort: with no subscribers the event is dropped,
//! and a slow subscriber only lags itself, never the pipeline.

use std::sync::Arc;

use http::StatusCode;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default event buffer size per subscriber.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Observable moments of one pipeline execution.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A filter rejected the request.
    FilterFaulted {
        request_id: Uuid,
        filter: String,
        status: StatusCode,
        message: String,
        timestamp: OffsetDateTime,
    },
    /// The binding finished its outbound call.
    BindingCompleted {
        request_id: Uuid,
        binding: String,
        /// Status left on the context; `None` for no-op bindings.
        status: Option<StatusCode>,
        timestamp: OffsetDateTime,
    },
    /// The binding failed; the execution is fatal from here on.
    BindingFaulted {
        request_id: Uuid,
        binding: String,
        message: String,
        timestamp: OffsetDateTime,
    },
    /// A channel send failed; the execution continues regardless.
    ChannelFaulted {
        request_id: Uuid,
        channel: String,
        message: String,
        timestamp: OffsetDateTime,
    },
    /// The execution finished without a fault.
    Completed {
        request_id: Uuid,
        status: StatusCode,
        timestamp: OffsetDateTime,
    },
    /// The execution finished fatal.
    Faulted {
        request_id: Uuid,
        status: StatusCode,
        /// Stage that raised the first fault, when known.
        stage: Option<String>,
        timestamp: OffsetDateTime,
    },
}

impl PipelineEvent {
    pub fn filter_faulted(
        request_id: Uuid,
        filter: impl Into<String>,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self::FilterFaulted {
            request_id,
            filter: filter.into(),
            status,
            message: message.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn binding_completed(
        request_id: Uuid,
        binding: impl Into<String>,
        status: Option<StatusCode>,
    ) -> Self {
        Self::BindingCompleted {
            request_id,
            binding: binding.into(),
            status,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn binding_faulted(
        request_id: Uuid,
        binding: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::BindingFaulted {
            request_id,
            binding: binding.into(),
            message: message.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn channel_faulted(
        request_id: Uuid,
        channel: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ChannelFaulted {
            request_id,
            channel: channel.into(),
            message: message.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn completed(request_id: Uuid, status: StatusCode) -> Self {
        Self::Completed {
            request_id,
            status,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn faulted(request_id: Uuid, status: StatusCode, stage: Option<String>) -> Self {
        Self::Faulted {
            request_id,
            status,
            stage,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// The execution this event belongs to.
    pub fn request_id(&self) -> Uuid {
        match self {
            Self::FilterFaulted { request_id, .. }
            | Self::BindingCompleted { request_id, .. }
            | Self::BindingFaulted { request_id, .. }
            | Self::ChannelFaulted { request_id, .. }
            | Self::Completed { request_id, .. }
            | Self::Faulted { request_id, .. } => *request_id,
        }
    }

    /// Short tag used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FilterFaulted { .. } => "filter_faulted",
            Self::BindingCompleted { .. } => "binding_completed",
            Self::BindingFaulted { .. } => "binding_faulted",
            Self::ChannelFaulted { .. } => "channel_faulted",
            Self::Completed { .. } => "completed",
            Self::Faulted { .. } => "faulted",
        }
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        match self {
            Self::FilterFaulted { timestamp, .. }
            | Self::BindingCompleted { timestamp, .. }
            | Self::BindingFaulted { timestamp, .. }
            | Self::ChannelFaulted { timestamp, .. }
            | Self::Completed { timestamp, .. }
            | Self::Faulted { timestamp, .. } => *timestamp,
        }
    }
}

/// Broadcasts pipeline events to any number of subscribers.
#[derive(Clone)]
pub struct PipelineEventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl PipelineEventBus {
    /// Create a new bus with the default buffer size.
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Create a new bus with a custom per-subscriber buffer size.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Create a shared bus wrapped in an `Arc`.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Publish an event, returning the number of subscribers that will see
    /// it. With no subscribers the event is dropped and 0 is returned.
    pub fn send(&self, event: PipelineEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }
}

impl Default for PipelineEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
