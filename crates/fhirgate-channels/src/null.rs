//! Channel that accepts every payload and drops it.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use fhirgate_pipeline::{
    Channel, ChannelError, ChannelMessage, ChannelState, ChannelStateCell, SendOptions,
};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Sink channel for wiring tests and disabled fan-out targets. Follows the
/// full lifecycle but never delivers anything.
#[derive(Debug)]
pub struct NullChannel {
    id: Uuid,
    name: String,
    state: ChannelStateCell,
    accepted: AtomicU64,
    subscribers: broadcast::Sender<ChannelMessage>,
}

impl NullChannel {
    pub fn new(name: impl Into<String>) -> Self {
        let (subscribers, _) = broadcast::channel(1);
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            state: ChannelStateCell::new(),
            accepted: AtomicU64::new(0),
            subscribers,
        }
    }

    /// Number of payloads accepted and dropped so far.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Channel for NullChannel {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ChannelState {
        self.state.current()
    }

    async fn open(&self) -> Result<(), ChannelError> {
        self.state.transition(ChannelState::Connecting)?;
        self.state.transition(ChannelState::Open)?;
        Ok(())
    }

    async fn send(&self, payload: Bytes, _options: &SendOptions) -> Result<(), ChannelError> {
        let state = self.state.current();
        if !state.is_open() {
            return Err(ChannelError::not_open(state));
        }
        self.accepted.fetch_add(1, Ordering::Relaxed);
        trace!(channel = %self.name, size = payload.len(), "dropping payload");
        Ok(())
    }

    async fn receive(&self) -> Result<(), ChannelError> {
        let state = self.state.current();
        if !state.is_open() {
            return Err(ChannelError::not_open(state));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelMessage> {
        self.subscribers.subscribe()
    }

    async fn close(&self) -> Result<(), ChannelError> {
        if self.state.current().is_terminal() {
            return Ok(());
        }
        self.state.transition(ChannelState::Closed)?;
        Ok(())
    }

    async fn abort(&self) {
        self.state.abort();
    }
}
