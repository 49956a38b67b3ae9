//! In-process delivery over a tokio mpsc queue.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use fhirgate_cache::ObjectCache;
use fhirgate_config::ChannelSettings;
use fhirgate_pipeline::{
    Channel, ChannelError, ChannelMessage, ChannelState, ChannelStateCell, SendOptions,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Queue slots between `send` and the receive loop.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Largest payload delivered inline.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

const SUBSCRIBER_BUFFER: usize = 256;

/// Envelope delivered in place of a payload that was parked in the object
/// cache. Receivers resolve `key` against the same cache to get the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpillReference {
    /// Cache key holding the full payload.
    pub key: String,
    /// Size of the parked payload in bytes.
    pub bytes: usize,
}

/// Channel that loops sent payloads back to in-process subscribers.
///
/// Sends enqueue onto a bounded mpsc queue; [`Channel::receive`] starts the
/// pump task that drains the queue and fans messages out to every
/// [`Channel::subscribe`] receiver. Payloads over the configured size limit
/// are parked in an [`ObjectCache`] and a [`SpillReference`] envelope is
/// delivered instead.
pub struct LoopbackChannel {
    id: Uuid,
    name: String,
    state: ChannelStateCell,
    queue_tx: Mutex<Option<mpsc::Sender<ChannelMessage>>>,
    queue_rx: Mutex<Option<mpsc::Receiver<ChannelMessage>>>,
    subscribers: broadcast::Sender<ChannelMessage>,
    pump: Mutex<Option<JoinHandle<()>>>,
    max_payload_bytes: usize,
    spill_oversized: bool,
    spill: Option<Arc<dyn ObjectCache>>,
}

impl LoopbackChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a channel with an explicit queue capacity. A capacity of zero
    /// is clamped to one slot.
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(capacity.max(1));
        let (subscribers, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            state: ChannelStateCell::new(),
            queue_tx: Mutex::new(Some(queue_tx)),
            queue_rx: Mutex::new(Some(queue_rx)),
            subscribers,
            pump: Mutex::new(None),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            spill_oversized: true,
            spill: None,
        }
    }

    /// Create a channel sized from configuration.
    pub fn from_settings(name: impl Into<String>, settings: &ChannelSettings) -> Self {
        let mut channel = Self::with_capacity(name, settings.queue_capacity);
        channel.max_payload_bytes = settings.max_payload_bytes;
        channel.spill_oversized = settings.spill_oversized;
        channel
    }

    #[must_use]
    pub fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit;
        self
    }

    /// Attach the cache that oversized payloads are parked in.
    #[must_use]
    pub fn with_spill(mut self, cache: Arc<dyn ObjectCache>) -> Self {
        self.spill = Some(cache);
        self
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    fn sender(&self) -> Result<mpsc::Sender<ChannelMessage>, ChannelError> {
        lock(&self.queue_tx)
            .as_ref()
            .cloned()
            .ok_or_else(|| ChannelError::transport("delivery queue closed"))
    }

    /// Park an oversized payload in the cache and build the reference
    /// envelope that gets delivered in its place.
    async fn park_oversized(
        &self,
        payload: Bytes,
        options: &SendOptions,
    ) -> Result<ChannelMessage, ChannelError> {
        let size = payload.len();
        if !self.spill_oversized {
            return Err(ChannelError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }
        let Some(cache) = &self.spill else {
            return Err(ChannelError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        };
        let key = format!("spill:{}:{}", self.id, Uuid::new_v4());
        cache
            .add(&key, payload)
            .await
            .map_err(|error| ChannelError::transport(format!("payload spill failed: {error}")))?;
        debug!(channel = %self.name, key = %key, size, "parked oversized payload");

        let reference = SpillReference { key, bytes: size };
        let body = serde_json::to_vec(&reference)
            .map_err(|error| ChannelError::transport(format!("spill envelope: {error}")))?;
        let mut message = ChannelMessage::new(self.id, Bytes::from(body), options);
        message.content_type = Some("application/json".to_string());
        Ok(message)
    }
}

#[async_trait]
impl Channel for LoopbackChannel {
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
        debug!(channel = %self.name, id = %self.id, "loopback channel open");
        Ok(())
    }

    async fn send(&self, payload: Bytes, options: &SendOptions) -> Result<(), ChannelError> {
        let state = self.state.current();
        if !state.is_open() {
            return Err(ChannelError::not_open(state));
        }
        let message = if payload.len() > self.max_payload_bytes {
            self.park_oversized(payload, options).await?
        } else {
            ChannelMessage::new(self.id, payload, options)
        };
        let sender = self.sender()?;
        sender.try_send(message).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => ChannelError::transport("delivery queue full"),
            mpsc::error::TrySendError::Closed(_) => {
                ChannelError::transport("delivery queue closed")
            }
        })
    }

    async fn receive(&self) -> Result<(), ChannelError> {
        let state = self.state.current();
        if !state.is_open() {
            return Err(ChannelError::not_open(state));
        }
        let Some(mut queue) = lock(&self.queue_rx).take() else {
            return Err(ChannelError::transport("receive loop already running"));
        };
        let subscribers = self.subscribers.clone();
        let channel = self.name.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                trace!(channel = %channel, correlation = ?message.correlation_id, "delivering");
                let _ = subscribers.send(message);
            }
        });
        *lock(&self.pump) = Some(handle);
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
        drop(lock(&self.queue_tx).take());
        let pump = lock(&self.pump).take();
        if let Some(handle) = pump {
            // The pump drains whatever is still queued, then exits.
            if let Err(error) = handle.await {
                warn!(channel = %self.name, error = %error, "receive loop ended abnormally");
            }
        }
        debug!(channel = %self.name, id = %self.id, "loopback channel closed");
        Ok(())
    }

    async fn abort(&self) {
        let prior = self.state.abort();
        drop(lock(&self.queue_tx).take());
        if let Some(handle) = lock(&self.pump).take() {
            handle.abort();
        }
        debug!(channel = %self.name, from = %prior, "loopback channel aborted");
    }
}

impl fmt::Debug for LoopbackChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackChannel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state.current())
            .field("max_payload_bytes", &self.max_payload_bytes)
            .field("spill", &self.spill.is_some())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
