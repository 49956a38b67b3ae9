//! In-process channel backends for the FhirGate pipeline.
//!
//! This crate provides implementations of the `Channel` contract from
//! `fhirgate-pipeline`: a loopback backend that delivers sent payloads to
//! in-process subscribers over a bounded queue, and a null backend that
//! accepts and drops everything.
//!
//! # Example
//!
//! ```ignore
//! use fhirgate_channels::LoopbackChannel;
//! use fhirgate_pipeline::{Channel, SendOptions};
//!
//! let channel = LoopbackChannel::new("audit");
//! let mut inbox = channel.subscribe();
//! channel.open().await?;
//! channel.receive().await?;
//! channel.send(payload, &SendOptions::default()).await?;
//! let message = inbox.recv().await?;
//! ```

pub mod loopback;
pub mod null;

// Re-export the channel contract for convenience
pub use fhirgate_pipeline::{
    Channel, ChannelError, ChannelMessage, ChannelState, SendOptions,
};

pub use loopback::{
    DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_QUEUE_CAPACITY, LoopbackChannel, SpillReference,
};
pub use null::NullChannel;

use std::sync::Arc;

use fhirgate_cache::ObjectCache;
use fhirgate_config::ChannelSettings;
use fhirgate_pipeline::ChannelRegistry;

/// Type alias for a shareable channel instance.
pub type DynChannel = Arc<dyn Channel>;

/// Registry with the built-in backends under their stock names.
///
/// `loopback` channels are sized from `settings` and park oversized payloads
/// in `spill` when one is given; `null` channels ignore both.
pub fn stock_channels(
    settings: &ChannelSettings,
    spill: Option<Arc<dyn ObjectCache>>,
) -> ChannelRegistry {
    let mut registry = ChannelRegistry::new();
    let loopback_settings = settings.clone();
    registry.register("loopback", move || {
        let mut channel = LoopbackChannel::from_settings("loopback", &loopback_settings);
        if let Some(cache) = &spill {
            channel = channel.with_spill(cache.clone());
        }
        Arc::new(channel)
    });
    registry.register("null", || Arc::new(NullChannel::new("null")));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_channels_register_builtin_backends() {
        let registry = stock_channels(&ChannelSettings::default(), None);
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["loopback", "null"]
        );
    }

    #[test]
    fn test_stock_channels_build_fresh_instances() {
        let registry = stock_channels(&ChannelSettings::default(), None);
        let first = registry.build("loopback").unwrap();
        let second = registry.build("loopback").unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(first.state(), ChannelState::Unopened);
    }
}
