//! Configuration management for FhirGate
//!
//! This crate owns the declarative side of the gateway:
//! - Settings structs with serde defaults for every section
//! - A loader that merges a TOML file with `FHIRGATE__` environment
//!   variable overrides
//! - Validation that rejects nonsensical settings before anything is wired
//! - Tracing initialization with a reloadable log level

pub mod loader;
pub mod settings;
pub mod telemetry;

// Re-export main types
pub use loader::load_config;
pub use settings::{
    CacheSettings, ChannelSettings, DownstreamSettings, GatewayConfig, LoggingSettings,
    PipelineSettings, RetrySettings, ServiceSettings,
};
pub use telemetry::{apply_logging_level, init_tracing, init_tracing_from};

/// Error types for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
