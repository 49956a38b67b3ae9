use std::time::Duration;

use fhirgate_core::{RetryPolicy, validate_prefix};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub downstream: DownstreamSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Channel transport configuration
    #[serde(default)]
    pub channel: ChannelSettings,
    /// Spill cache configuration
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

// Default derived via field defaults

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Service validations
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::validation("service.name must not be empty"));
        }
        // Downstream validations
        let url = self.downstream.base_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::validation(
                "downstream.base_url must use http or https",
            ));
        }
        if self.downstream.request_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "downstream.request_timeout_ms must be > 0",
            ));
        }
        if let Some(ref prefix) = self.downstream.route_prefix {
            validate_prefix(prefix).map_err(|e| {
                ConfigError::validation(format!("downstream.route_prefix is invalid: {e}"))
            })?;
        }
        // Retry validations
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::validation("retry.max_attempts must be > 0"));
        }
        // Pipeline validations
        for name in self
            .pipeline
            .input_filters
            .iter()
            .chain(&self.pipeline.output_filters)
            .chain(&self.pipeline.channels)
        {
            if name.trim().is_empty() {
                return Err(ConfigError::validation(
                    "pipeline filter and channel names must not be empty",
                ));
            }
        }
        // Channel validations
        if self.channel.queue_capacity == 0 {
            return Err(ConfigError::validation(
                "channel.queue_capacity must be > 0",
            ));
        }
        if self.channel.max_payload_bytes == 0 {
            return Err(ConfigError::validation(
                "channel.max_payload_bytes must be > 0",
            ));
        }
        // Cache validation
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::validation("cache.ttl_secs must be > 0"));
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::validation(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Optional deployment environment label, e.g., "dev", "staging", "prod"
    #[serde(default)]
    pub environment: Option<String>,
}

fn default_service_name() -> String {
    "fhirgate".into()
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            environment: None,
        }
    }
}

/// Downstream FHIR service the REST binding forwards to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamSettings {
    /// Base URL of the downstream service.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path prefix stripped from inbound URIs before routing, e.g. "/fhir".
    #[serde(default)]
    pub route_prefix: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Forward caller credentials (Authorization, Cookie) downstream.
    /// Default: false (the binding acquires its own token instead)
    #[serde(default)]
    pub forward_auth: bool,
}

fn default_base_url() -> String {
    "http://localhost:8080/".into()
}
fn default_request_timeout_ms() -> u64 {
    30_000
}

impl DownstreamSettings {
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url).map_err(|e| {
            ConfigError::validation(format!("downstream.base_url is not a valid URL: {e}"))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for DownstreamSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            route_prefix: None,
            request_timeout_ms: default_request_timeout_ms(),
            forward_auth: false,
        }
    }
}

/// Fixed-delay retry applied to outbound calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
}

fn default_retry_delay_ms() -> u64 {
    500
}
fn default_retry_max_attempts() -> u32 {
    3
}

impl RetrySettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Builds the validated policy used by bindings.
    pub fn policy(&self) -> Result<RetryPolicy, ConfigError> {
        RetryPolicy::new(self.delay(), self.max_attempts)
            .map_err(|e| ConfigError::validation(format!("retry settings are invalid: {e}")))
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            delay_ms: default_retry_delay_ms(),
            max_attempts: default_retry_max_attempts(),
        }
    }
}

/// Declarative pipeline layout. Names are resolved against registries at
/// assembly time; order here is execution order.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineSettings {
    #[serde(default)]
    pub input_filters: Vec<String>,
    #[serde(default)]
    pub output_filters: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
}

// Default derived

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// In-process delivery queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Largest payload delivered inline; bigger payloads are spilled to the
    /// object cache when spilling is enabled
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Spill oversized payloads to the object cache instead of rejecting
    #[serde(default = "default_spill_oversized")]
    pub spill_oversized: bool,
}

fn default_queue_capacity() -> usize {
    256
}
fn default_max_payload_bytes() -> usize {
    1024 * 1024
}
fn default_spill_oversized() -> bool {
    true
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_payload_bytes: default_max_payload_bytes(),
            spill_oversized: default_spill_oversized(),
        }
    }
}

/// Object cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Cached object TTL in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    3600 // 1 hour
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.service.name, "fhirgate");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.downstream.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_empty_service_name() {
        let mut config = GatewayConfig::default();
        config.service.name = "  ".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("service.name"));
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let mut config = GatewayConfig::default();
        config.downstream.base_url = "not a url".into();
        assert!(config.validate().is_err());

        config.downstream.base_url = "ftp://example.org/".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn test_rejects_bad_route_prefix() {
        let mut config = GatewayConfig::default();
        config.downstream.route_prefix = Some("/fhir?x=1".into());
        assert!(config.validate().is_err());

        config.downstream.route_prefix = Some("/fhir".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_retry_attempts() {
        let mut config = GatewayConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
        assert!(config.retry.policy().is_err());
    }

    #[test]
    fn test_rejects_blank_pipeline_names() {
        let mut config = GatewayConfig::default();
        config.pipeline.input_filters = vec!["request-id".into(), "".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_channel_capacity_and_level_typo() {
        let mut config = GatewayConfig::default();
        config.channel.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.logging.level = "verbose".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_helper() {
        let settings = RetrySettings {
            delay_ms: 50,
            max_attempts: 2,
        };
        let policy = settings.policy().unwrap();
        assert_eq!(policy.delay(), Duration::from_millis(50));
        assert_eq!(policy.max_attempts(), 2);
    }

    #[test]
    fn test_parses_partial_toml_with_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [downstream]
            base_url = "https://fhir.example.org/r4/"
            route_prefix = "/gateway"

            [pipeline]
            input_filters = ["request-id", "content-type"]
            channels = ["loopback"]

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.downstream.base_url, "https://fhir.example.org/r4/");
        assert_eq!(config.pipeline.input_filters.len(), 2);
        assert_eq!(config.pipeline.output_filters.len(), 0);
        assert_eq!(config.retry.max_attempts, 5);
        // Unset sections fall back to defaults.
        assert_eq!(config.retry.delay_ms, 500);
        assert_eq!(config.channel.queue_capacity, 256);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = GatewayConfig::default();
        let rendered = toml::to_string(&config).unwrap();
        let parsed: GatewayConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.service.name, config.service.name);
        assert_eq!(parsed.downstream.base_url, config.downstream.base_url);
        assert_eq!(parsed.cache.ttl_secs, config.cache.ttl_secs);
    }
}
