//! Error types for pipeline stages.
//!
//! Each stage kind has its own error type because the orchestrator reacts
//! differently to each: filter errors become context faults, binding errors
//! are fatal, channel errors are logged and swallowed.

use fhirgate_auth::AuthError;
use fhirgate_core::RetryError;
use http::StatusCode;
use thiserror::Error;

use crate::channel::ChannelState;

/// Failure raised by a filter.
///
/// The orchestrator copies the status and message onto the context as a
/// fault and skips the remaining filters of the stage group; a filter error
/// never aborts the process.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FilterError {
    /// Response status the failure maps to.
    pub status: StatusCode,
    /// Operator-facing description.
    pub message: String,
    /// Underlying cause, if any.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FilterError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            source: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, message)
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

/// Failure raised by a binding. Always fatal for the execution.
#[derive(Debug, Error)]
pub enum BindingError {
    /// The binding could not acquire credentials for the outbound call.
    #[error("Token acquisition failed: {0}")]
    Auth(#[from] AuthError),

    /// The outbound call failed at the transport level, retries included.
    #[error("Outbound call failed: {0}")]
    Transport(#[from] RetryError<reqwest::Error>),

    /// The downstream service answered with a non-success status.
    #[error("Downstream returned status {status}")]
    DownstreamStatus { status: StatusCode },

    /// The downstream response body could not be read.
    #[error("Failed to read downstream response body: {0}")]
    ResponseBody(#[source] reqwest::Error),

    /// The outbound request could not be constructed.
    #[error("Invalid outbound request: {0}")]
    InvalidRequest(String),
}

impl BindingError {
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Response status this failure maps to when recorded on the context.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(_) | Self::InvalidRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Transport(RetryError::Exhausted { source, .. }) if source.is_timeout() => {
                StatusCode::GATEWAY_TIMEOUT
            }
            Self::Transport(RetryError::InvalidMaxAttempts(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Transport(_) | Self::ResponseBody(_) => StatusCode::BAD_GATEWAY,
            Self::DownstreamStatus { status } => *status,
        }
    }
}

/// Failure raised by a channel operation.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A send was attempted outside the `Open` state.
    #[error("Channel is not open (state: {state})")]
    NotOpen { state: ChannelState },

    /// The requested lifecycle transition is not legal.
    #[error("Illegal channel transition: {from} -> {to}")]
    InvalidTransition {
        from: ChannelState,
        to: ChannelState,
    },

    /// Transport-level failure while talking to the channel backend.
    #[error("Channel transport error: {0}")]
    Transport(String),

    /// The payload exceeds the inline limit and could not be spilled.
    #[error("Payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
}

impl ChannelError {
    #[must_use]
    pub fn not_open(state: ChannelState) -> Self {
        Self::NotOpen { state }
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

/// Failure while assembling a pipeline from declarative settings.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// A configured filter name has no registered constructor.
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    /// A configured channel name has no registered constructor.
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),
}
