use thiserror::Error;

/// Core error types for FhirGate pipeline primitives.
///
/// These are argument-class failures: a caller handed us something malformed.
/// They fail fast and are never retried.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid request URI: {0}")]
    InvalidUri(String),

    #[error("Invalid status code: {0}")]
    InvalidStatus(u16),

    #[error("Unknown FHIR operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid route prefix: {0}")]
    InvalidRoutePrefix(String),

    #[error("Request body is not valid UTF-8: {0}")]
    BodyNotUtf8(#[from] std::str::Utf8Error),

    #[error("Retry attempts must be at least 1, got {0}")]
    InvalidRetryAttempts(u32),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a new InvalidMethod error
    pub fn invalid_method(method: impl Into<String>) -> Self {
        Self::InvalidMethod(method.into())
    }

    /// Create a new InvalidUri error
    pub fn invalid_uri(uri: impl Into<String>) -> Self {
        Self::InvalidUri(uri.into())
    }

    /// Create a new UnknownOperation error
    pub fn unknown_operation(operation: impl Into<String>) -> Self {
        Self::UnknownOperation(operation.into())
    }

    /// Create a new InvalidRoutePrefix error
    pub fn invalid_route_prefix(prefix: impl Into<String>) -> Self {
        Self::InvalidRoutePrefix(prefix.into())
    }

    /// Check if this error is a client error (4xx category)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMethod(_)
                | Self::InvalidUri(_)
                | Self::UnknownOperation(_)
                | Self::BodyNotUtf8(_)
                | Self::JsonError(_)
        )
    }

    /// Check if this error is a caller-side programming error (5xx category)
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidStatus(_) | Self::InvalidRoutePrefix(_) | Self::InvalidRetryAttempts(_)
        )
    }

    /// Get error category for logging/monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidMethod(_) | Self::InvalidUri(_) | Self::UnknownOperation(_) => {
                ErrorCategory::Routing
            }
            Self::InvalidStatus(_) | Self::InvalidRoutePrefix(_) | Self::InvalidRetryAttempts(_) => {
                ErrorCategory::Precondition
            }
            Self::BodyNotUtf8(_) | Self::JsonError(_) => ErrorCategory::Decode,
        }
    }
}

/// Error categories for monitoring and classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Routing,
    Precondition,
    Decode,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Routing => write!(f, "routing"),
            Self::Precondition => write!(f, "precondition"),
            Self::Decode => write!(f, "decode"),
        }
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CoreError::invalid_method("FR OB");
        assert_eq!(err.to_string(), "Invalid HTTP method: FR OB");
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
        assert_eq!(err.category(), ErrorCategory::Routing);
    }

    #[test]
    fn test_unknown_operation_error() {
        let err = CoreError::unknown_operation("$frobnicate");
        assert_eq!(err.to_string(), "Unknown FHIR operation: $frobnicate");
        assert!(err.is_client_error());
        assert_eq!(err.category(), ErrorCategory::Routing);
    }

    #[test]
    fn test_retry_attempts_error() {
        let err = CoreError::InvalidRetryAttempts(0);
        assert_eq!(err.to_string(), "Retry attempts must be at least 1, got 0");
        assert!(err.is_server_error());
        assert_eq!(err.category(), ErrorCategory::Precondition);
    }

    #[test]
    fn test_utf8_error_conversion() {
        let bad = [0xf0, 0x28, 0x8c, 0x28];
        let utf8_err = std::str::from_utf8(&bad).unwrap_err();
        let core_err: CoreError = utf8_err.into();

        assert!(matches!(core_err, CoreError::BodyNotUtf8(_)));
        assert!(core_err.is_client_error());
        assert_eq!(core_err.category(), ErrorCategory::Decode);
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err: serde_json::Error =
            serde_json::from_str::<serde_json::Value>("{ invalid json }").unwrap_err();
        let core_err: CoreError = json_err.into();

        assert!(matches!(core_err, CoreError::JsonError(_)));
        assert_eq!(core_err.category(), ErrorCategory::Decode);
    }

    #[test]
    fn test_client_vs_server_error_classification() {
        assert!(CoreError::invalid_method("bad method").is_client_error());
        assert!(CoreError::invalid_uri("::").is_client_error());
        assert!(CoreError::InvalidStatus(42).is_server_error());
        assert!(CoreError::invalid_route_prefix("//").is_server_error());

        let client_err = CoreError::invalid_uri("::");
        assert!(client_err.is_client_error());
        assert!(!client_err.is_server_error());

        let server_err = CoreError::InvalidRetryAttempts(0);
        assert!(server_err.is_server_error());
        assert!(!server_err.is_client_error());
    }

    #[test]
    fn test_error_categories_display() {
        assert_eq!(ErrorCategory::Routing.to_string(), "routing");
        assert_eq!(ErrorCategory::Precondition.to_string(), "precondition");
        assert_eq!(ErrorCategory::Decode.to_string(), "decode");
    }

    #[test]
    fn test_result_type_usage() {
        fn parse_ok() -> Result<String> {
            Ok("success".to_string())
        }

        fn parse_err() -> Result<String> {
            Err(CoreError::invalid_method("bad"))
        }

        assert!(parse_ok().is_ok());
        assert!(parse_err().is_err());
    }
}
