//! Bindings terminate the input half of a pipeline.
//!
//! Exactly one binding sits between the input and output filter groups. The
//! REST binding forwards the context to a downstream FHIR service and copies
//! the response back; the coupled binding is its no-op stand-in for joining
//! two pipelines back to back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fhirgate_auth::TokenProvider;
use fhirgate_config::{ConfigError, GatewayConfig};
use fhirgate_core::{
    ContextFault, RequestContext, RetryExecutor, RetryPolicy, RouteDescriptor,
};
use http::{HeaderMap, HeaderValue, header};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::BindingError;

/// Default timeout for one outbound attempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The stage that performs the outbound exchange for a pipeline.
#[async_trait]
pub trait Binding: Send + Sync {
    /// Stable name used in logs and fault reports.
    fn name(&self) -> &str;

    /// Perform the exchange, rewriting the context into the response.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError`] when the exchange fails. Binding failures
    /// are fatal for the execution.
    async fn execute(&self, ctx: &mut RequestContext) -> Result<(), BindingError>;
}

/// Headers that must not be forwarded between hops.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}

/// Credential-bearing headers, stripped unless forwarding is enabled.
fn is_auth_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "authorization" | "cookie" | "set-cookie"
    )
}

// =============================================================================
// REST binding
// =============================================================================

/// Forwards the context to a downstream REST service.
///
/// The request URI is re-parsed into a route and re-emitted in normalized
/// form against the configured base URL, so whatever alias the caller used
/// reaches the downstream service in canonical shape. Transport failures are
/// retried with a fixed delay; non-success statuses are not retried.
pub struct RestBinding {
    name: String,
    base_url: Url,
    route_prefix: Option<String>,
    client: reqwest::Client,
    token_provider: Option<Arc<dyn TokenProvider>>,
    scopes: Vec<String>,
    retry: RetryPolicy,
    request_timeout: Duration,
    forward_auth: bool,
    honor_fatal: bool,
}

impl RestBinding {
    /// Create a binding for the given downstream base URL.
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized for the default
    /// HTTP client. Use [`RestBinding::with_client`] to supply one instead.
    pub fn new(mut base_url: Url) -> Self {
        // `Url::join` treats a base without a trailing slash as a file and
        // would replace its last path segment.
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        Self {
            name: "rest".to_string(),
            base_url,
            route_prefix: None,
            client: reqwest::Client::new(),
            token_provider: None,
            scopes: Vec::new(),
            retry: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            forward_auth: false,
            honor_fatal: true,
        }
    }

    /// Build a binding from gateway configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the downstream or retry settings do not
    /// validate.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let mut binding = Self::new(config.downstream.base_url()?);
        binding.route_prefix = config.downstream.route_prefix.clone();
        binding.request_timeout = config.downstream.request_timeout();
        binding.forward_auth = config.downstream.forward_auth;
        binding.retry = config.retry.policy()?;
        Ok(binding)
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Path prefix stripped from inbound URIs before routing.
    #[must_use]
    pub fn with_route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.route_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Acquire a bearer token from this provider before each call.
    #[must_use]
    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Forward caller credentials instead of stripping them.
    #[must_use]
    pub fn with_forward_auth(mut self, forward: bool) -> Self {
        self.forward_auth = forward;
        self
    }

    /// Skip the outbound call when the context is already fatal. On by
    /// default.
    #[must_use]
    pub fn with_honor_fatal(mut self, honor: bool) -> Self {
        self.honor_fatal = honor;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn target_url(&self, route: &RouteDescriptor) -> Result<Url, BindingError> {
        let relative = route.normalized_path_and_query();
        self.base_url.join(&relative).map_err(|e| {
            BindingError::invalid_request(format!(
                "cannot join route {relative:?} onto base URL: {e}"
            ))
        })
    }

    /// Copy request headers, dropping hop-by-hop and (unless forwarding)
    /// credential headers.
    fn outbound_headers(&self, ctx: &RequestContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in ctx.headers.iter() {
            if is_hop_by_hop_header(name.as_str()) {
                continue;
            }
            if !self.forward_auth && is_auth_header(name.as_str()) {
                continue;
            }
            headers.insert(name.clone(), value.clone());
        }
        headers
    }

    fn fail(&self, ctx: &mut RequestContext, error: &BindingError) {
        ctx.record_fault(ContextFault::new(
            error.status(),
            error.to_string(),
            self.name(),
        ));
    }
}

#[async_trait]
impl Binding for RestBinding {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        skip(self, ctx),
        fields(
            request_id = %ctx.request_id(),
            method = %ctx.method,
            path = %ctx.uri.path(),
        )
    )]
    async fn execute(&self, ctx: &mut RequestContext) -> Result<(), BindingError> {
        if self.honor_fatal && ctx.is_fatal() {
            debug!("context already fatal, skipping outbound call");
            return Ok(());
        }

        let route = RouteDescriptor::from_context(ctx, self.route_prefix.as_deref());
        let url = match self.target_url(&route) {
            Ok(url) => url,
            Err(error) => {
                self.fail(ctx, &error);
                return Err(error);
            }
        };

        let mut headers = self.outbound_headers(ctx);
        if let Some(provider) = &self.token_provider {
            let scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
            match provider.acquire_token(self.base_url.as_str(), &scopes).await {
                Ok(token) => match HeaderValue::try_from(format!("Bearer {}", token.value)) {
                    Ok(value) => {
                        headers.insert(header::AUTHORIZATION, value);
                    }
                    Err(_) => {
                        let error = BindingError::invalid_request(
                            "acquired token is not a valid header value",
                        );
                        self.fail(ctx, &error);
                        return Err(error);
                    }
                },
                Err(auth_error) => {
                    let error = BindingError::Auth(auth_error);
                    warn!(error = %error, "token acquisition failed");
                    self.fail(ctx, &error);
                    return Err(error);
                }
            }
        }

        let method = ctx.method.clone();
        let body = ctx.body().clone();
        debug!(url = %url, attempts = self.retry.max_attempts(), "forwarding request downstream");

        let outcome = RetryExecutor::execute_with_policy(&self.retry, || {
            self.client
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .body(body.clone())
                .timeout(self.request_timeout)
                .send()
        })
        .await;

        let response = match outcome {
            Ok(response) => response,
            Err(retry_error) => {
                let error = BindingError::Transport(retry_error);
                warn!(error = %error, "outbound call failed");
                self.fail(ctx, &error);
                ctx.clear_body();
                return Err(error);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error = BindingError::DownstreamStatus { status };
            warn!(status = %status, "downstream returned non-success status");
            self.fail(ctx, &error);
            ctx.clear_body();
            return Err(error);
        }

        for (name, value) in response.headers().iter() {
            if is_hop_by_hop_header(name.as_str()) {
                continue;
            }
            ctx.headers.insert(name.clone(), value.clone());
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(read_error) => {
                let error = BindingError::ResponseBody(read_error);
                warn!(error = %error, "failed to read downstream response body");
                self.fail(ctx, &error);
                ctx.clear_body();
                return Err(error);
            }
        };

        debug!(status = %status, bytes = body.len(), "outbound call completed");
        ctx.set_status(status);
        ctx.set_body(body);
        Ok(())
    }
}

// =============================================================================
// Coupled binding
// =============================================================================

/// Binding that performs no outbound call.
///
/// Used to join two pipelines back to back or to terminate a pipeline whose
/// filters produce the response themselves. The context passes through
/// untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoupledBinding;

impl CoupledBinding {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Binding for CoupledBinding {
    fn name(&self) -> &str {
        "coupled"
    }

    async fn execute(&self, _ctx: &mut RequestContext) -> Result<(), BindingError> {
        Ok(())
    }
}

#[cfg(test)]
mod header_tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_headers_detected() {
        assert!(is_hop_by_hop_header("Connection"));
        assert!(is_hop_by_hop_header("keep-alive"));
        assert!(is_hop_by_hop_header("Transfer-Encoding"));
        assert!(is_hop_by_hop_header("host"));
        assert!(!is_hop_by_hop_header("content-type"));
        assert!(!is_hop_by_hop_header("accept"));
    }

    #[test]
    fn test_auth_headers_detected() {
        assert!(is_auth_header("Authorization"));
        assert!(is_auth_header("cookie"));
        assert!(is_auth_header("Set-Cookie"));
        assert!(!is_auth_header("x-api-version"));
    }

    #[test]
    fn test_outbound_headers_strip_credentials_by_default() {
        use http::Method;

        let binding = RestBinding::new(Url::parse("http://localhost:8080/fhir").unwrap());
        let ctx = RequestContext::new(Method::GET, "/Patient/1".parse().unwrap())
            .with_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer x"))
            .with_header(header::HOST, HeaderValue::from_static("edge.example.org"))
            .with_header(header::ACCEPT, HeaderValue::from_static("application/fhir+json"));

        let headers = binding.outbound_headers(&ctx);
        assert!(headers.get(header::AUTHORIZATION).is_none());
        assert!(headers.get(header::HOST).is_none());
        assert_eq!(
            headers.get(header::ACCEPT).unwrap(),
            "application/fhir+json"
        );

        let forwarding = binding.with_forward_auth(true);
        let headers = forwarding.outbound_headers(&ctx);
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer x");
    }
}


#[cfg(test)]
mod binding_tests {
    use super::*;
    use http::{Method, StatusCode};

    fn _assert_binding_object_safe(_: &dyn Binding) {}

    #[tokio::test]
    async fn test_coupled_binding_passes_context_through() {
        let binding = CoupledBinding::new();
        let mut ctx = RequestContext::new(Method::GET, "/Patient".parse().unwrap())
            .with_body("unchanged");
        binding.execute(&mut ctx).await.unwrap();
        assert_eq!(binding.name(), "coupled");
        assert_eq!(ctx.body().as_ref(), b"unchanged");
        assert_eq!(ctx.status(), None);
        assert!(!ctx.is_fatal());
    }

    #[tokio::test]
    async fn test_rest_binding_skips_fatal_context() {
        // Points at nothing; the call must never happen.
        let binding = RestBinding::new(Url::parse("http://127.0.0.1:1/").unwrap());
        let mut ctx = RequestContext::new(Method::GET, "/Patient/1".parse().unwrap());
        ctx.record_fault(ContextFault::new(
            StatusCode::BAD_REQUEST,
            "rejected upstream",
            "validator",
        ));

        binding.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.status(), Some(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn test_rest_binding_can_ignore_fatal_flag() {
        let binding = RestBinding::new(Url::parse("http://127.0.0.1:1/").unwrap())
            .with_honor_fatal(false)
            .with_retry(RetryPolicy::once())
            .with_request_timeout(Duration::from_millis(200));
        let mut ctx = RequestContext::new(Method::GET, "/Patient/1".parse().unwrap());
        ctx.set_fatal();

        // With the guard disabled the call happens and fails for real.
        let result = binding.execute(&mut ctx).await;
        assert!(matches!(result, Err(BindingError::Transport(_))));
    }

    #[test]
    fn test_from_config_maps_settings() {
        let mut config = GatewayConfig::default();
        config.downstream.base_url = "https://fhir.example.org/r4".into();
        config.downstream.route_prefix = Some("/gw".into());
        config.downstream.request_timeout_ms = 1_500;
        config.retry.delay_ms = 25;
        config.retry.max_attempts = 4;

        let binding = RestBinding::from_config(&config).unwrap();
        assert_eq!(binding.base_url().as_str(), "https://fhir.example.org/r4/");
        assert_eq!(binding.route_prefix.as_deref(), Some("/gw"));
        assert_eq!(binding.request_timeout, Duration::from_millis(1_500));
        assert_eq!(binding.retry.max_attempts(), 4);
        assert!(!binding.forward_auth);
    }

    #[test]
    fn test_from_config_rejects_invalid_retry() {
        let mut config = GatewayConfig::default();
        config.retry.max_attempts = 0;
        assert!(RestBinding::from_config(&config).is_err());
    }
}
