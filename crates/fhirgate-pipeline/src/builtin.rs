//! Stock filters every deployment tends to want.

use async_trait::async_trait;
use fhirgate_core::RequestContext;
use http::{HeaderName, HeaderValue, header};

use crate::error::FilterError;
use crate::filter::Filter;
use crate::registry::FilterRegistry;

/// Ensures each context carries an `x-request-id` header.
///
/// An inbound id is preserved; otherwise the context's own correlation id
/// is stamped so downstream services and channels can join logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdFilter;

impl RequestIdFilter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Filter for RequestIdFilter {
    fn name(&self) -> &str {
        "request-id"
    }

    async fn execute(&self, ctx: &mut RequestContext) -> Result<(), FilterError> {
        let header_name = HeaderName::from_static("x-request-id");
        if ctx.headers.contains_key(&header_name) {
            return Ok(());
        }
        let value = HeaderValue::from_str(&ctx.request_id().to_string())
            .map_err(|e| FilterError::internal("request id is not header-safe").with_source(e))?;
        ctx.headers.insert(header_name, value);
        Ok(())
    }
}

/// Rejects payloads whose media type is not in the accepted list.
///
/// Requests without a body pass through untouched.
#[derive(Debug, Clone)]
pub struct ContentTypeFilter {
    allowed: Vec<String>,
}

impl ContentTypeFilter {
    pub fn new() -> Self {
        Self {
            allowed: vec![
                "application/fhir+json".to_string(),
                "application/json".to_string(),
            ],
        }
    }

    /// Replace the accepted media types.
    #[must_use]
    pub fn with_allowed(mut self, allowed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed = allowed.into_iter().map(Into::into).collect();
        self
    }

    fn accepts(&self, content_type: &str) -> bool {
        // Strip parameters such as `; charset=utf-8`.
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim();
        self.allowed
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(media_type))
    }
}

impl Default for ContentTypeFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Filter for ContentTypeFilter {
    fn name(&self) -> &str {
        "content-type"
    }

    async fn execute(&self, ctx: &mut RequestContext) -> Result<(), FilterError> {
        if ctx.body().is_empty() {
            return Ok(());
        }
        let Some(content_type) = ctx
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        else {
            return Err(FilterError::unsupported_media_type(
                "a request body requires a Content-Type header",
            ));
        };
        if !self.accepts(content_type) {
            return Err(FilterError::unsupported_media_type(format!(
                "unsupported media type: {content_type}"
            )));
        }
        Ok(())
    }
}

/// Rejects bodies larger than a fixed byte limit.
#[derive(Debug, Clone, Copy)]
pub struct PayloadSizeFilter {
    limit: usize,
}

impl PayloadSizeFilter {
    /// Default body limit in bytes.
    pub const DEFAULT_LIMIT: usize = 10_000_000;

    pub fn new() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

impl Default for PayloadSizeFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Filter for PayloadSizeFilter {
    fn name(&self) -> &str {
        "payload-size"
    }

    async fn execute(&self, ctx: &mut RequestContext) -> Result<(), FilterError> {
        let size = ctx.body().len();
        if size > self.limit {
            return Err(FilterError::payload_too_large(format!(
                "payload of {size} bytes exceeds the limit of {} bytes",
                self.limit
            )));
        }
        Ok(())
    }
}

/// Registry pre-populated with the stock filters.
pub fn stock_filters() -> FilterRegistry {
    use std::sync::Arc;

    let mut registry = FilterRegistry::new();
    registry.register("request-id", || Arc::new(RequestIdFilter::new()));
    registry.register("content-type", || Arc::new(ContentTypeFilter::new()));
    registry.register("payload-size", || Arc::new(PayloadSizeFilter::new()));
    registry
}
