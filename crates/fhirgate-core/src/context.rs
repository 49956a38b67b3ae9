//! Mutable request/response state threaded through every pipeline stage.
//!
//! A [`RequestContext`] is constructed once per inbound request, handed to the
//! pipeline by value, and mutated in place by each stage. It carries both the
//! request and the response representation; by the time the pipeline returns,
//! the status and body fields describe the response to send back.

use std::collections::HashMap;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Parse an HTTP method token, case-insensitively.
pub fn parse_method(token: &str) -> Result<Method> {
    Method::from_bytes(token.to_ascii_uppercase().as_bytes())
        .map_err(|_| CoreError::invalid_method(token))
}

/// Failure captured on the context when a stage faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFault {
    /// Response status the failure maps to.
    pub status: StatusCode,
    /// Operator-facing description of the failure.
    pub message: String,
    /// Name of the stage that raised the fault.
    pub stage: String,
    /// When the fault was recorded.
    pub occurred_at: OffsetDateTime,
}

impl ContextFault {
    pub fn new(status: StatusCode, message: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            stage: stage.into(),
            occurred_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Shared mutable state for one pipeline execution.
///
/// Exactly one execution owns a context at a time; stages receive it as
/// `&mut` and there is no interior locking. The `properties` bag is the only
/// sanctioned side channel for passing values between stages.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    /// HTTP method of the inbound request.
    pub method: Method,
    /// Full request URI, including any query string.
    pub uri: Uri,
    /// Header multimap, reused between request and response phases.
    pub headers: HeaderMap,
    /// Free-form string values passed between stages.
    pub properties: HashMap<String, String>,
    body: Bytes,
    body_text: Option<String>,
    status: Option<StatusCode>,
    fatal: bool,
    fault: Option<ContextFault>,
}

impl RequestContext {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method,
            uri,
            headers: HeaderMap::new(),
            properties: HashMap::new(),
            body: Bytes::new(),
            body_text: None,
            status: None,
            fatal: false,
            fault: None,
        }
    }

    /// Set a header during construction.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request body during construction.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.set_body(body);
        self
    }

    /// Set a property during construction.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Correlation id assigned at construction, stable across all stages.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Replace the body. Invalidates any cached text view.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
        self.body_text = None;
    }

    /// Drop the body. Used when a failed outbound call must not leak a
    /// partial downstream payload back to the caller.
    pub fn clear_body(&mut self) {
        self.set_body(Bytes::new());
    }

    /// UTF-8 view of the body, decoded once and cached until the body
    /// changes.
    pub fn body_text(&mut self) -> Result<&str> {
        if self.body_text.is_none() {
            self.body_text = Some(std::str::from_utf8(&self.body)?.to_owned());
        }
        Ok(self.body_text.as_deref().unwrap_or(""))
    }

    /// Parse the body as a JSON value.
    pub fn body_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Raw query string of the request URI, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Whether a stage has marked this execution as failed.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Mark the execution as failed. Once set, the flag never clears.
    pub fn set_fatal(&mut self) {
        self.fatal = true;
    }

    pub fn fault(&self) -> Option<&ContextFault> {
        self.fault.as_ref()
    }

    /// Record a stage failure. Marks the context fatal; the first fault wins
    /// and pins the response status, later faults only keep the flag set.
    pub fn record_fault(&mut self, fault: ContextFault) {
        self.fatal = true;
        if self.fault.is_none() {
            self.status = Some(fault.status);
            self.fault = Some(fault);
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }
}
