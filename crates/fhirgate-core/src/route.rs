//! URI decomposition into gateway routes.
//!
//! # Routing grammar
//!
//! After an optional configured prefix is stripped, a request path falls into
//! one of these shapes, tried in order:
//! - `/$operation` — root-level operation
//! - `/_operations/{operation}/{id}` — status of an asynchronous job
//! - `/` — bundle root (batch or transaction)
//! - `/{type}` — resource type
//! - `/{type}/$operation` — resource-level operation
//! - `/{type}/{id}` — resource instance
//! - `/{type}/{id}/$operation` — instance-level operation
//! - `/{type}/{id}/_history/{vid}` — specific resource version
//!
//! A segment that looks like an operation but is not a known one is treated
//! as an id or version, never as a parse error. `_history`, `_operations`
//! and HTTP method tokens compare case-insensitively.

use http::{Method, Uri};

use crate::context::{RequestContext, parse_method};
use crate::error::{CoreError, Result};
use crate::operations::{FhirOperation, OPERATION_PREFIX};

/// Path segment introducing a version suffix (`{type}/{id}/_history/{vid}`).
pub const HISTORY_SEGMENT: &str = "_history";

/// Path segment prefixing async job-status routes (`_operations/{op}/{id}`).
pub const OPERATIONS_SEGMENT: &str = "_operations";

/// Check a configured route prefix for characters that cannot appear in a
/// request path.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.contains('?') || prefix.contains('#') || prefix.contains(char::is_whitespace) {
        return Err(CoreError::invalid_route_prefix(prefix));
    }
    Ok(())
}

/// Decomposed view of a request URI.
///
/// Derived fresh from the method and URI on each access and never mutated;
/// [`RouteDescriptor::normalized_path`] is the inverse used to re-address
/// the outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    /// HTTP method of the request the route was derived from.
    pub method: Method,
    /// Configured prefix that was stripped from the path, if it matched.
    pub prefix: Option<String>,
    /// First path segment when the request addresses a resource type.
    pub resource_type: Option<String>,
    /// Resource instance id, or job id for `_operations` routes.
    pub id: Option<String>,
    /// Recognized operation, at whichever level it appeared.
    pub operation: Option<FhirOperation>,
    /// Version id from a `_history` route.
    pub version: Option<String>,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
}

impl RouteDescriptor {
    /// Decompose a method and URI into a route.
    pub fn parse(method: &Method, uri: &Uri, prefix: Option<&str>) -> Self {
        let query = uri.query().map(str::to_owned);
        let mut segments: Vec<&str> = uri.path().split('/').filter(|s| !s.is_empty()).collect();

        let mut stripped_prefix = None;
        if let Some(prefix) = prefix {
            let prefix_segments: Vec<&str> =
                prefix.split('/').filter(|s| !s.is_empty()).collect();
            if !prefix_segments.is_empty()
                && segments.len() >= prefix_segments.len()
                && segments
                    .iter()
                    .zip(&prefix_segments)
                    .all(|(seg, pre)| seg.eq_ignore_ascii_case(pre))
            {
                segments.drain(..prefix_segments.len());
                stripped_prefix = Some(prefix_segments.join("/"));
            }
        }

        let mut route = Self {
            method: method.clone(),
            prefix: stripped_prefix,
            resource_type: None,
            id: None,
            operation: None,
            version: None,
            query,
        };

        let Some(&first) = segments.first() else {
            // Bundle root: batch or transaction against the service base.
            return route;
        };

        // Root-level operation, e.g. `/$export`.
        if let Some(op) = FhirOperation::from_segment(first) {
            route.operation = Some(op);
            return route;
        }

        // Async job status, e.g. `/_operations/export/{id}`. The operation
        // segment is accepted with or without its `$` prefix.
        if first.eq_ignore_ascii_case(OPERATIONS_SEGMENT) && segments.len() >= 3 {
            let code = segments[1].trim_start_matches(OPERATION_PREFIX);
            if let Some(op) = FhirOperation::from_code(code) {
                route.operation = Some(op);
                route.id = Some(segments[2].to_string());
                return route;
            }
        }

        // Plain resource path: `{type}[/{id}[/$op | /_history/{vid}]]`.
        route.resource_type = Some(first.to_string());
        let Some(&second) = segments.get(1) else {
            return route;
        };
        if let Some(op) = FhirOperation::from_segment(second) {
            route.operation = Some(op);
            return route;
        }
        route.id = Some(second.to_string());
        let Some(&third) = segments.get(2) else {
            return route;
        };
        if let Some(op) = FhirOperation::from_segment(third) {
            route.operation = Some(op);
        } else if third.eq_ignore_ascii_case(HISTORY_SEGMENT) {
            if let Some(&fourth) = segments.get(3) {
                route.version = Some(fourth.to_string());
            }
        }
        route
    }

    /// Parse raw string tokens, validating the method, URI and prefix shape.
    ///
    /// The method token is accepted case-insensitively.
    pub fn parse_parts(method: &str, uri: &str, prefix: Option<&str>) -> Result<Self> {
        if let Some(prefix) = prefix {
            validate_prefix(prefix)?;
        }
        let method = parse_method(method)?;
        let uri: Uri = uri.parse().map_err(|_| CoreError::invalid_uri(uri))?;
        Ok(Self::parse(&method, &uri, prefix))
    }

    /// Derive the route of a pipeline context.
    pub fn from_context(ctx: &RequestContext, prefix: Option<&str>) -> Self {
        Self::parse(&ctx.method, &ctx.uri, prefix)
    }

    /// Whether the request addresses the service base itself.
    pub fn is_bundle_root(&self) -> bool {
        self.resource_type.is_none()
            && self.id.is_none()
            && self.operation.is_none()
            && self.version.is_none()
    }

    /// Relative path re-composed from the parsed fields, without prefix or
    /// query. Re-parsing the result yields the same semantic route.
    pub fn normalized_path(&self) -> String {
        match (&self.operation, &self.resource_type, &self.id) {
            (Some(op), Some(resource), Some(id)) => {
                format!("{resource}/{id}/{}", op.token())
            }
            (Some(op), Some(resource), None) => format!("{resource}/{}", op.token()),
            (Some(op), None, Some(id)) => {
                format!("{OPERATIONS_SEGMENT}/{}/{id}", op.code())
            }
            (Some(op), None, None) => op.token().to_string(),
            (None, Some(resource), Some(id)) => match &self.version {
                Some(version) => format!("{resource}/{id}/{HISTORY_SEGMENT}/{version}"),
                None => format!("{resource}/{id}"),
            },
            (None, Some(resource), None) => resource.clone(),
            (None, None, _) => String::new(),
        }
    }

    /// [`Self::normalized_path`] with the original query string re-attached.
    pub fn normalized_path_and_query(&self) -> String {
        match self.query.as_deref() {
            Some(query) if !query.is_empty() => {
                format!("{}?{query}", self.normalized_path())
            }
            _ => self.normalized_path(),
        }
    }
}

impl std::fmt::Display for RouteDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} /{}", self.method, self.normalized_path_and_query())
    }
}
