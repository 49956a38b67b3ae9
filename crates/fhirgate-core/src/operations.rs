//! FHIR operation taxonomy routed by the gateway.
//!
//! Operations are identified by the `$` prefix in the URL path:
//! - Root level: `/$operation`
//! - Resource level: `/{type}/$operation`
//! - Instance level: `/{type}/{id}/$operation`
//!
//! Asynchronous operations are additionally reachable through the job-status
//! form `/_operations/{operation}/{id}` used to poll or cancel a running job.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Marker prefix of an operation path segment.
pub const OPERATION_PREFIX: char = '$';

/// Checks if a path segment represents an operation (starts with `$`).
#[inline]
pub fn is_operation_segment(segment: &str) -> bool {
    segment.starts_with(OPERATION_PREFIX)
}

/// Server operations the gateway recognizes and routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FhirOperation {
    /// Rebuild search indexes over stored resources.
    Reindex,
    /// Bulk import of clinical resources.
    Import,
    /// Bulk export of clinical resources.
    Export,
    /// Convert a payload between supported clinical data formats.
    ConvertData,
}

impl FhirOperation {
    pub const ALL: [Self; 4] = [Self::Reindex, Self::Import, Self::Export, Self::ConvertData];

    /// Operation code without the `$` prefix.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Reindex => "reindex",
            Self::Import => "import",
            Self::Export => "export",
            Self::ConvertData => "convert-data",
        }
    }

    /// Path segment form, `$` prefix included.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Reindex => "$reindex",
            Self::Import => "$import",
            Self::Export => "$export",
            Self::ConvertData => "$convert-data",
        }
    }

    /// Whether the operation runs as an asynchronous job whose status is
    /// polled under `_operations/{operation}/{id}`.
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Reindex | Self::Import | Self::Export)
    }

    /// Parse a `$`-prefixed path segment into a known operation.
    ///
    /// Unknown segments return `None` so route parsing can fall through to
    /// id or version handling instead of failing.
    pub fn from_segment(segment: &str) -> Option<Self> {
        let code = segment.strip_prefix(OPERATION_PREFIX)?;
        Self::from_code(code)
    }

    /// Parse an operation code (no `$` prefix), case-insensitively.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.code().eq_ignore_ascii_case(code))
    }
}

impl FromStr for FhirOperation {
    type Err = CoreError;

    /// Accepts both the bare code (`reindex`) and the segment form
    /// (`$reindex`), as configuration files use either.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.strip_prefix(OPERATION_PREFIX).unwrap_or(s);
        Self::from_code(code).ok_or_else(|| CoreError::unknown_operation(s))
    }
}

impl std::fmt::Display for FhirOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}
