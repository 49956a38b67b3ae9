pub mod context;
pub mod error;
pub mod operations;
pub mod retry;
pub mod route;

pub use context::{ContextFault, RequestContext, parse_method};
pub use error::{CoreError, ErrorCategory, Result};
pub use operations::{FhirOperation, OPERATION_PREFIX, is_operation_segment};
pub use retry::{RetryError, RetryExecutor, RetryPolicy};
pub use route::{HISTORY_SEGMENT, OPERATIONS_SEGMENT, RouteDescriptor, validate_prefix};
