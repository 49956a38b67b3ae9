//! Composable request pipeline engine for FHIR gateways
//!
//! A pipeline threads one mutable [`fhirgate_core::RequestContext`] through
//! an ordered arrangement of stages:
//!
//! ```text
//! request ──> input filters ──> binding ──> output filters ──┬──> response
//!                                                            │
//!                                                  channels (fan-out)
//! ```
//!
//! - [`Filter`]: mutates or rejects the context; faults short-circuit the
//!   stage group but never abort the process
//! - [`Binding`]: the single outbound exchange; [`RestBinding`] forwards to
//!   a downstream FHIR service with fixed-delay retries
//! - [`Channel`]: side transports fed best-effort after the exchange
//! - [`Pipeline`]: the orchestrator tying them together
//!
//! Pipelines are built imperatively with [`Pipeline::builder`] or
//! declaratively from [`fhirgate_config::PipelineSettings`] via
//! [`assemble`].

pub mod binding;
pub mod builtin;
pub mod channel;
pub mod error;
pub mod events;
pub mod filter;
pub mod pipeline;
pub mod registry;

pub use binding::{Binding, CoupledBinding, DEFAULT_REQUEST_TIMEOUT, RestBinding};
pub use builtin::{ContentTypeFilter, PayloadSizeFilter, RequestIdFilter, stock_filters};
pub use channel::{Channel, ChannelMessage, ChannelState, ChannelStateCell, SendOptions};
pub use error::{AssemblyError, BindingError, ChannelError, FilterError};
pub use events::{DEFAULT_BUFFER_SIZE, PipelineEvent, PipelineEventBus};
pub use filter::{Filter, FilterCollection};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineState};
pub use registry::{ChannelRegistry, FilterRegistry, assemble};
