//! Name-to-constructor registries and declarative pipeline assembly.
//!
//! Registries are plain values handed to [`assemble`]; there is no global
//! registration side channel. Constructors run once per assembled pipeline,
//! so every pipeline gets fresh stage instances.

use std::sync::Arc;

use fhirgate_config::PipelineSettings;
use indexmap::IndexMap;
use tracing::debug;

use crate::binding::Binding;
use crate::channel::Channel;
use crate::error::AssemblyError;
use crate::filter::Filter;
use crate::pipeline::{Pipeline, PipelineBuilder};

type FilterConstructor = Box<dyn Fn() -> Arc<dyn Filter> + Send + Sync>;
type ChannelConstructor = Box<dyn Fn() -> Arc<dyn Channel> + Send + Sync>;

/// Maps configured filter names to constructors.
#[derive(Default)]
pub struct FilterRegistry {
    constructors: IndexMap<String, FilterConstructor>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `name`. Re-registering replaces the
    /// previous constructor.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn Filter> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(filter = %name, "registering filter constructor");
        self.constructors.insert(name, Box::new(constructor));
    }

    /// Build a fresh instance of the named filter.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::UnknownFilter`] for unregistered names.
    pub fn build(&self, name: &str) -> Result<Arc<dyn Filter>, AssemblyError> {
        self.constructors
            .get(name)
            .map(|construct| construct())
            .ok_or_else(|| AssemblyError::UnknownFilter(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Maps configured channel names to constructors.
#[derive(Default)]
pub struct ChannelRegistry {
    constructors: IndexMap<String, ChannelConstructor>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `name`. Re-registering replaces the
    /// previous constructor.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn Channel> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(channel = %name, "registering channel constructor");
        self.constructors.insert(name, Box::new(constructor));
    }

    /// Build a fresh instance of the named channel.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::UnknownChannel`] for unregistered names.
    pub fn build(&self, name: &str) -> Result<Arc<dyn Channel>, AssemblyError> {
        self.constructors
            .get(name)
            .map(|construct| construct())
            .ok_or_else(|| AssemblyError::UnknownChannel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Build a pipeline from declarative settings and explicit registries.
///
/// Filter and channel order in the settings is execution order. Channels
/// assembled this way are pipeline-owned and closed by
/// [`Pipeline::shutdown`].
///
/// # Errors
///
/// Returns [`AssemblyError`] when a configured name has no registered
/// constructor.
pub fn assemble(
    name: impl Into<String>,
    settings: &PipelineSettings,
    filters: &FilterRegistry,
    channels: &ChannelRegistry,
    binding: Arc<dyn Binding>,
) -> Result<Pipeline, AssemblyError> {
    let mut builder: PipelineBuilder = Pipeline::builder(name).binding(binding);
    for filter_name in &settings.input_filters {
        builder = builder.input_filter(filters.build(filter_name)?);
    }
    for filter_name in &settings.output_filters {
        builder = builder.output_filter(filters.build(filter_name)?);
    }
    for channel_name in &settings.channels {
        builder = builder.owned_channel(channels.build(channel_name)?);
    }
    Ok(builder.build())
}
