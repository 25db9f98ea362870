// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Factory catalog
//!
//! Components and processors are created by name from raw configuration
//! strings. The process-wide catalog is filled once at startup through explicit
//! registration calls and only read afterwards.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use super::{Component, Processor};
use crate::errors::{TreeflowError, TreeflowResult};

/// Creates components from raw configuration
pub trait ComponentFactory: Send + Sync {
    fn sample_config(&self) -> String;
    fn description(&self) -> String;
    fn create(&self, config: &str) -> anyhow::Result<Arc<dyn Component>>;
}

/// Creates processors from raw configuration
pub trait ProcessorFactory: Send + Sync {
    fn sample_config(&self) -> String;
    fn description(&self) -> String;
    fn create(&self, config: &str) -> anyhow::Result<Arc<dyn Processor>>;
}

/// A factory assembled from a sample config, a description and a closure
pub struct FactoryTemplate<F> {
    sample_config: String,
    description: String,
    build: F,
}

impl<F> FactoryTemplate<F> {
    pub fn new(sample_config: impl Into<String>, description: impl Into<String>, build: F) -> Self {
        Self {
            sample_config: sample_config.into(),
            description: description.into(),
            build,
        }
    }

    /// Use the YAML rendering of a default config as the sample
    pub fn with_sample<S: Serialize>(sample: &S, description: impl Into<String>, build: F) -> Self {
        let sample_config = serde_yaml::to_string(sample).unwrap_or_default();
        Self::new(sample_config, description, build)
    }
}

impl<F> ComponentFactory for FactoryTemplate<F>
where
    F: Fn(&str) -> anyhow::Result<Arc<dyn Component>> + Send + Sync,
{
    fn sample_config(&self) -> String {
        self.sample_config.clone()
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn create(&self, config: &str) -> anyhow::Result<Arc<dyn Component>> {
        (self.build)(config)
    }
}

impl<F> ProcessorFactory for FactoryTemplate<F>
where
    F: Fn(&str) -> anyhow::Result<Arc<dyn Processor>> + Send + Sync,
{
    fn sample_config(&self) -> String {
        self.sample_config.clone()
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn create(&self, config: &str) -> anyhow::Result<Arc<dyn Processor>> {
        (self.build)(config)
    }
}

/// Registered component and processor factories
#[derive(Default)]
pub struct Catalog {
    components: RwLock<BTreeMap<String, Arc<dyn ComponentFactory>>>,
    processors: RwLock<BTreeMap<String, Arc<dyn ProcessorFactory>>>,
}

static GLOBAL: OnceLock<Catalog> = OnceLock::new();

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide catalog
    pub fn global() -> &'static Catalog {
        GLOBAL.get_or_init(Catalog::new)
    }

    pub fn register_component(
        &self,
        name: &str,
        factory: Arc<dyn ComponentFactory>,
    ) -> TreeflowResult<()> {
        let mut components = self
            .components
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        insert_factory(&mut components, "component", name, factory)
    }

    pub fn register_processor(
        &self,
        name: &str,
        factory: Arc<dyn ProcessorFactory>,
    ) -> TreeflowResult<()> {
        let mut processors = self
            .processors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        insert_factory(&mut processors, "processor", name, factory)
    }

    pub fn component_factory(&self, name: &str) -> TreeflowResult<Arc<dyn ComponentFactory>> {
        self.components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| TreeflowError::UnknownFactory {
                kind: "component",
                name: name.to_string(),
            })
    }

    pub fn processor_factory(&self, name: &str) -> TreeflowResult<Arc<dyn ProcessorFactory>> {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| TreeflowError::UnknownFactory {
                kind: "processor",
                name: name.to_string(),
            })
    }

    /// Component factories sorted by name
    pub fn list_components(&self) -> Vec<(String, Arc<dyn ComponentFactory>)> {
        self.components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, factory)| (name.clone(), Arc::clone(factory)))
            .collect()
    }

    /// Processor factories sorted by name
    pub fn list_processors(&self) -> Vec<(String, Arc<dyn ProcessorFactory>)> {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, factory)| (name.clone(), Arc::clone(factory)))
            .collect()
    }

    /// Create a component by factory name
    pub fn new_component(&self, name: &str, config: &str) -> TreeflowResult<Arc<dyn Component>> {
        let factory = self.component_factory(name)?;
        factory
            .create(config)
            .map_err(|e| TreeflowError::factory_failed("component", name, &e))
    }

    /// Create a processor by factory name and validate its descriptor
    pub fn new_processor(&self, name: &str, config: &str) -> TreeflowResult<Arc<dyn Processor>> {
        let factory = self.processor_factory(name)?;
        let processor = factory
            .create(config)
            .map_err(|e| TreeflowError::factory_failed("processor", name, &e))?;

        processor
            .descriptor()
            .validate()
            .map_err(|reason| TreeflowError::InvalidDescriptor {
                processor: name.to_string(),
                reason,
            })?;

        Ok(processor)
    }
}

fn insert_factory<T: ?Sized>(
    registry: &mut BTreeMap<String, Arc<T>>,
    kind: &'static str,
    name: &str,
    factory: Arc<T>,
) -> TreeflowResult<()> {
    if name.is_empty() {
        return Err(TreeflowError::FactoryRegistration {
            kind,
            name: String::new(),
            reason: "name cannot be empty".into(),
        });
    }
    if registry.contains_key(name) {
        return Err(TreeflowError::FactoryRegistration {
            kind,
            name: name.to_string(),
            reason: "already registered".into(),
        });
    }
    registry.insert(name.to_string(), factory);
    Ok(())
}
