// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Components and processors
//!
//! This module provides the two plugin traits the engine runs:
//!
//! - [`Component`]: a long-lived capability (a writer, a client, a handle)
//!   started and stopped with its pipeline and shared by every stage
//! - [`Processor`]: a transformation bound to one stream stage
//!
//! A processor declares what it consumes and produces in a
//! [`ProcessorDescriptor`]. The descriptor is plain data checked when the
//! processor is created, so dependency validation never has to inspect code.

mod catalog;

pub use catalog::{Catalog, ComponentFactory, FactoryTemplate, ProcessorFactory};

use async_trait::async_trait;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::registry::{DependencyKey, Record, TypeKey, Value};

/// Identity record of a constructed component
#[derive(Clone)]
pub struct Instance {
    /// Registry name the value is published under
    pub name: String,
    /// Declared type the value is published under
    pub ty: TypeKey,
    /// The shared value itself
    pub value: Value,
}

impl Instance {
    /// Publish `value` under its concrete type
    pub fn new<T: Any + Send + Sync>(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            ty: TypeKey::of::<T>(),
            value: Arc::new(value),
        }
    }

    /// Publish a shared trait object under its abstract type
    pub fn shared<T: ?Sized + Send + Sync + 'static>(name: impl Into<String>, value: Arc<T>) -> Self {
        Self::new::<Arc<T>>(name, value)
    }

    pub fn key(&self) -> DependencyKey {
        DependencyKey::new(self.ty, self.name.clone())
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .finish()
    }
}

/// A named capability started and stopped with its pipeline
#[async_trait]
pub trait Component: Send + Sync {
    /// The value this component publishes into the pipeline's root scope
    fn instance(&self) -> Instance;

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One declared input or output of a processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Field name inside the processor's input or output
    pub field: String,
    /// Registry key the field resolves from or publishes to
    pub key: DependencyKey,
    /// A missing optional input is not an error
    pub optional: bool,
}

impl Dependency {
    /// A required field of type `T` resolved under the default (empty) name
    pub fn of<T: ?Sized + 'static>(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            key: DependencyKey::of::<T>(""),
            optional: false,
        }
    }

    /// Resolve the field under a specific registry name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.key.name = name.into();
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Declared inputs and outputs of a processor
#[derive(Debug, Clone, Default)]
pub struct ProcessorDescriptor {
    pub inputs: Vec<Dependency>,
    pub outputs: Vec<DependencyKey>,
}

impl ProcessorDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, dependency: Dependency) -> Self {
        self.inputs.push(dependency);
        self
    }

    /// Declare an output published under `name` with type `T`
    pub fn output<T: ?Sized + 'static>(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(DependencyKey::of::<T>(name));
        self
    }

    pub fn has_outputs(&self) -> bool {
        !self.outputs.is_empty()
    }

    /// Check the descriptor's shape, returning the reason it is unusable
    pub fn validate(&self) -> Result<(), String> {
        let mut fields = HashSet::new();
        for input in &self.inputs {
            if input.field.is_empty() {
                return Err("input field name cannot be empty".into());
            }
            if !fields.insert(input.field.as_str()) {
                return Err(format!("input field '{}' is declared twice", input.field));
            }
        }

        let mut outputs = HashSet::new();
        for output in &self.outputs {
            if !outputs.insert(output) {
                return Err(format!("output {} is declared twice", output));
            }
        }

        Ok(())
    }
}

/// Input dependencies resolved for one processor call, keyed by field name
#[derive(Default)]
pub struct Inputs {
    values: HashMap<String, Value>,
}

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, field: String, value: Value) {
        self.values.insert(field, value);
    }

    /// Typed access to a resolved field; `None` for absent optional fields
    pub fn get<T: Any + Send + Sync>(&self, field: &str) -> Option<&T> {
        self.values.get(field).and_then(|v| v.downcast_ref::<T>())
    }

    /// Typed access that treats absence as a processor error
    pub fn require<T: Any + Send + Sync>(&self, field: &str) -> anyhow::Result<&T> {
        self.get(field).ok_or_else(|| {
            anyhow::anyhow!(
                "input field '{}' of type {} was not resolved",
                field,
                std::any::type_name::<T>()
            )
        })
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A transformation bound to a stream stage
///
/// One processor instance is created per pipeline and shared by every replica
/// and every activation of its stage.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Declared dependencies and outputs
    fn descriptor(&self) -> ProcessorDescriptor;

    /// Handle one record
    ///
    /// Returning `Ok(None)` is only valid for processors without declared
    /// outputs.
    async fn process(&self, inputs: Inputs) -> anyhow::Result<Option<Record>>;
}
