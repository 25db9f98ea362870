// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Processor output records

use std::any::Any;
use std::sync::Arc;

use super::{DependencyKey, Value};

/// The structured output of one processor call
///
/// Each field is published into the record's scope under its declared type and
/// name, where downstream stages can resolve it.
#[derive(Default, Clone)]
pub struct Record {
    fields: Vec<(DependencyKey, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field stored under its concrete type
    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.insert(name, value);
        self
    }

    /// Add a field stored under an abstract (trait object) type
    pub fn with_shared<T: ?Sized + Send + Sync + 'static>(
        mut self,
        name: impl Into<String>,
        value: Arc<T>,
    ) -> Self {
        self.insert::<Arc<T>>(name, value);
        self
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.fields
            .push((DependencyKey::of::<T>(name), Arc::new(value)));
    }

    pub fn keys(&self) -> impl Iterator<Item = &DependencyKey> {
        self.fields.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn into_fields(self) -> Vec<(DependencyKey, Value)> {
        self.fields
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}
