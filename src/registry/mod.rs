// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Dependency registry
//!
//! A [`Scope`] maps `(declared type, name)` pairs to shared values. Scopes are
//! chained: a lookup that misses locally falls back to the parent, but nothing
//! ever writes through to a parent. Scopes are filled while they are still
//! exclusively owned and then frozen behind an `Arc`, so the hot path reads
//! them without locking.
//!
//! The engine builds three levels:
//!
//! - one root scope per pipeline, seeded with component instances
//! - one child per execution context
//! - one child per in-flight record, accumulating each stage's outputs

mod record;

pub use record::Record;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::errors::{TreeflowError, TreeflowResult};

/// A shared value stored in a scope
pub type Value = Arc<dyn Any + Send + Sync>;

/// Identity of a declared type
///
/// Equality and hashing use the [`TypeId`]; the type name is kept for
/// diagnostics only.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Registry key: declared type plus registry name (empty is the default name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyKey {
    pub ty: TypeKey,
    pub name: String,
}

impl DependencyKey {
    pub fn new(ty: TypeKey, name: impl Into<String>) -> Self {
        Self {
            ty,
            name: name.into(),
        }
    }

    pub fn of<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self::new(TypeKey::of::<T>(), name)
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}('{}')", self.ty, self.name)
    }
}

/// One level of the dependency registry
#[derive(Default)]
pub struct Scope {
    values: HashMap<DependencyKey, Value>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    /// Create a scope with no parent
    pub fn root() -> Self {
        Self::default()
    }

    /// Create an empty scope whose lookups fall back to `parent`
    pub fn child(parent: &Arc<Scope>) -> Self {
        Self {
            values: HashMap::new(),
            parent: Some(Arc::clone(parent)),
        }
    }

    /// Store `value` under its concrete type and `name`
    pub fn set<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.values
            .insert(DependencyKey::of::<T>(name), Arc::new(value));
    }

    /// Store an already type-erased value under an explicit key
    pub fn set_value(&mut self, key: DependencyKey, value: Value) {
        self.values.insert(key, value);
    }

    /// Store a shared capability under its abstract type
    ///
    /// `scope.map_to::<dyn LineWriter>(writer, "stdout")` is resolved by
    /// `scope.get::<Arc<dyn LineWriter>>("stdout")`.
    pub fn map_to<T: ?Sized + Send + Sync + 'static>(
        &mut self,
        value: Arc<T>,
        name: impl Into<String>,
    ) {
        self.set::<Arc<T>>(name, value);
    }

    /// Decompose a record into one entry per field
    ///
    /// Fails when the record publishes the same key twice or a key that this
    /// scope already holds locally.
    pub fn map_values(&mut self, record: Record) -> TreeflowResult<()> {
        for (key, value) in record.into_fields() {
            if self.values.contains_key(&key) {
                return Err(TreeflowError::DuplicateValue {
                    type_name: key.ty.name().to_string(),
                    key: key.name,
                });
            }
            self.values.insert(key, value);
        }
        Ok(())
    }

    /// Find a value in this scope or the nearest ancestor holding it
    pub fn lookup(&self, key: &DependencyKey) -> Option<&Value> {
        let mut scope = self;
        loop {
            if let Some(value) = scope.values.get(key) {
                return Some(value);
            }
            scope = scope.parent.as_deref()?;
        }
    }

    /// Typed lookup, `None` when missing or stored under a different type
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.lookup(&DependencyKey::of::<T>(name))
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.lookup(key).is_some()
    }

    pub fn local_len(&self) -> usize {
        self.values.len()
    }

    /// Number of scopes from here to the root, this one included
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut scope = self;
        while let Some(parent) = scope.parent.as_deref() {
            depth += 1;
            scope = parent;
        }
        depth
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .field("depth", &self.depth())
            .finish()
    }
}
