// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Metrics store
//!
//! A [`Monitor`] is one namespace of a hierarchical key/value store. Pipelines
//! write into `pipeline.<name>` and each stage into
//! `pipeline.<name>.stream.<stage>`. Handles are cheap to clone and every
//! clone refers to the same namespace.

mod keys;

pub use keys::*;

use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// One recorded value
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Count(i64),
    Float(f64),
    Time(DateTime<Local>),
    Elapsed(Duration),
    Text(String),
}

impl Metric {
    pub fn as_count(&self) -> Option<i64> {
        match self {
            Metric::Count(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Metric::Float(v) => Some(*v),
            Metric::Count(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Metric::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Metric::Count(v) => serde_json::Value::from(*v),
            Metric::Float(v) => serde_json::Value::from(*v),
            Metric::Time(v) => serde_json::Value::from(v.to_rfc3339()),
            Metric::Elapsed(v) => serde_json::Value::from(format!("{:?}", v)),
            Metric::Text(v) => serde_json::Value::from(v.as_str()),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Count(v) => write!(f, "{}", v),
            Metric::Float(v) => write!(f, "{:.3}", v),
            Metric::Time(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
            Metric::Elapsed(v) => write!(f, "{:?}", v),
            Metric::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Metric {
    fn from(v: i64) -> Self {
        Metric::Count(v)
    }
}

impl From<f64> for Metric {
    fn from(v: f64) -> Self {
        Metric::Float(v)
    }
}

impl From<DateTime<Local>> for Metric {
    fn from(v: DateTime<Local>) -> Self {
        Metric::Time(v)
    }
}

impl From<Duration> for Metric {
    fn from(v: Duration) -> Self {
        Metric::Elapsed(v)
    }
}

impl From<String> for Metric {
    fn from(v: String) -> Self {
        Metric::Text(v)
    }
}

impl From<&str> for Metric {
    fn from(v: &str) -> Self {
        Metric::Text(v.to_string())
    }
}

#[derive(Default)]
struct Namespace {
    path: String,
    vars: RwLock<BTreeMap<String, Metric>>,
    children: RwLock<BTreeMap<String, Monitor>>,
}

/// Handle to one namespace of the metrics store
#[derive(Clone, Default)]
pub struct Monitor {
    inner: Arc<Namespace>,
}

impl Monitor {
    /// A fresh, unnamed root namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// Dotted path of this namespace (empty for the root)
    pub fn namespace(&self) -> &str {
        &self.inner.path
    }

    /// The child namespace `name`, created on first use
    ///
    /// Dotted names descend several levels at once.
    pub fn with(&self, name: &str) -> Monitor {
        name.split('.')
            .filter(|part| !part.is_empty())
            .fold(self.clone(), |monitor, part| monitor.child(part))
    }

    fn child(&self, name: &str) -> Monitor {
        if let Some(existing) = self
            .inner
            .children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return existing.clone();
        }

        let mut children = self
            .inner
            .children
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        children
            .entry(name.to_string())
            .or_insert_with(|| Monitor {
                inner: Arc::new(Namespace {
                    path: if self.inner.path.is_empty() {
                        name.to_string()
                    } else {
                        format!("{}.{}", self.inner.path, name)
                    },
                    ..Namespace::default()
                }),
            })
            .clone()
    }

    /// Add `delta` to an integer counter, starting from zero
    ///
    /// A key holding a non-integer value is replaced.
    pub fn add(&self, key: &str, delta: i64) -> i64 {
        let mut vars = self.vars_mut();
        let entry = vars.entry(key.to_string()).or_insert(Metric::Count(0));
        let next = entry.as_count().unwrap_or(0).saturating_add(delta);
        *entry = Metric::Count(next);
        next
    }

    /// Add `delta` to a float counter, starting from zero
    pub fn add_float(&self, key: &str, delta: f64) -> f64 {
        let mut vars = self.vars_mut();
        let entry = vars.entry(key.to_string()).or_insert(Metric::Float(0.0));
        let next = entry.as_float().unwrap_or(0.0) + delta;
        *entry = Metric::Float(next);
        next
    }

    pub fn set(&self, key: &str, value: impl Into<Metric>) {
        self.vars_mut().insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Metric> {
        self.inner
            .vars
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn delete(&self, key: &str) -> Option<Metric> {
        self.vars_mut().remove(key)
    }

    /// Visit every value in this namespace and all namespaces below it
    pub fn for_each(&self, f: &mut dyn FnMut(&str, &str, &Metric)) {
        let vars = self
            .inner
            .vars
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (key, metric) in &vars {
            f(&self.inner.path, key, metric);
        }

        for child in self.children() {
            child.for_each(f);
        }
    }

    /// Nested JSON object of every value below this namespace
    pub fn snapshot(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (key, metric) in self
            .inner
            .vars
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            object.insert(key.clone(), metric.to_json());
        }

        let children = self
            .inner
            .children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (name, child) in children {
            object.insert(name, child.snapshot());
        }

        serde_json::Value::Object(object)
    }

    fn children(&self) -> Vec<Monitor> {
        self.inner
            .children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn vars_mut(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Metric>> {
        self.inner
            .vars
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("namespace", &self.inner.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let monitor = Monitor::new();

        assert_eq!(monitor.add("runs", 1), 1);
        assert_eq!(monitor.add("runs", 2), 3);
        assert_eq!(monitor.add("runs", -1), 2);
        assert!((monitor.add_float("load", 0.5) - 0.5).abs() < f64::EPSILON);
        assert!((monitor.add_float("load", 0.25) - 0.75).abs() < f64::EPSILON);

        assert_eq!(monitor.get("runs"), Some(Metric::Count(2)));
    }

    #[test]
    fn test_namespaces_are_shared_between_handles() {
        let root = Monitor::new();
        let stage = root.with("pipeline.p1").with("stream").with("root");
        assert_eq!(stage.namespace(), "pipeline.p1.stream.root");

        stage.add(RUN_TIMES, 1);
        let again = root.with("pipeline.p1.stream.root");
        assert_eq!(again.get(RUN_TIMES), Some(Metric::Count(1)));
    }

    #[test]
    fn test_set_get_delete() {
        let monitor = Monitor::new();
        monitor.set(STATE, "running");
        monitor.set(ELAPSED, Duration::from_millis(5));

        assert_eq!(monitor.get(STATE).unwrap().as_text(), Some("running"));
        assert_eq!(monitor.delete(STATE), Some(Metric::from("running")));
        assert!(monitor.get(STATE).is_none());
    }

    #[test]
    fn test_for_each_visits_every_namespace() {
        let root = Monitor::new();
        root.set("a", 1i64);
        root.with("x").set("b", 2i64);
        root.with("x.y").set("c", 3i64);

        let mut seen = Vec::new();
        root.for_each(&mut |ns, key, metric| {
            seen.push(format!("{}/{}={}", ns, key, metric));
        });

        assert_eq!(seen, vec!["/a=1", "x/b=2", "x.y/c=3"]);
    }

    #[test]
    fn test_snapshot_nests_children() {
        let root = Monitor::new();
        root.with("pipeline.p1").set(RUN_TIMES, 4i64);

        let snapshot = root.snapshot();
        assert_eq!(snapshot["pipeline"]["p1"][RUN_TIMES], 4);
    }
}
