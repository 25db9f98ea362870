// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Stream layout definition

use serde::{Deserialize, Serialize};

/// Shape of a stream tree: one entry per stage, children nested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stage name, which is also the name of the processor it runs
    pub name: String,

    /// Number of parallel workers for this stage
    #[serde(default = "default_replica")]
    pub replica: usize,

    /// Capacity of the queue feeding this stage's output downstream
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Downstream stages, each receiving every record this stage produces
    #[serde(default, alias = "childs", skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StreamConfig>,
}

fn default_replica() -> usize {
    1
}

fn default_buffer_size() -> usize {
    1
}

impl StreamConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replica: default_replica(),
            buffer_size: default_buffer_size(),
            children: Vec::new(),
        }
    }

    pub fn with_replica(mut self, replica: usize) -> Self {
        self.replica = replica;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_child(mut self, child: StreamConfig) -> Self {
        self.children.push(child);
        self
    }

    /// Stage names in pre-order
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        collect_names(self, &mut names);
        names
    }

    /// Parent to child edges in pre-order
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges = Vec::new();
        collect_edges(self, &mut edges);
        edges
    }
}

fn collect_names(config: &StreamConfig, names: &mut Vec<String>) {
    names.push(config.name.clone());
    for child in &config.children {
        collect_names(child, names);
    }
}

fn collect_edges(config: &StreamConfig, edges: &mut Vec<(String, String)>) {
    for child in &config.children {
        edges.push((config.name.clone(), child.name.clone()));
        collect_edges(child, edges);
    }
}
