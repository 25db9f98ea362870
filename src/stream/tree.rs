// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Stream tree
//!
//! An n-ary tree of stages. Each stage binds a processor, a replica count and
//! an output buffer capacity. Stage names are unique within a tree and the
//! root always exists: structural edits that would remove or shift the root
//! are rejected.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::StreamConfig;
use crate::errors::{ErrorGroup, TreeflowError, TreeflowResult};
use crate::plugin::{Inputs, Processor, ProcessorDescriptor};
use crate::registry::Scope;

/// The invocable part of a stage, cheap to clone into worker tasks
#[derive(Clone)]
pub struct Stage {
    name: Arc<str>,
    processor: Option<Arc<dyn Processor>>,
    descriptor: Arc<ProcessorDescriptor>,
}

impl Stage {
    pub fn new(name: &str, processor: Arc<dyn Processor>) -> Self {
        let descriptor = Arc::new(processor.descriptor());
        Self {
            name: Arc::from(name),
            processor: Some(processor),
            descriptor,
        }
    }

    /// A stage with no processor that forwards every record unchanged
    pub fn pass_through(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            processor: None,
            descriptor: Arc::new(ProcessorDescriptor::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    pub fn is_bound(&self) -> bool {
        self.processor.is_some()
    }

    /// Resolve every declared input from `scope`
    pub fn resolve(&self, scope: &Scope) -> TreeflowResult<Inputs> {
        let mut inputs = Inputs::new();
        for dep in &self.descriptor.inputs {
            match scope.lookup(&dep.key) {
                Some(value) => inputs.insert(dep.field.clone(), Arc::clone(value)),
                None if dep.optional => {}
                None => {
                    return Err(TreeflowError::MissingDependency {
                        stage: self.name.to_string(),
                        field: dep.field.clone(),
                        type_name: dep.key.ty.name().to_string(),
                        key: dep.key.name.clone(),
                    })
                }
            }
        }
        Ok(inputs)
    }

    /// Run the processor against `scope` and publish its output
    ///
    /// The returned scope is a child of `scope` holding the record's fields.
    pub async fn invoke(&self, scope: Arc<Scope>) -> TreeflowResult<Arc<Scope>> {
        let Some(processor) = &self.processor else {
            return Ok(Arc::new(Scope::child(&scope)));
        };

        let inputs = self.resolve(&scope)?;
        let output = processor
            .process(inputs)
            .await
            .map_err(|e| TreeflowError::processor_failed(&self.name, &e))?;

        let mut child = Scope::child(&scope);
        match output {
            Some(record) => {
                if let Some(key) = record
                    .keys()
                    .find(|key| !self.descriptor.outputs.contains(key))
                {
                    return Err(TreeflowError::ProcessorFailed {
                        stage: self.name.to_string(),
                        message: format!("output {} is not declared", key),
                    });
                }
                child.map_values(record).map_err(|e| TreeflowError::ProcessorFailed {
                    stage: self.name.to_string(),
                    message: e.to_string(),
                })?;
            }
            None if self.descriptor.has_outputs() => {
                return Err(TreeflowError::EmptyResult {
                    stage: self.name.to_string(),
                });
            }
            None => {}
        }

        Ok(Arc::new(child))
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// One stage of the tree together with its children
#[derive(Debug, Clone)]
pub struct StreamNode {
    stage: Stage,
    replica: usize,
    buffer_size: usize,
    children: Vec<StreamNode>,
}

impl StreamNode {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            replica: 1,
            buffer_size: 1,
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

    pub fn with_child(mut self, child: StreamNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn name(&self) -> &str {
        self.stage.name()
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn replica(&self) -> usize {
        self.replica
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn children(&self) -> &[StreamNode] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Resolve dependencies from `scope` and call the bound processor
    pub async fn invoke(&self, scope: Arc<Scope>) -> TreeflowResult<Arc<Scope>> {
        self.stage.invoke(scope).await
    }

    fn to_config(&self) -> StreamConfig {
        StreamConfig {
            name: self.name().to_string(),
            replica: self.replica,
            buffer_size: self.buffer_size,
            children: self.children.iter().map(StreamNode::to_config).collect(),
        }
    }

    fn visit<'a>(&'a self, out: &mut Vec<&'a StreamNode>) {
        out.push(self);
        for child in &self.children {
            child.visit(out);
        }
    }
}

/// A rooted stream tree
#[derive(Debug, Clone)]
pub struct Stream {
    root: StreamNode,
}

impl Stream {
    /// Build a tree matching `layout`, binding each stage to the processor of
    /// the same name
    pub fn new(
        layout: &StreamConfig,
        processors: &HashMap<String, Arc<dyn Processor>>,
    ) -> TreeflowResult<Self> {
        let mut errors = ErrorGroup::new();
        let root = build_node(layout, &mut errors, &|name| {
            processors
                .get(name)
                .map(|p| Stage::new(name, Arc::clone(p)))
                .ok_or_else(|| TreeflowError::UnknownProcessor {
                    stage: name.to_string(),
                })
        });
        errors.extend(duplicate_names(layout));
        errors.into_result()?;

        Ok(Self { root })
    }

    /// Build a tree matching `layout` where every stage passes records through
    pub fn unbound(layout: &StreamConfig) -> TreeflowResult<Self> {
        let mut errors = ErrorGroup::new();
        let root = build_node(layout, &mut errors, &|name| Ok(Stage::pass_through(name)));
        errors.extend(duplicate_names(layout));
        errors.into_result()?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &StreamNode {
        &self.root
    }

    pub fn name(&self) -> &str {
        self.root.name()
    }

    /// Find a stage by name
    pub fn get(&self, name: &str) -> Option<&StreamNode> {
        find(&self.root, name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Every node in pre-order
    pub fn nodes(&self) -> Vec<&StreamNode> {
        let mut out = Vec::new();
        self.root.visit(&mut out);
        out
    }

    /// Stage names in pre-order
    pub fn names(&self) -> Vec<String> {
        self.nodes().iter().map(|n| n.name().to_string()).collect()
    }

    /// The layout this tree currently has
    pub fn to_config(&self) -> StreamConfig {
        self.root.to_config()
    }

    /// Append `node` as the last child of `parent`
    pub fn append_by_parent_name(&mut self, parent: &str, node: StreamNode) -> TreeflowResult<()> {
        self.ensure_insertable(&node)?;
        let target = find_mut(&mut self.root, parent).ok_or_else(|| TreeflowError::StageNotFound {
            stage: parent.to_string(),
        })?;
        target.children.push(node);
        Ok(())
    }

    /// Insert `node` as the sibling immediately before `target`
    pub fn insert_before(&mut self, target: &str, node: StreamNode) -> TreeflowResult<()> {
        self.insert_sibling(target, node, 0)
    }

    /// Insert `node` as the sibling immediately after `target`
    pub fn insert_after(&mut self, target: &str, node: StreamNode) -> TreeflowResult<()> {
        self.insert_sibling(target, node, 1)
    }

    /// Remove a stage together with its subtree
    pub fn delete(&mut self, name: &str) -> TreeflowResult<StreamNode> {
        if self.root.name() == name {
            return Err(TreeflowError::RootStage {
                stage: name.to_string(),
                reason: "cannot be deleted".into(),
            });
        }
        let (parent, idx) =
            parent_of_mut(&mut self.root, name).ok_or_else(|| TreeflowError::StageNotFound {
                stage: name.to_string(),
            })?;
        Ok(parent.children.remove(idx))
    }

    fn insert_sibling(&mut self, target: &str, node: StreamNode, offset: usize) -> TreeflowResult<()> {
        if self.root.name() == target {
            return Err(TreeflowError::RootStage {
                stage: target.to_string(),
                reason: "has no siblings".into(),
            });
        }
        self.ensure_insertable(&node)?;
        let (parent, idx) =
            parent_of_mut(&mut self.root, target).ok_or_else(|| TreeflowError::StageNotFound {
                stage: target.to_string(),
            })?;
        parent.children.insert(idx + offset, node);
        Ok(())
    }

    fn ensure_insertable(&self, node: &StreamNode) -> TreeflowResult<()> {
        let mut incoming = Vec::new();
        node.visit(&mut incoming);

        let mut seen = HashSet::new();
        for n in incoming {
            if !seen.insert(n.name()) || self.contains(n.name()) {
                return Err(TreeflowError::DuplicateStage {
                    stage: n.name().to_string(),
                });
            }
        }
        Ok(())
    }
}

fn build_node(
    layout: &StreamConfig,
    errors: &mut ErrorGroup,
    bind: &dyn Fn(&str) -> TreeflowResult<Stage>,
) -> StreamNode {
    let stage = bind(&layout.name).unwrap_or_else(|err| {
        errors.push(err);
        Stage::pass_through(&layout.name)
    });

    if layout.replica == 0 {
        errors.push(TreeflowError::InvalidStage {
            stage: layout.name.clone(),
            reason: "replica must be at least 1".into(),
        });
    }

    StreamNode {
        stage,
        replica: layout.replica,
        buffer_size: layout.buffer_size,
        children: layout
            .children
            .iter()
            .map(|child| build_node(child, errors, bind))
            .collect(),
    }
}

fn duplicate_names(layout: &StreamConfig) -> ErrorGroup {
    let mut seen = HashSet::new();
    layout
        .names()
        .into_iter()
        .filter(|name| !seen.insert(name.clone()))
        .map(|stage| TreeflowError::DuplicateStage { stage })
        .collect()
}

fn find<'a>(node: &'a StreamNode, name: &str) -> Option<&'a StreamNode> {
    if node.name() == name {
        return Some(node);
    }
    node.children.iter().find_map(|child| find(child, name))
}

fn find_mut<'a>(node: &'a mut StreamNode, name: &str) -> Option<&'a mut StreamNode> {
    if node.name() == name {
        return Some(node);
    }
    node.children
        .iter_mut()
        .find_map(|child| find_mut(child, name))
}

fn parent_of_mut<'a>(node: &'a mut StreamNode, name: &str) -> Option<(&'a mut StreamNode, usize)> {
    if let Some(idx) = node.children.iter().position(|c| c.name() == name) {
        return Some((node, idx));
    }
    node.children
        .iter_mut()
        .find_map(|child| parent_of_mut(child, name))
}
