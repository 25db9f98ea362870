// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Pipelines
//!
//! This module defines pipeline configuration, the [`Pipeliner`] that owns
//! one pipeline's components, stream and schedule, and the
//! [`PipelineManager`] that keeps the named set of pipelines.

mod config;
mod manager;
mod pipeliner;

pub use config::{Manifest, PipelineConfig, PluginConfig};
pub use manager::PipelineManager;
pub use pipeliner::{ComponentEntry, Pipeliner, ProcessorEntry};

use serde::{Deserialize, Serialize};

/// Lifecycle state of a pipeline
///
/// `Idle` moves to `Running` once; `Running` moves to `Exited` on stop or on a
/// fault. `Exited` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Running,
    Exited,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Exited => write!(f, "exited"),
        }
    }
}
