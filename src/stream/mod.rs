// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Stream trees
//!
//! This module defines the layout of a pipeline's stages, the live tree built
//! from it, and the static dependency check run before execution.

mod check;
mod config;
mod tree;

pub use check::DependencyChecker;
pub use config::StreamConfig;
pub use tree::{Stage, Stream, StreamNode};
