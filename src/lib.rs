// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! # treeflow - Pipeline Scheduling Engine
//!
//! `treeflow` wires named components and processors into a tree of stages and
//! runs that tree as a scheduled, supervised pipeline.
//!
//! ## Features
//!
//! - **Typed dependency scopes** - Stages resolve inputs by declared type and name
//! - **Tree-shaped dataflow** - Replicated workers per stage, broadcast to children
//! - **Backpressure** - A rate circuit breaker delays invocations while failing
//! - **Schedules** - Tight loop, fixed intervals, or cron expressions
//! - **Lifecycle** - Idle, running and exited pipelines under one manager
//!
//! ## Quick Start
//!
//! ```bash
//! # List built-in plugins
//! treeflow plugins --sample
//!
//! # Check a manifest
//! treeflow check pipelines.yaml
//!
//! # Run it
//! treeflow run pipelines.yaml --all
//! ```

pub mod builtin;
pub mod cli;
pub mod errors;
pub mod exec;
pub mod monitor;
pub mod pipeline;
pub mod plugin;
pub mod registry;
pub mod schedule;
pub mod stream;

// Re-export commonly used types
pub use errors::{TreeflowError, TreeflowResult};
pub use monitor::Monitor;
pub use pipeline::{PipelineConfig, PipelineManager, PipelineState, Pipeliner};
pub use plugin::{Catalog, Component, Processor};
pub use registry::{Record, Scope};
pub use stream::{Stream, StreamConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
