// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Stream execution
//!
//! This module turns a stream tree into a live concurrent graph: worker pools
//! per stage, broadcast fan-out to children, a shared circuit breaker and
//! per-stage metrics.

mod breaker;
mod context;

pub use breaker::CircuitBreaker;
pub use context::ExecContext;

use std::sync::Arc;

use crate::errors::TreeflowError;
use crate::registry::Scope;

/// Registry name of the cancellation token published into scopes
pub const CONTEXT_KEY: &str = "context";

/// Registry name of the [`crate::monitor::Monitor`] published into scopes
pub const MONITOR_KEY: &str = "monitor";

/// A panic caught inside a worker
#[derive(Debug, Clone)]
pub struct Fault {
    /// Stage whose processor panicked
    pub stage: String,
    /// Panic payload, when it was a string
    pub message: String,
    /// Stack of the worker that caught the panic
    pub backtrace: String,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Stream: {}, Panic: {}", self.stage, self.message)
    }
}

/// Result of one worker loop iteration
#[derive(Debug)]
pub enum WorkerOutcome {
    /// The stage produced a scope to forward downstream
    Success(Arc<Scope>),
    /// The record failed and is dropped; the stage continues
    Failed(TreeflowError),
    /// The processor panicked; the pipeline must exit
    Fault(Fault),
}
