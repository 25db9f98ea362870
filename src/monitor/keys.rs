// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Metric keys written by the engine

// Pipeline namespace
pub const STATE: &str = "state";
pub const UPTIME: &str = "uptime";
pub const NEXT_RUN_TIME: &str = "next_run_time";

// Shared by pipelines and stages
pub const START_TIME: &str = "start_time";
pub const EXIT_TIME: &str = "exit_time";
pub const LAST_START_TIME: &str = "last_start_time";
pub const LAST_END_TIME: &str = "last_end_time";
pub const RUN_TIMES: &str = "run_times";

// Stage namespace
pub const BUFFER_SIZE: &str = "buffer_size";
pub const REPLICA: &str = "replica";
pub const RUNNING_REPLICA: &str = "running_replica";
pub const BREAKER_OPEN: &str = "breaker_open";
pub const ELAPSED: &str = "elapsed";
pub const ERROR_COUNT: &str = "error_count";
pub const ERROR: &str = "error";
pub const SUCCESS_COUNT: &str = "success_count";

/// Namespace holding every pipeline
pub const PIPELINE_NAMESPACE: &str = "pipeline";
/// Namespace, below a pipeline's, holding its stages
pub const STREAM_NAMESPACE: &str = "stream";
