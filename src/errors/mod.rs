// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Error types
//!
//! Every fallible operation in the engine reports a [`TreeflowError`]. Errors
//! raised by user code (processors, components, factories) arrive as
//! [`anyhow::Error`] and are folded into string messages at the boundary, which
//! keeps `TreeflowError` cheap to clone so construction errors can be replayed
//! by every `start` call.

mod group;

pub use group::ErrorGroup;

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for treeflow operations
pub type TreeflowResult<T> = Result<T, TreeflowError>;

/// Main error type for treeflow
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum TreeflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Plugin Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("No such {kind} factory: '{name}'")]
    #[diagnostic(
        code(treeflow::unknown_factory),
        help("Run 'treeflow plugins' to list the registered factories")
    )]
    UnknownFactory { kind: &'static str, name: String },

    #[error("Cannot register {kind} factory '{name}': {reason}")]
    #[diagnostic(code(treeflow::factory_registration))]
    FactoryRegistration {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("{kind} '{name}' could not be created: {message}")]
    #[diagnostic(code(treeflow::factory_failed))]
    FactoryFailed {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("Component '{name}' failed to start: {message}")]
    #[diagnostic(code(treeflow::component_start))]
    ComponentStart { name: String, message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Registry Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Value for type {type_name} name '{key}' is set twice in one scope")]
    #[diagnostic(
        code(treeflow::duplicate_value),
        help("A record may publish each (type, name) pair only once")
    )]
    DuplicateValue { type_name: String, key: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Stream Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stream stage '{stage}' has no processor with that name")]
    #[diagnostic(
        code(treeflow::unknown_processor),
        help("Every stage name in the stream layout must match a configured processor")
    )]
    UnknownProcessor { stage: String },

    #[error("Stream stage '{stage}' not found")]
    #[diagnostic(code(treeflow::stage_not_found))]
    StageNotFound { stage: String },

    #[error("Stream stage '{stage}' is defined more than once")]
    #[diagnostic(code(treeflow::duplicate_stage))]
    DuplicateStage { stage: String },

    #[error("The root stage '{stage}' {reason}")]
    #[diagnostic(code(treeflow::root_stage))]
    RootStage { stage: String, reason: String },

    #[error("Stream stage '{stage}' has an invalid replica count or buffer size: {reason}")]
    #[diagnostic(code(treeflow::invalid_stage))]
    InvalidStage { stage: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Dependency Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stream({stage}) value not found for field: {field}, type: {type_name}, name: '{key}'")]
    #[diagnostic(
        code(treeflow::missing_dependency),
        help("Add a component providing this type and name, or mark the field optional")
    )]
    MissingDependency {
        stage: String,
        field: String,
        type_name: String,
        key: String,
    },

    #[error("Processor '{processor}' has an invalid descriptor: {reason}")]
    #[diagnostic(code(treeflow::invalid_descriptor))]
    InvalidDescriptor { processor: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Schedule Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid schedule '{spec}': {reason}")]
    #[diagnostic(
        code(treeflow::invalid_schedule),
        help("Use an empty string, '@every 30s', '@hourly' or a five-field cron expression")
    )]
    InvalidSchedule { spec: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("The pipeline's name cannot be empty")]
    #[diagnostic(code(treeflow::empty_pipeline_name))]
    EmptyPipelineName,

    #[error("Pipeline: {pipeline}, Component: {component}, Type: {type_name}, Name: '{key}' is already registered")]
    #[diagnostic(code(treeflow::duplicate_component))]
    DuplicateComponent {
        pipeline: String,
        component: String,
        type_name: String,
        key: String,
    },

    #[error("Pipeline: {name} is already registered")]
    #[diagnostic(code(treeflow::already_registered))]
    AlreadyRegistered { name: String },

    #[error("Pipeline: {name} is not found")]
    #[diagnostic(code(treeflow::pipeline_not_found))]
    PipelineNotFound { name: String },

    #[error("Pipeline({name})'s state is exited")]
    #[diagnostic(
        code(treeflow::pipeline_exited),
        help("An exited pipeline cannot be started again, restart it instead")
    )]
    PipelineExited { name: String },

    #[error("Pipeline: {pipeline} {message}")]
    #[diagnostic(code(treeflow::pipeline))]
    Pipeline { pipeline: String, message: String },

    #[error("{}", .errors.join("; "))]
    #[diagnostic(code(treeflow::aggregate))]
    Aggregate { errors: Vec<String> },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stream: {stage}, {message}")]
    #[diagnostic(code(treeflow::processor_failed))]
    ProcessorFailed { stage: String, message: String },

    #[error("Stream: {stage}, return value is empty")]
    #[diagnostic(code(treeflow::empty_result))]
    EmptyResult { stage: String },

    #[error("Execution context is stopped")]
    #[diagnostic(code(treeflow::context_stopped))]
    ContextStopped,

    // ─────────────────────────────────────────────────────────────────────────
    // IO/Config Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(treeflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Unsupported config format: {path}")]
    #[diagnostic(
        code(treeflow::config_format),
        help("Supported formats: YAML (.yaml, .yml), JSON (.json), TOML (.toml)")
    )]
    ConfigFormat { path: PathBuf },

    #[error("IO error: {message}")]
    #[diagnostic(code(treeflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(treeflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(treeflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(treeflow::toml_error))]
    Toml { message: String },
}

impl From<std::io::Error> for TreeflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for TreeflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for TreeflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for TreeflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl TreeflowError {
    /// Wrap a user-code failure raised while creating a component or processor
    pub fn factory_failed(kind: &'static str, name: &str, err: &anyhow::Error) -> Self {
        Self::FactoryFailed {
            kind,
            name: name.to_string(),
            message: format!("{:#}", err),
        }
    }

    /// Wrap a processor failure for the given stage
    pub fn processor_failed(stage: &str, err: &anyhow::Error) -> Self {
        Self::ProcessorFailed {
            stage: stage.to_string(),
            message: format!("{:#}", err),
        }
    }

    /// Prefix an error with the pipeline it belongs to
    pub fn in_pipeline(pipeline: &str, err: impl std::fmt::Display) -> Self {
        Self::Pipeline {
            pipeline: pipeline.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether this is a missing-dependency diagnostic
    pub fn is_missing_dependency(&self) -> bool {
        matches!(self, Self::MissingDependency { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_dependency_message_names_field_type_and_key() {
        let err = TreeflowError::MissingDependency {
            stage: "printer".into(),
            field: "writer".into(),
            type_name: "LineWriter".into(),
            key: "stdout".into(),
        };

        let msg = err.to_string();
        assert!(msg.contains("printer"));
        assert!(msg.contains("writer"));
        assert!(msg.contains("LineWriter"));
        assert!(msg.contains("stdout"));
        assert!(err.is_missing_dependency());
    }

    #[test]
    fn test_processor_failure_keeps_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("flush batch");
        let wrapped = TreeflowError::processor_failed("sink", &err);

        assert_eq!(
            wrapped.to_string(),
            "Stream: sink, flush batch: connection refused"
        );
    }

    #[test]
    fn test_aggregate_joins_messages() {
        let err = TreeflowError::Aggregate {
            errors: vec!["first".into(), "second".into()],
        };
        assert_eq!(err.to_string(), "first; second");
    }
}
