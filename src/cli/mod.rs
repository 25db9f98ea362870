// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for treeflow.

pub mod check;
pub mod plugins;
pub mod run;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pipeline scheduling engine
///
/// Run trees of processors on a schedule.
#[derive(Parser, Debug)]
#[clap(
    name = "treeflow",
    version,
    about = "Run trees of processors as scheduled pipelines",
    long_about = None,
    after_help = "Examples:\n\
        treeflow check pipelines.yaml            Build every pipeline and report problems\n\
        treeflow run pipelines.yaml              Start bootstrap pipelines until Ctrl-C\n\
        treeflow run pipelines.yaml --all        Start every pipeline\n\
        treeflow plugins --sample                List factories with sample configs\n\n\
        See 'treeflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipelines of a manifest until interrupted
    Run {
        /// Manifest file (.yaml, .yml, .json or .toml)
        manifest: PathBuf,

        /// Start every pipeline, not only those marked bootstrap
        #[clap(short, long)]
        all: bool,

        /// Stop after this long instead of waiting for Ctrl-C (e.g. 30s, 1m)
        #[clap(short, long, value_name = "DURATION")]
        duration: Option<String>,

        /// Print the metrics snapshot as JSON on exit
        #[clap(long)]
        metrics: bool,
    },

    /// Build every pipeline of a manifest and report construction problems
    Check {
        /// Manifest file (.yaml, .yml, .json or .toml)
        manifest: PathBuf,
    },

    /// List the registered component and processor factories
    Plugins {
        /// Show each factory's sample config
        #[clap(short, long)]
        sample: bool,
    },
}
