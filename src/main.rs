// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! treeflow - Pipeline Scheduling Engine
//!
//! Run trees of processors as scheduled pipelines.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use treeflow::cli::{Cli, Commands};
use treeflow::plugin::Catalog;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "treeflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    treeflow::builtin::register_all(Catalog::global())?;

    let cli = Cli::parse();

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            manifest,
            all,
            duration,
            metrics,
        } => treeflow::cli::run::run(manifest, all, duration, metrics, cli.verbose).await,
        Commands::Check { manifest } => treeflow::cli::check::run(manifest, cli.verbose).await,
        Commands::Plugins { sample } => treeflow::cli::plugins::run(sample, cli.verbose).await,
    }
}
