// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Run command - start pipelines and wait

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;
use tracing::info;

use crate::pipeline::{Manifest, PipelineManager, PipelineState};
use crate::schedule::parse_duration;

/// Run the run command
pub async fn run(
    manifest_path: PathBuf,
    all: bool,
    duration: Option<String>,
    metrics: bool,
    verbose: bool,
) -> Result<()> {
    let manifest = Manifest::from_file(&manifest_path)?;
    let limit = duration
        .as_deref()
        .map(parse_duration)
        .transpose()
        .map_err(|e| miette::miette!("Invalid --duration: {}", e))?;

    let manager = PipelineManager::new();
    for config in manifest.pipelines {
        manager.add_pipeline(config).await?;
    }

    let started = if all {
        let names = manager.list().await;
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        manager.start(&names).await
    } else {
        manager.bootstrap().await
    };

    let pipelines = manager.pipelines().await;
    println!("{}", "Pipelines:".bold());
    for pipeline in &pipelines {
        let state = match pipeline.state() {
            PipelineState::Running => "running".green(),
            PipelineState::Idle => "idle".dimmed(),
            PipelineState::Exited => "exited".red(),
        };
        println!("  {} {}", pipeline.name(), state);
        if verbose {
            if let Some(stream) = pipeline.stream() {
                println!("      stages: {}", stream.names().join(", "));
            }
        }
    }
    println!();

    if let Err(err) = started {
        manager.stop_all().await;
        return Err(err.into());
    }

    if !pipelines.iter().any(|p| p.state() == PipelineState::Running) {
        println!("{}", "No pipeline is running.".yellow());
        return Ok(());
    }

    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => {
            println!("Press Ctrl-C to stop.");
            tokio::signal::ctrl_c()
                .await
                .map_err(|e| miette::miette!("Failed to wait for Ctrl-C: {}", e))?;
        }
    }

    info!("Stopping pipelines");
    manager.stop_all().await;
    println!("{} All pipelines stopped", "✓".green());

    if metrics {
        let snapshot = serde_json::to_string_pretty(&manager.monitor().snapshot())
            .map_err(|e| miette::miette!("Failed to render metrics: {}", e))?;
        println!("{}", snapshot);
    }

    Ok(())
}
