// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Check command - build pipelines and report problems

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::pipeline::{Manifest, Pipeliner};
use crate::plugin::Catalog;

/// Run the check command
pub async fn run(manifest_path: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Checking pipelines...".bold());
    println!();

    if !manifest_path.exists() {
        return Err(miette::miette!(
            "Manifest file not found: {}",
            manifest_path.display()
        ));
    }

    let manifest = match Manifest::from_file(&manifest_path) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("  {} Failed to parse manifest", "✗".red());
            eprintln!();
            return Err(e.into());
        }
    };

    if manifest.pipelines.is_empty() {
        println!("  {} No pipelines defined", "⚠".yellow());
        return Ok(());
    }

    let mut failed = 0;
    for config in manifest.pipelines {
        let pipeline = Pipeliner::new(config, Catalog::global());
        let errors = pipeline.errors();

        if errors.is_empty() {
            println!("  {} {}", "✓".green(), pipeline.name());
        } else {
            failed += 1;
            println!("  {} {}", "✗".red(), pipeline.name());
            for error in errors {
                println!("      {}", error);
            }
        }

        if verbose {
            if let Some(stream) = pipeline.stream() {
                for node in stream.nodes() {
                    println!(
                        "      {} (replica {}, buffer {})",
                        node.name().dimmed(),
                        node.replica(),
                        node.buffer_size()
                    );
                }
            }
        }
    }

    println!();
    if failed > 0 {
        return Err(miette::miette!("{} pipeline(s) have problems", failed));
    }

    println!("{}", "All pipelines are runnable".green().bold());
    Ok(())
}
