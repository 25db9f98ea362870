// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Plugins command - list registered factories

use colored::Colorize;
use miette::Result;

use crate::plugin::Catalog;

/// Run the plugins command
pub async fn run(sample: bool, _verbose: bool) -> Result<()> {
    let catalog = Catalog::global();

    println!("{}", "Components:".bold());
    for (name, factory) in catalog.list_components() {
        println!("  {} - {}", name.cyan(), factory.description());
        if sample {
            print_sample(&factory.sample_config());
        }
    }

    println!();
    println!("{}", "Processors:".bold());
    for (name, factory) in catalog.list_processors() {
        println!("  {} - {}", name.cyan(), factory.description());
        if sample {
            print_sample(&factory.sample_config());
        }
    }

    Ok(())
}

fn print_sample(sample: &str) {
    for line in sample.lines() {
        println!("      {}", line.dimmed());
    }
}
