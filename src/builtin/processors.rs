// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Built-in processors

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::LineWriter;
use crate::plugin::{Dependency, Inputs, Processor, ProcessorDescriptor};
use crate::registry::Record;
use crate::schedule::parse_duration;

/// Registry name of the sequence number published by `ticker`
pub const SEQ: &str = "seq";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickerConfig {
    pub start: u64,
    pub step: u64,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self { start: 0, step: 1 }
    }
}

/// Publishes an increasing sequence number on every activation
pub struct Ticker {
    next: AtomicU64,
    step: u64,
}

impl Ticker {
    pub fn new(config: TickerConfig) -> Self {
        Self {
            next: AtomicU64::new(config.start),
            step: config.step,
        }
    }
}

#[async_trait]
impl Processor for Ticker {
    fn descriptor(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new().output::<u64>(SEQ)
    }

    async fn process(&self, _inputs: Inputs) -> anyhow::Result<Option<Record>> {
        let seq = self.next.fetch_add(self.step, Ordering::SeqCst);
        Ok(Some(Record::new().with(SEQ, seq)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterConfig {
    /// Registry name of the `io_writer` to print through
    pub writer: String,
    pub prefix: String,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            writer: String::new(),
            prefix: "seq".into(),
        }
    }
}

/// Writes the upstream sequence number as `<prefix> <seq>`
pub struct Printer {
    config: PrinterConfig,
}

impl Printer {
    pub fn new(config: PrinterConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Processor for Printer {
    fn descriptor(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new()
            .input(Dependency::of::<Arc<dyn LineWriter>>("writer").named(self.config.writer.clone()))
            .input(Dependency::of::<u64>("seq").named(SEQ))
    }

    async fn process(&self, inputs: Inputs) -> anyhow::Result<Option<Record>> {
        let writer = inputs.require::<Arc<dyn LineWriter>>("writer")?;
        let seq = inputs.require::<u64>("seq")?;
        writer.write_line(&format!("{} {}", self.config.prefix, seq))?;
        Ok(None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    /// Compact duration such as `250ms` or `1s`
    pub duration: String,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            duration: "100ms".into(),
        }
    }
}

/// Sleeps before letting the record continue
pub struct Delay {
    duration: Duration,
}

impl Delay {
    pub fn new(config: DelayConfig) -> anyhow::Result<Self> {
        let duration = parse_duration(&config.duration).map_err(anyhow::Error::msg)?;
        Ok(Self { duration })
    }
}

#[async_trait]
impl Processor for Delay {
    fn descriptor(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new()
    }

    async fn process(&self, _inputs: Inputs) -> anyhow::Result<Option<Record>> {
        tokio::time::sleep(self.duration).await;
        Ok(None)
    }
}
