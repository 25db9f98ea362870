// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Built-in components and processors
//!
//! - `io_writer` component: a line writer on stdout, stderr or a file
//! - `ticker` processor: publishes an increasing `u64` named `seq`
//! - `printer` processor: writes `seq` through an `io_writer`
//! - `delay` processor: sleeps for a fixed duration

mod processors;
mod writer;

pub use processors::{
    Delay, DelayConfig, Printer, PrinterConfig, Ticker, TickerConfig, SEQ,
};
pub use writer::{IoWriter, IoWriterConfig, LineWriter, WriterTarget};

use anyhow::Context;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::errors::TreeflowResult;
use crate::plugin::{Catalog, Component, FactoryTemplate, Processor};

/// Parse a factory's raw YAML config, empty meaning all defaults
pub fn parse_config<T: DeserializeOwned + Default>(raw: &str) -> anyhow::Result<T> {
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(raw).context("invalid config")
}

/// Register every built-in factory
pub fn register_all(catalog: &Catalog) -> TreeflowResult<()> {
    catalog.register_component(
        "io_writer",
        Arc::new(FactoryTemplate::with_sample(
            &IoWriterConfig::default(),
            "Line writer on stdout, stderr or a file, published as a LineWriter",
            |raw: &str| -> anyhow::Result<Arc<dyn Component>> {
                Ok(Arc::new(IoWriter::new(parse_config(raw)?)?))
            },
        )),
    )?;

    catalog.register_processor(
        "ticker",
        Arc::new(FactoryTemplate::with_sample(
            &TickerConfig::default(),
            "Publishes an increasing sequence number named 'seq'",
            |raw: &str| -> anyhow::Result<Arc<dyn Processor>> {
                Ok(Arc::new(Ticker::new(parse_config(raw)?)))
            },
        )),
    )?;

    catalog.register_processor(
        "printer",
        Arc::new(FactoryTemplate::with_sample(
            &PrinterConfig::default(),
            "Writes the upstream sequence number through an io_writer",
            |raw: &str| -> anyhow::Result<Arc<dyn Processor>> {
                Ok(Arc::new(Printer::new(parse_config(raw)?)))
            },
        )),
    )?;

    catalog.register_processor(
        "delay",
        Arc::new(FactoryTemplate::with_sample(
            &DelayConfig::default(),
            "Sleeps for a fixed duration before passing the record on",
            |raw: &str| -> anyhow::Result<Arc<dyn Processor>> {
                Ok(Arc::new(Delay::new(parse_config(raw)?)?))
            },
        )),
    )?;

    Ok(())
}
