// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! `io_writer` component

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::plugin::{Component, Instance};

/// Line-oriented output shared by every stage of a pipeline
pub trait LineWriter: Send + Sync {
    fn write_line(&self, line: &str) -> anyhow::Result<()>;
}

/// Where an `io_writer` sends its lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterTarget {
    #[default]
    Stdout,
    Stderr,
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IoWriterConfig {
    /// Registry name the writer is published under
    pub name: String,
    pub target: WriterTarget,
    /// Output file, required for the `file` target
    pub path: Option<PathBuf>,
    /// Append instead of truncating
    pub append: bool,
}

/// Writer published as `Arc<dyn LineWriter>`, opened on start
pub struct IoWriter {
    config: IoWriterConfig,
    sink: Arc<Sink>,
}

#[derive(Default)]
struct Sink {
    out: Mutex<Option<Box<dyn Write + Send>>>,
}

impl LineWriter for Sink {
    fn write_line(&self, line: &str) -> anyhow::Result<()> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let writer = out
            .as_mut()
            .context("writer is not started")?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}

impl IoWriter {
    pub fn new(config: IoWriterConfig) -> anyhow::Result<Self> {
        if config.target == WriterTarget::File && config.path.is_none() {
            anyhow::bail!("the file target needs a path");
        }
        Ok(Self {
            config,
            sink: Arc::new(Sink::default()),
        })
    }

    pub fn writer(&self) -> Arc<dyn LineWriter> {
        self.sink.clone()
    }

    fn open(&self) -> anyhow::Result<Box<dyn Write + Send>> {
        Ok(match self.config.target {
            WriterTarget::Stdout => Box::new(std::io::stdout()),
            WriterTarget::Stderr => Box::new(std::io::stderr()),
            WriterTarget::File => {
                let path = self.config.path.as_ref().context("missing path")?;
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(self.config.append)
                    .truncate(!self.config.append)
                    .open(path)
                    .with_context(|| format!("cannot open {}", path.display()))?;
                Box::new(file)
            }
        })
    }
}

#[async_trait]
impl Component for IoWriter {
    fn instance(&self) -> Instance {
        Instance::shared::<dyn LineWriter>(self.config.name.clone(), self.writer())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let out = self.open()?;
        *self.sink.out.lock().unwrap_or_else(PoisonError::into_inner) = Some(out);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(mut out) = self.sink.out.lock().unwrap_or_else(PoisonError::into_inner).take() {
            out.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_writer_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let writer = IoWriter::new(IoWriterConfig {
            target: WriterTarget::File,
            path: Some(path.clone()),
            ..Default::default()
        })
        .unwrap();

        assert!(writer.writer().write_line("early").is_err());

        writer.start().await.unwrap();
        writer.writer().write_line("one").unwrap();
        writer.writer().write_line("two").unwrap();
        writer.stop().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_file_target_requires_path() {
        let config = IoWriterConfig {
            target: WriterTarget::File,
            ..Default::default()
        };
        assert!(IoWriter::new(config).is_err());
    }

    #[test]
    fn test_instance_is_published_as_line_writer() {
        let writer = IoWriter::new(IoWriterConfig {
            name: "out".into(),
            ..Default::default()
        })
        .unwrap();

        let instance = writer.instance();
        assert_eq!(instance.name, "out");
        assert!(instance.value.downcast_ref::<Arc<dyn LineWriter>>().is_some());
    }
}
