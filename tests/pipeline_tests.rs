// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! End-to-end pipeline behavior through the public API

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use treeflow::pipeline::Manifest;
use treeflow::plugin::{Dependency, FactoryTemplate, Inputs, Instance, ProcessorDescriptor};
use treeflow::{
    Catalog, Component, PipelineConfig, PipelineManager, PipelineState, Pipeliner, Processor,
    Record, StreamConfig, TreeflowError,
};

/// Publishes a fresh `u64` named "n" on every activation
struct Source(AtomicUsize);

#[async_trait]
impl Processor for Source {
    fn descriptor(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new().output::<u64>("n")
    }

    async fn process(&self, _inputs: Inputs) -> anyhow::Result<Option<Record>> {
        let n = self.0.fetch_add(1, Ordering::SeqCst) as u64;
        Ok(Some(Record::new().with("n", n)))
    }
}

/// Counts the upstream records it sees
struct Counter(Arc<AtomicUsize>);

#[async_trait]
impl Processor for Counter {
    fn descriptor(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new().input(Dependency::of::<u64>("n").named("n"))
    }

    async fn process(&self, inputs: Inputs) -> anyhow::Result<Option<Record>> {
        inputs.require::<u64>("n")?;
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

/// Counts activations without any inputs
struct Tick(Arc<AtomicUsize>);

#[async_trait]
impl Processor for Tick {
    fn descriptor(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new()
    }

    async fn process(&self, _inputs: Inputs) -> anyhow::Result<Option<Record>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

/// Needs a `String` published under the default name
struct NeedsLabel;

#[async_trait]
impl Processor for NeedsLabel {
    fn descriptor(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new().input(Dependency::of::<String>("label"))
    }

    async fn process(&self, _inputs: Inputs) -> anyhow::Result<Option<Record>> {
        Ok(None)
    }
}

struct Label;

#[async_trait]
impl Component for Label {
    fn instance(&self) -> Instance {
        Instance::new("", String::from("label"))
    }
}

struct Counters {
    left: Arc<AtomicUsize>,
    right: Arc<AtomicUsize>,
    ticks: Arc<AtomicUsize>,
}

fn catalog() -> (&'static Catalog, Counters) {
    let counters = Counters {
        left: Arc::new(AtomicUsize::new(0)),
        right: Arc::new(AtomicUsize::new(0)),
        ticks: Arc::new(AtomicUsize::new(0)),
    };
    let catalog: &'static Catalog = Box::leak(Box::new(Catalog::new()));

    catalog
        .register_processor(
            "source",
            Arc::new(FactoryTemplate::new("", "", |_: &str| -> anyhow::Result<Arc<dyn Processor>> {
                Ok(Arc::new(Source(AtomicUsize::new(0))))
            })),
        )
        .unwrap();
    for (name, count) in [("left", &counters.left), ("right", &counters.right)] {
        let count = Arc::clone(count);
        catalog
            .register_processor(
                name,
                Arc::new(FactoryTemplate::new("", "", move |_: &str| -> anyhow::Result<Arc<dyn Processor>> {
                    Ok(Arc::new(Counter(Arc::clone(&count))))
                })),
            )
            .unwrap();
    }
    let ticks = Arc::clone(&counters.ticks);
    catalog
        .register_processor(
            "tick",
            Arc::new(FactoryTemplate::new("", "", move |_: &str| -> anyhow::Result<Arc<dyn Processor>> {
                Ok(Arc::new(Tick(Arc::clone(&ticks))))
            })),
        )
        .unwrap();
    catalog
        .register_processor(
            "needs_label",
            Arc::new(FactoryTemplate::new("", "", |_: &str| -> anyhow::Result<Arc<dyn Processor>> {
                Ok(Arc::new(NeedsLabel))
            })),
        )
        .unwrap();
    catalog
        .register_component(
            "label",
            Arc::new(FactoryTemplate::new("", "", |_: &str| -> anyhow::Result<Arc<dyn Component>> {
                Ok(Arc::new(Label))
            })),
        )
        .unwrap();

    (catalog, counters)
}

async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}

#[tokio::test]
async fn test_empty_stream_pipeline_lifecycle() {
    let manager = PipelineManager::with_catalog(Box::leak(Box::new(Catalog::new())));
    let p1 = manager
        .add_pipeline(PipelineConfig::new("p1", StreamConfig::new("root")))
        .await
        .unwrap();
    assert!(p1.error().is_none());
    assert_eq!(p1.state(), PipelineState::Idle);

    manager.start(&["p1"]).await.unwrap();
    assert_eq!(p1.state(), PipelineState::Running);

    manager.stop(&["p1"]).await.unwrap();
    assert_eq!(p1.state(), PipelineState::Exited);
}

#[tokio::test]
async fn test_duplicate_pipeline_names_rejected() {
    let manager = PipelineManager::with_catalog(Box::leak(Box::new(Catalog::new())));
    manager
        .add_pipeline(PipelineConfig::new("p1", StreamConfig::new("root")))
        .await
        .unwrap();

    let err = manager
        .add_pipeline(PipelineConfig::new("p1", StreamConfig::new("other")))
        .await
        .unwrap_err();
    assert!(matches!(err, TreeflowError::AlreadyRegistered { .. }));
    assert_eq!(manager.list().await, vec!["p1"]);
}

#[tokio::test]
async fn test_root_output_reaches_every_child() {
    let (catalog, counters) = catalog();
    let stream = StreamConfig::new("source")
        .with_child(StreamConfig::new("left"))
        .with_child(StreamConfig::new("right").with_replica(2));
    let config = PipelineConfig::new("fanout", stream)
        .with_schedule("@every 20ms")
        .with_processor("source", "")
        .with_processor("left", "")
        .with_processor("right", "");

    let manager = PipelineManager::with_catalog(catalog);
    let pipeline = manager.add_pipeline(config).await.unwrap();
    assert!(pipeline.errors().is_empty(), "{:?}", pipeline.errors());
    manager.start(&["fanout"]).await.unwrap();

    let left = Arc::clone(&counters.left);
    let right = Arc::clone(&counters.right);
    let reached = wait_until(|| {
        left.load(Ordering::SeqCst) >= 3 && right.load(Ordering::SeqCst) >= 3
    })
    .await;
    manager.stop_all().await;

    assert!(reached, "left {} right {}", left.load(Ordering::SeqCst), right.load(Ordering::SeqCst));
    assert_eq!(pipeline.state(), PipelineState::Exited);
}

#[tokio::test]
async fn test_zero_rate_breaker_delays_every_invocation() {
    let (catalog, counters) = catalog();
    let config = PipelineConfig::new("slow", StreamConfig::new("tick"))
        .with_processor("tick", "")
        .with_breaker(10, 0.0, Duration::from_millis(200));

    let pipeline = Pipeliner::new(config, catalog);
    pipeline.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    pipeline.stop().await;

    // without the breaker an unscheduled pipeline would spin freely
    let ticks = counters.ticks.load(Ordering::SeqCst);
    assert!(ticks <= 2, "{} invocations in 300ms", ticks);
}

#[tokio::test]
async fn test_concurrent_starts_launch_once() {
    let (catalog, counters) = catalog();
    let config = PipelineConfig::new("busy", StreamConfig::new("tick"))
        .with_schedule("@every 50ms")
        .with_processor("tick", "");
    let pipeline = Arc::new(Pipeliner::new(config, catalog));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move { pipeline.start().await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(pipeline.state(), PipelineState::Running);

    tokio::time::sleep(Duration::from_millis(220)).await;
    pipeline.stop().await;

    // eight trigger loops would fire around thirty times
    let ticks = counters.ticks.load(Ordering::SeqCst);
    assert!(ticks <= 8, "{} runs", ticks);
}

#[tokio::test]
async fn test_stopped_pipeline_stays_exited() {
    let (catalog, _) = catalog();
    let manager = PipelineManager::with_catalog(catalog);
    let config = PipelineConfig::new("once", StreamConfig::new("tick")).with_processor("tick", "");
    let pipeline = manager.add_pipeline(config).await.unwrap();

    manager.start(&["once"]).await.unwrap();
    manager.stop(&["once"]).await.unwrap();

    pipeline.start().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Exited);
    assert!(matches!(
        manager.start(&["once"]).await,
        Err(TreeflowError::PipelineExited { .. })
    ));
}

#[tokio::test]
async fn test_default_named_component_satisfies_dependency() {
    let (catalog, _) = catalog();

    let missing = Pipeliner::new(
        PipelineConfig::new("p", StreamConfig::new("needs_label")).with_processor("needs_label", ""),
        catalog,
    );
    assert!(missing.errors().iter().any(TreeflowError::is_missing_dependency));

    let satisfied = Pipeliner::new(
        PipelineConfig::new("p", StreamConfig::new("needs_label"))
            .with_component("label", "")
            .with_processor("needs_label", ""),
        catalog,
    );
    assert!(satisfied.errors().is_empty(), "{:?}", satisfied.errors());
    assert!(satisfied.check_dependencies().is_empty());
}

#[tokio::test]
async fn test_builtins_write_sequence_to_file() {
    let catalog: &'static Catalog = Box::leak(Box::new(Catalog::new()));
    treeflow::builtin::register_all(catalog).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");
    let writer = format!("name: out\ntarget: file\npath: {}\n", path.display());
    let config = PipelineConfig::new("printing", StreamConfig::new("ticker").with_child(StreamConfig::new("printer")))
        .with_schedule("@every 20ms")
        .with_component("io_writer", writer)
        .with_processor("ticker", "start: 1")
        .with_processor("printer", "writer: out\nprefix: tick");

    let manager = PipelineManager::with_catalog(catalog);
    let pipeline = manager.add_pipeline(config).await.unwrap();
    assert!(pipeline.errors().is_empty(), "{:?}", pipeline.errors());

    manager.start(&["printing"]).await.unwrap();
    let written = wait_until(|| {
        std::fs::read_to_string(&path)
            .map(|text| text.lines().count() >= 2)
            .unwrap_or(false)
    })
    .await;
    manager.stop_all().await;
    assert!(written);

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().next(), Some("tick 1"));
    assert_eq!(text.lines().nth(1), Some("tick 2"));
}

#[test]
fn test_manifest_layout_survives_yaml() {
    let yaml = r#"
pipelines:
  - name: fanout
    schedule: "@every 1s"
    bootstrap: true
    components:
      - io_writer:
          name: out
          target: stderr
    processors:
      - ticker: "start: 5"
      - printer:
          writer: out
    stream:
      name: ticker
      replica: 2
      childs:
        - name: printer
          buffer_size: 4
"#;
    let manifest = Manifest::from_yaml(yaml).unwrap();
    let config = &manifest.pipelines[0];
    assert_eq!(config.stream.names(), vec!["ticker", "printer"]);
    assert_eq!(config.stream.replica, 2);
    assert_eq!(config.stream.children[0].buffer_size, 4);
    assert_eq!(config.processors[0].raw_config, "start: 5");
    assert!(config.components[0].raw_config.contains("target: stderr"));

    let again = Manifest::from_yaml(&manifest.to_yaml().unwrap()).unwrap();
    assert_eq!(again, manifest);
}
