// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Pipeline manager

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{PipelineConfig, PipelineState, Pipeliner};
use crate::errors::{ErrorGroup, TreeflowError, TreeflowResult};
use crate::monitor::Monitor;
use crate::plugin::Catalog;

/// Named set of pipelines
///
/// Batch operations apply to every name they are given and report the
/// failures of all of them together.
pub struct PipelineManager {
    catalog: &'static Catalog,
    monitor: Monitor,
    pipelines: RwLock<BTreeMap<String, Arc<Pipeliner>>>,
}

impl PipelineManager {
    /// A manager building pipelines from the process-wide catalog
    pub fn new() -> Self {
        Self::with_catalog(Catalog::global())
    }

    pub fn with_catalog(catalog: &'static Catalog) -> Self {
        Self {
            catalog,
            monitor: Monitor::new(),
            pipelines: RwLock::new(BTreeMap::new()),
        }
    }

    /// Root of every managed pipeline's metrics
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Build and register a pipeline
    ///
    /// A pipeline with construction errors is still registered; its errors
    /// surface when it is started.
    pub async fn add_pipeline(&self, config: PipelineConfig) -> TreeflowResult<Arc<Pipeliner>> {
        let mut pipelines = self.pipelines.write().await;
        self.insert(&mut pipelines, config)
    }

    fn insert(
        &self,
        pipelines: &mut BTreeMap<String, Arc<Pipeliner>>,
        config: PipelineConfig,
    ) -> TreeflowResult<Arc<Pipeliner>> {
        if pipelines.contains_key(&config.name) {
            return Err(TreeflowError::AlreadyRegistered { name: config.name });
        }

        let pipeline = Arc::new(Pipeliner::with_monitor(config, self.catalog, &self.monitor));
        if let Some(err) = pipeline.error() {
            warn!(pipeline = %pipeline.name(), "Pipeline registered with errors: {}", err);
        }
        pipelines.insert(pipeline.name().to_string(), Arc::clone(&pipeline));
        Ok(pipeline)
    }

    /// Stop and unregister pipelines
    pub async fn remove_pipeline(&self, names: &[&str]) -> TreeflowResult<()> {
        let mut pipelines = self.pipelines.write().await;
        let mut errors = ErrorGroup::new();

        for name in names {
            match pipelines.remove(*name) {
                Some(pipeline) => {
                    pipeline.stop().await;
                    info!(pipeline = %name, "Pipeline removed");
                }
                None => errors.push(not_found(name)),
            }
        }
        errors.into_result()
    }

    pub async fn find(&self, name: &str) -> Option<Arc<Pipeliner>> {
        self.pipelines.read().await.get(name).cloned()
    }

    /// Registered names in sorted order
    pub async fn list(&self) -> Vec<String> {
        self.pipelines.read().await.keys().cloned().collect()
    }

    /// Registered pipelines sorted by name
    pub async fn pipelines(&self) -> Vec<Arc<Pipeliner>> {
        self.pipelines.read().await.values().cloned().collect()
    }

    pub async fn start(&self, names: &[&str]) -> TreeflowResult<()> {
        let pipelines = self.pipelines.read().await;
        let mut errors = ErrorGroup::new();

        for name in names {
            let Some(pipeline) = pipelines.get(*name) else {
                errors.push(not_found(name));
                continue;
            };
            if pipeline.state() == PipelineState::Exited {
                errors.push(TreeflowError::PipelineExited {
                    name: name.to_string(),
                });
                continue;
            }
            if let Err(err) = pipeline.start().await {
                errors.push(TreeflowError::in_pipeline(name, err));
            }
        }
        errors.into_result()
    }

    pub async fn stop(&self, names: &[&str]) -> TreeflowResult<()> {
        let pipelines = self.pipelines.read().await;
        let mut errors = ErrorGroup::new();

        for name in names {
            match pipelines.get(*name) {
                Some(pipeline) => pipeline.stop().await,
                None => errors.push(not_found(name)),
            }
        }
        errors.into_result()
    }

    /// Stop, rebuild from the saved config and start each pipeline
    pub async fn restart(&self, names: &[&str]) -> TreeflowResult<()> {
        let mut pipelines = self.pipelines.write().await;
        let mut errors = ErrorGroup::new();

        for name in names {
            let Some(old) = pipelines.remove(*name) else {
                errors.push(not_found(name));
                continue;
            };
            old.stop().await;

            let restarted = match self.insert(&mut pipelines, old.config().clone()) {
                Ok(pipeline) => pipeline.start().await,
                Err(err) => Err(err),
            };
            match restarted {
                Ok(()) => info!(pipeline = %name, "Pipeline restarted"),
                Err(err) => errors.push(TreeflowError::in_pipeline(name, err)),
            }
        }
        errors.into_result()
    }

    /// Start every pipeline whose config asks to start with the process
    pub async fn bootstrap(&self) -> TreeflowResult<()> {
        let names: Vec<String> = self
            .pipelines()
            .await
            .iter()
            .filter(|p| p.config().bootstrap)
            .map(|p| p.name().to_string())
            .collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        self.start(&names).await
    }

    pub async fn stop_all(&self) {
        for pipeline in self.pipelines().await {
            pipeline.stop().await;
        }
    }
}

impl Default for PipelineManager {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(name: &str) -> TreeflowError {
    TreeflowError::PipelineNotFound {
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamConfig;

    fn manager() -> PipelineManager {
        PipelineManager::with_catalog(Box::leak(Box::new(Catalog::new())))
    }

    fn config(name: &str) -> PipelineConfig {
        PipelineConfig::new(name, StreamConfig::new("root"))
    }

    #[tokio::test]
    async fn test_add_twice_fails_and_keeps_first() {
        let manager = manager();
        let first = manager.add_pipeline(config("p1")).await.unwrap();

        let err = manager.add_pipeline(config("p1")).await.unwrap_err();
        assert_eq!(err.to_string(), "Pipeline: p1 is already registered");

        let found = manager.find("p1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &found));
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let manager = manager();
        for name in ["zeta", "alpha", "mid"] {
            manager.add_pipeline(config(name)).await.unwrap();
        }

        assert_eq!(manager.list().await, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_batch_reports_every_missing_name() {
        let manager = manager();
        manager.add_pipeline(config("p1")).await.unwrap();

        let err = manager.start(&["a", "p1", "b"]).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("a is not found"));
        assert!(message.contains("b is not found"));

        let p1 = manager.find("p1").await.unwrap();
        assert_eq!(p1.state(), PipelineState::Running);
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_start_after_stop_requires_restart() {
        let manager = manager();
        manager.add_pipeline(config("p1")).await.unwrap();

        manager.start(&["p1"]).await.unwrap();
        manager.stop(&["p1"]).await.unwrap();
        let err = manager.start(&["p1"]).await.unwrap_err();
        assert!(matches!(err, TreeflowError::PipelineExited { .. }));

        manager.restart(&["p1"]).await.unwrap();
        let p1 = manager.find("p1").await.unwrap();
        assert_eq!(p1.state(), PipelineState::Running);
        manager.stop_all().await;
        assert_eq!(p1.state(), PipelineState::Exited);
    }

    #[tokio::test]
    async fn test_remove_stops_and_unregisters() {
        let manager = manager();
        let p1 = manager.add_pipeline(config("p1")).await.unwrap();
        manager.start(&["p1"]).await.unwrap();

        manager.remove_pipeline(&["p1"]).await.unwrap();
        assert_eq!(p1.state(), PipelineState::Exited);
        assert!(manager.find("p1").await.is_none());
        assert!(manager.remove_pipeline(&["p1"]).await.is_err());
    }

    #[tokio::test]
    async fn test_bootstrap_starts_flagged_pipelines() {
        let manager = manager();
        let mut eager = config("eager");
        eager.bootstrap = true;
        manager.add_pipeline(eager).await.unwrap();
        manager.add_pipeline(config("lazy")).await.unwrap();

        manager.bootstrap().await.unwrap();

        assert_eq!(manager.find("eager").await.unwrap().state(), PipelineState::Running);
        assert_eq!(manager.find("lazy").await.unwrap().state(), PipelineState::Idle);
        manager.stop_all().await;
    }
}
