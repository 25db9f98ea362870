// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Pipeline lifecycle
//!
//! A [`Pipeliner`] is built from a [`PipelineConfig`] in one pass that never
//! fails outright: every construction problem is recorded and `start` refuses
//! to run while any exist. A started pipeline runs two background loops, one
//! refreshing the uptime metric and one firing the stream on schedule, until
//! it is stopped or a processor panics.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{PipelineConfig, PipelineState};
use crate::errors::{ErrorGroup, TreeflowError, TreeflowResult};
use crate::exec::{CircuitBreaker, ExecContext, Fault, CONTEXT_KEY, MONITOR_KEY};
use crate::monitor::{self, Monitor};
use crate::plugin::{Catalog, Component, Processor};
use crate::registry::Scope;
use crate::schedule::{self, Immediate, Schedule};
use crate::stream::{DependencyChecker, Stream};

/// A constructed component with the config it was built from
#[derive(Clone)]
pub struct ComponentEntry {
    pub name: String,
    pub raw_config: String,
    pub component: Arc<dyn Component>,
}

/// A constructed processor with the config it was built from
#[derive(Clone)]
pub struct ProcessorEntry {
    pub name: String,
    pub raw_config: String,
    pub processor: Arc<dyn Processor>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn transition(state: &RwLock<PipelineState>, monitor: &Monitor, next: PipelineState) {
    *state.write().unwrap_or_else(PoisonError::into_inner) = next;
    monitor.set(monitor::STATE, next.to_string());
}

/// One pipeline: components, processors, stream tree, schedule and state
pub struct Pipeliner {
    config: PipelineConfig,
    components: Vec<ComponentEntry>,
    processors: Vec<ProcessorEntry>,
    stream: Option<Stream>,
    schedule: Arc<dyn Schedule>,
    scope: Arc<Scope>,
    monitor: Monitor,
    token: CancellationToken,
    state: Arc<RwLock<PipelineState>>,
    stopped: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    errors: Vec<TreeflowError>,
    start_error: Mutex<Option<TreeflowError>>,
}

impl Pipeliner {
    /// Build a pipeline with its own metrics namespace
    pub fn new(config: PipelineConfig, catalog: &Catalog) -> Self {
        Self::with_monitor(config, catalog, &Monitor::new())
    }

    /// Build a pipeline writing metrics under `parent`
    pub fn with_monitor(config: PipelineConfig, catalog: &Catalog, parent: &Monitor) -> Self {
        let name = config.name.clone();
        let monitor = parent.with(monitor::PIPELINE_NAMESPACE).with(&name);
        let token = CancellationToken::new();
        let mut errors = Vec::new();

        if name.is_empty() {
            errors.push(TreeflowError::EmptyPipelineName);
        }

        let mut components = Vec::new();
        for entry in &config.components {
            match catalog.new_component(&entry.name, &entry.raw_config) {
                Ok(component) => components.push(ComponentEntry {
                    name: entry.name.clone(),
                    raw_config: entry.raw_config.clone(),
                    component,
                }),
                Err(err) => record(&mut errors, &name, err),
            }
        }

        let mut processors = Vec::new();
        let mut by_name: HashMap<String, Arc<dyn Processor>> = HashMap::new();
        for entry in &config.processors {
            if by_name.contains_key(&entry.name) {
                errors.push(TreeflowError::in_pipeline(
                    &name,
                    format!("processor '{}' is declared more than once", entry.name),
                ));
                continue;
            }
            match catalog.new_processor(&entry.name, &entry.raw_config) {
                Ok(processor) => {
                    by_name.insert(entry.name.clone(), Arc::clone(&processor));
                    processors.push(ProcessorEntry {
                        name: entry.name.clone(),
                        raw_config: entry.raw_config.clone(),
                        processor,
                    });
                }
                Err(err) => record(&mut errors, &name, err),
            }
        }

        let built = if config.processors.is_empty() {
            Stream::unbound(&config.stream)
        } else {
            Stream::new(&config.stream, &by_name)
        };
        let stream = match built {
            Ok(stream) => Some(stream),
            Err(err) => {
                record(&mut errors, &name, err);
                None
            }
        };

        let schedule: Arc<dyn Schedule> = match schedule::parse(&config.schedule) {
            Ok(schedule) => schedule,
            Err(err) => {
                record(&mut errors, &name, err);
                Arc::new(Immediate)
            }
        };

        let mut scope = Scope::root();
        scope.set(MONITOR_KEY, monitor.clone());
        scope.set(CONTEXT_KEY, token.clone());

        let mut seen = HashSet::new();
        for entry in &components {
            let instance = entry.component.instance();
            if !seen.insert(instance.key()) {
                errors.push(TreeflowError::DuplicateComponent {
                    pipeline: name.clone(),
                    component: entry.name.clone(),
                    type_name: instance.ty.name().to_string(),
                    key: instance.name.clone(),
                });
                continue;
            }
            scope.set_value(instance.key(), instance.value);
        }

        if let Some(stream) = &stream {
            errors.extend(DependencyChecker::check(stream, &scope));
        }

        monitor.set(monitor::STATE, PipelineState::Idle.to_string());
        if !errors.is_empty() {
            debug!(pipeline = %name, errors = errors.len(), "Pipeline built with errors");
        }

        Self {
            config,
            components,
            processors,
            stream,
            schedule,
            scope: Arc::new(scope),
            monitor,
            token,
            state: Arc::new(RwLock::new(PipelineState::Idle)),
            stopped: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            errors,
            start_error: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn components(&self) -> &[ComponentEntry] {
        &self.components
    }

    pub fn processors(&self) -> &[ProcessorEntry] {
        &self.processors
    }

    /// The stream tree, absent when it could not be built
    pub fn stream(&self) -> Option<&Stream> {
        self.stream.as_ref()
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Errors recorded while building the pipeline
    pub fn errors(&self) -> &[TreeflowError] {
        &self.errors
    }

    /// Re-run the dependency check against the pipeline's root scope
    pub fn check_dependencies(&self) -> Vec<TreeflowError> {
        let scope = Scope::child(&self.scope);
        match &self.stream {
            Some(stream) => DependencyChecker::check(stream, &scope),
            None => Vec::new(),
        }
    }

    /// Every construction error plus the last start failure, as one error
    pub fn error(&self) -> Option<TreeflowError> {
        let mut group: ErrorGroup = self.errors.iter().cloned().collect();
        if let Some(err) = lock(&self.start_error).clone() {
            group.push(err);
        }
        group.into_result().err()
    }

    /// Move from `Idle` to `Running`
    ///
    /// Returns the recorded construction errors if there are any. Calls made
    /// while the pipeline is already running or has exited do nothing.
    pub async fn start(&self) -> TreeflowResult<()> {
        if !self.errors.is_empty() {
            let group: ErrorGroup = self.errors.iter().cloned().collect();
            return group.into_result();
        }

        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if *state != PipelineState::Idle {
                return Ok(());
            }
            *state = PipelineState::Running;
        }
        self.monitor.set(monitor::STATE, PipelineState::Running.to_string());

        let mut started = 0;
        if let Err(err) = self.launch(&mut started).await {
            error!(pipeline = %self.name(), "Pipeline failed to start: {}", err);
            *lock(&self.start_error) = Some(err.clone());
            self.token.cancel();
            self.stop_components(&self.components[..started]).await;
            transition(&self.state, &self.monitor, PipelineState::Exited);
            return Err(err);
        }

        // a stop that ran while components were starting saw them stopped
        if self.stopped.load(Ordering::SeqCst) {
            self.stop_components(&self.components).await;
            return Ok(());
        }

        info!(pipeline = %self.name(), schedule = %self.config.schedule, "Pipeline started");
        Ok(())
    }

    /// Start components and the trigger loop; `started` counts the components
    /// that came up, so a failure can stop exactly those
    async fn launch(&self, started: &mut usize) -> TreeflowResult<()> {
        for entry in &self.components {
            entry
                .component
                .start()
                .await
                .map_err(|e| TreeflowError::ComponentStart {
                    name: entry.name.clone(),
                    message: format!("{:#}", e),
                })?;
            *started += 1;
        }

        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| TreeflowError::in_pipeline(self.name(), "has no stream"))?;

        let breaker = CircuitBreaker::new(
            self.config.circuit_breaker_samples,
            self.config.circuit_breaker_rate,
            self.config.circuit_breaker_delay(),
        );
        let ctx = Arc::new(ExecContext::new(
            self.name(),
            &self.scope,
            stream,
            self.monitor.with(monitor::STREAM_NAMESPACE),
            breaker,
            self.token.child_token(),
        ));
        let faults = ctx.take_faults().ok_or(TreeflowError::ContextStopped)?;
        ctx.start()?;

        let trigger = TriggerLoop {
            name: self.name().to_string(),
            schedule: Arc::clone(&self.schedule),
            ctx,
            monitor: self.monitor.clone(),
            token: self.token.clone(),
            state: Arc::clone(&self.state),
            faults,
        };

        let mut tasks = lock(&self.tasks);
        tasks.push(tokio::spawn(track_uptime(
            self.monitor.clone(),
            self.token.clone(),
        )));
        tasks.push(tokio::spawn(trigger.run()));
        Ok(())
    }

    /// Stop the loops and components and move to `Exited`
    ///
    /// Only the first call does anything.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.token.cancel();

        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(err) = task.await {
                error!(pipeline = %self.name(), error = %err, "Pipeline task ended abnormally");
            }
        }

        self.stop_components(&self.components).await;

        transition(&self.state, &self.monitor, PipelineState::Exited);
        info!(pipeline = %self.name(), "Pipeline stopped");
    }

    async fn stop_components(&self, entries: &[ComponentEntry]) {
        for entry in entries.iter().rev() {
            if let Err(err) = entry.component.stop().await {
                error!(
                    pipeline = %self.name(),
                    component = %entry.name,
                    "Failed to stop component: {:#}",
                    err
                );
            }
        }
    }
}

impl std::fmt::Debug for Pipeliner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeliner")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .field("errors", &self.errors.len())
            .finish()
    }
}

/// Record a construction error, flattening aggregates
fn record(errors: &mut Vec<TreeflowError>, pipeline: &str, err: TreeflowError) {
    match err {
        TreeflowError::Aggregate { errors: messages } => errors.extend(
            messages
                .into_iter()
                .map(|message| TreeflowError::in_pipeline(pipeline, message)),
        ),
        err => errors.push(TreeflowError::in_pipeline(pipeline, err)),
    }
}

async fn track_uptime(monitor: Monitor, token: CancellationToken) {
    let since = Instant::now();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                monitor.set(monitor::UPTIME, since.elapsed());
            }
        }
    }
}

struct TriggerLoop {
    name: String,
    schedule: Arc<dyn Schedule>,
    ctx: Arc<ExecContext>,
    monitor: Monitor,
    token: CancellationToken,
    state: Arc<RwLock<PipelineState>>,
    faults: mpsc::UnboundedReceiver<Fault>,
}

impl TriggerLoop {
    async fn run(mut self) {
        self.monitor.set(monitor::START_TIME, Local::now());
        let mut next = self.schedule.next(Local::now());
        self.monitor.set(monitor::NEXT_RUN_TIME, next);

        loop {
            let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                Some(fault) = self.faults.recv() => {
                    error!(
                        pipeline = %self.name,
                        stage = %fault.stage,
                        "Pipeline: {}, Panic: {}, Stack: {}",
                        self.name,
                        fault.message,
                        fault.backtrace
                    );
                    transition(&self.state, &self.monitor, PipelineState::Exited);
                    self.token.cancel();
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    let now = Local::now();
                    next = self.schedule.next(now);
                    self.monitor.set(monitor::NEXT_RUN_TIME, next);
                    self.monitor.set(monitor::LAST_START_TIME, now);

                    self.ctx.run().await;

                    self.monitor.add(monitor::RUN_TIMES, 1);
                    self.monitor.set(monitor::LAST_END_TIME, Local::now());
                }
            }
        }

        self.ctx.stop().await;
        self.monitor.set(monitor::EXIT_TIME, Local::now());
        debug!(pipeline = %self.name, "Trigger loop exited");
    }
}
