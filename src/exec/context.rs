// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Execution context
//!
//! One live run of a stream tree. Every stage gets `replica` workers reading
//! from its input queue. A stage with children owns an output queue that a
//! broadcast task copies into each child's input queue; a leaf discards its
//! results. The whole graph shares one cancellation token and one circuit
//! breaker.

use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{CircuitBreaker, Fault, WorkerOutcome, CONTEXT_KEY, MONITOR_KEY};
use crate::errors::{TreeflowError, TreeflowResult};
use crate::monitor::{self, Monitor};
use crate::registry::Scope;
use crate::stream::{Stage, Stream, StreamNode};

type Queue = mpsc::Sender<Arc<Scope>>;
type TraceSlot = Arc<Mutex<Option<String>>>;

tokio::task_local! {
    static PANIC_TRACE: TraceSlot;
}

/// Chain a panic hook that records the backtrace of a panicking invocation
///
/// The hook runs on the panicking thread while the invocation task is being
/// polled, so the task-local slot is visible there. Panics outside an
/// invocation only reach the previous hook.
fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let _ = PANIC_TRACE.try_with(|slot| {
                *lock(&**slot) = Some(Backtrace::force_capture().to_string());
            });
            previous(info);
        }));
    });
}
type SharedInput = Arc<tokio::sync::Mutex<mpsc::Receiver<Arc<Scope>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A concurrent run of one stream tree
pub struct ExecContext {
    pipeline: Arc<str>,
    scope: Arc<Scope>,
    stream: Stream,
    monitor: Monitor,
    breaker: Arc<CircuitBreaker>,
    token: CancellationToken,
    input: Mutex<Option<Queue>>,
    pending: Mutex<Option<mpsc::Receiver<Arc<Scope>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    faults_tx: mpsc::UnboundedSender<Fault>,
    faults_rx: Mutex<Option<mpsc::UnboundedReceiver<Fault>>>,
}

impl ExecContext {
    /// Prepare a run of `stream` below `parent`
    ///
    /// `monitor` is the namespace stage metrics are written under and `token`
    /// should be a child of the pipeline's token.
    pub fn new(
        pipeline: &str,
        parent: &Arc<Scope>,
        stream: &Stream,
        monitor: Monitor,
        breaker: CircuitBreaker,
        token: CancellationToken,
    ) -> Self {
        let mut scope = Scope::child(parent);
        scope.set(CONTEXT_KEY, token.clone());

        let (input, pending) = mpsc::channel(stream.root().buffer_size().max(1));
        let (faults_tx, faults_rx) = mpsc::unbounded_channel();

        Self {
            pipeline: Arc::from(pipeline),
            scope: Arc::new(scope),
            stream: stream.clone(),
            monitor,
            breaker: Arc::new(breaker),
            token,
            input: Mutex::new(Some(input)),
            pending: Mutex::new(Some(pending)),
            tasks: Mutex::new(Vec::new()),
            faults_tx,
            faults_rx: Mutex::new(Some(faults_rx)),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Receiver of worker faults; can be taken once
    pub fn take_faults(&self) -> Option<mpsc::UnboundedReceiver<Fault>> {
        lock(&self.faults_rx).take()
    }

    /// Spawn the worker graph
    pub fn start(&self) -> TreeflowResult<()> {
        if self.is_stopped() {
            return Err(TreeflowError::ContextStopped);
        }
        install_panic_hook();

        let Some(input) = lock(&self.pending).take() else {
            return Ok(());
        };

        let mut tasks = Vec::new();
        self.spawn_node(self.stream.root(), input, &mut tasks);
        debug!(pipeline = %self.pipeline, tasks = tasks.len(), "Execution context started");
        lock(&self.tasks).extend(tasks);
        Ok(())
    }

    /// Cancel the run and wait for every worker to exit
    pub async fn stop(&self) {
        self.token.cancel();
        lock(&self.input).take();

        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(err) = task.await {
                error!(pipeline = %self.pipeline, error = %err, "Stream task ended abnormally");
            }
        }
        debug!(pipeline = %self.pipeline, "Execution context stopped");
    }

    /// Push one trigger into the root stage
    pub async fn run(&self) {
        if self.is_stopped() {
            return;
        }
        let Some(input) = lock(&self.input).clone() else {
            return;
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                lock(&self.input).take();
            }
            sent = input.send(Arc::clone(&self.scope)) => {
                if sent.is_err() {
                    debug!(pipeline = %self.pipeline, "Root input is closed");
                }
            }
        }
    }

    fn spawn_node(
        &self,
        node: &StreamNode,
        input: mpsc::Receiver<Arc<Scope>>,
        tasks: &mut Vec<JoinHandle<()>>,
    ) {
        let stage_monitor = self.monitor.with(node.name());
        stage_monitor.set(monitor::BUFFER_SIZE, node.buffer_size() as i64);
        stage_monitor.set(monitor::REPLICA, node.replica() as i64);

        let input: SharedInput = Arc::new(tokio::sync::Mutex::new(input));
        let (output, forward) = if node.is_leaf() {
            (None, None)
        } else {
            let (tx, rx) = mpsc::channel(node.buffer_size().max(1));
            (Some(Arc::new(OutputQueue::new(tx, node.replica()))), Some(rx))
        };

        for _ in 0..node.replica() {
            let worker = Worker {
                pipeline: Arc::clone(&self.pipeline),
                stage: node.stage().clone(),
                monitor: stage_monitor.clone(),
                breaker: Arc::clone(&self.breaker),
                token: self.token.clone(),
                input: Arc::clone(&input),
                output: output.clone(),
                faults: self.faults_tx.clone(),
            };
            tasks.push(tokio::spawn(worker.run()));
        }

        if let Some(rx) = forward {
            let mut children = Vec::with_capacity(node.children().len());
            for child in node.children() {
                let (tx, child_input) = mpsc::channel(1);
                children.push(tx);
                self.spawn_node(child, child_input, tasks);
            }
            tasks.push(tokio::spawn(broadcast(rx, children, self.token.clone())));
        }
    }
}

/// Output queue shared by the workers of one stage
///
/// Each worker holds one claim; the queue closes when the last claim is
/// released, however many workers race to exit.
struct OutputQueue {
    sender: Mutex<Option<Queue>>,
    claims: AtomicUsize,
}

impl OutputQueue {
    fn new(sender: Queue, workers: usize) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
            claims: AtomicUsize::new(workers),
        }
    }

    fn sender(&self) -> Option<Queue> {
        lock(&self.sender).clone()
    }

    fn release(&self) {
        if self.claims.fetch_sub(1, Ordering::AcqRel) == 1 {
            lock(&self.sender).take();
        }
    }
}

struct Worker {
    pipeline: Arc<str>,
    stage: Stage,
    monitor: Monitor,
    breaker: Arc<CircuitBreaker>,
    token: CancellationToken,
    input: SharedInput,
    output: Option<Arc<OutputQueue>>,
    faults: mpsc::UnboundedSender<Fault>,
}

impl Worker {
    async fn run(self) {
        self.monitor.set(monitor::START_TIME, Local::now());
        self.monitor.add(monitor::RUNNING_REPLICA, 1);
        let mut elapsed = Duration::ZERO;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => None,
                scope = recv(&self.input) => scope,
            };
            let Some(scope) = next else {
                break;
            };

            if !self.breaker.ready() {
                self.monitor.add(monitor::BREAKER_OPEN, 1);
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep(self.breaker.delay()) => {}
                }
                self.monitor.add(monitor::BREAKER_OPEN, -1);
            }

            self.monitor.set(monitor::LAST_START_TIME, Local::now());
            self.monitor.add(monitor::RUN_TIMES, 1);
            let started = Instant::now();

            let outcome = self.invoke(scope).await;

            elapsed += started.elapsed();
            self.monitor.set(monitor::ELAPSED, elapsed);
            self.monitor.set(monitor::LAST_END_TIME, Local::now());

            match outcome {
                WorkerOutcome::Success(scope) => {
                    self.breaker.success();
                    self.monitor.add(monitor::SUCCESS_COUNT, 1);
                    if !self.forward(scope).await {
                        break;
                    }
                }
                WorkerOutcome::Failed(err) => {
                    error!(pipeline = %self.pipeline, stage = %self.stage.name(), "{}", err);
                    self.monitor.add(monitor::ERROR_COUNT, 1);
                    self.monitor.set(monitor::ERROR, err.to_string());
                    self.breaker.fail();
                }
                WorkerOutcome::Fault(fault) => {
                    self.monitor.add(monitor::ERROR_COUNT, 1);
                    self.monitor.set(monitor::ERROR, fault.to_string());
                    self.breaker.fail();
                    let _ = self.faults.send(fault);
                    self.token.cancel();
                    break;
                }
            }
        }

        self.monitor.add(monitor::RUNNING_REPLICA, -1);
        self.monitor.set(monitor::EXIT_TIME, Local::now());
        if let Some(output) = &self.output {
            output.release();
        }
    }

    /// Invoke the stage in its own task so a panic surfaces as a fault
    async fn invoke(&self, scope: Arc<Scope>) -> WorkerOutcome {
        let mut invocation = Scope::child(&scope);
        invocation.set(MONITOR_KEY, self.monitor.clone());

        let stage = self.stage.clone();
        let trace = TraceSlot::default();
        let task = tokio::spawn(PANIC_TRACE.scope(Arc::clone(&trace), async move {
            stage.invoke(Arc::new(invocation)).await
        }));

        match task.await {
            Ok(Ok(scope)) => WorkerOutcome::Success(scope),
            Ok(Err(err)) => WorkerOutcome::Failed(err),
            Err(err) => WorkerOutcome::Fault(Fault {
                stage: self.stage.name().to_string(),
                message: panic_message(err),
                backtrace: lock(&*trace)
                    .take()
                    .unwrap_or_else(|| "backtrace unavailable".into()),
            }),
        }
    }

    /// Hand a result to the children; `false` once the context is cancelled
    async fn forward(&self, scope: Arc<Scope>) -> bool {
        let Some(output) = &self.output else {
            return true;
        };
        let Some(sender) = output.sender() else {
            return false;
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            sent = sender.send(scope) => sent.is_ok(),
        }
    }
}

async fn recv(input: &SharedInput) -> Option<Arc<Scope>> {
    input.lock().await.recv().await
}

/// Copy every record to every child queue
///
/// After cancellation the remaining input is drained and dropped so that
/// upstream workers never block; the child queues close when this returns.
async fn broadcast(mut input: mpsc::Receiver<Arc<Scope>>, children: Vec<Queue>, token: CancellationToken) {
    let mut forwarding = true;

    while let Some(scope) = input.recv().await {
        if !forwarding {
            continue;
        }
        for child in &children {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    forwarding = false;
                    break;
                }
                // a child whose workers are gone just misses the record
                _ = child.send(Arc::clone(&scope)) => {}
            }
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".into())
}
