//! Effect runner: feeds events through [`update`] and executes the commands it
//! returns against the adapters.
//!
//! Events are applied strictly in arrival order on the thread that drives the
//! runtime (`run`, `run_until_idle` or `process_pending`). Adapter calls run on
//! a small worker pool; each call gets its own thread and is raced against a
//! per-command timeout so a hung adapter cannot wedge the queue. Outcomes come
//! back as ordinary events on the same queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::cmd::{LogLevel, RuntimeCommand};
use crate::config::RuntimeConfig;
use crate::dom_facts::DomFactsProvider;
use crate::events::{decode_event, RuntimeEvent};
use crate::http::{HttpRequest, HttpTransport};
use crate::logging::LogSink;
use crate::model::RuntimeModel;
use crate::navigation::{NavigateRequest, Navigator};
use crate::policy::format_error_message;
use crate::scheduler::TickScheduler;
use crate::storage::KeyValueStore;
use crate::update::update;

const TIMEOUT_ERROR: &str = "Timeout";
const CRASH_ERROR: &str = "Adapter crashed";

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[derive(Clone)]
pub struct Adapters {
    pub storage: Arc<dyn KeyValueStore>,
    pub http: Arc<dyn HttpTransport>,
    pub navigator: Arc<dyn Navigator>,
    pub dom_facts: Arc<dyn DomFactsProvider>,
    pub log: Arc<dyn LogSink>,
}

/// Per-command adapter deadlines. A zero duration waits indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub store_get: Duration,
    pub store_set: Duration,
    pub http: Duration,
    pub navigate: Duration,
    pub dom_facts: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

impl Timeouts {
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self {
            store_get: cfg.store_get_timeout,
            store_set: cfg.store_set_timeout,
            http: cfg.http_timeout,
            navigate: cfg.navigate_timeout,
            dom_facts: cfg.dom_facts_timeout,
        }
    }
}

pub struct RuntimeDeps {
    pub adapters: Adapters,
    pub timeouts: Timeouts,
    pub clock: Arc<dyn Clock>,
    pub workers: usize,
}

impl RuntimeDeps {
    pub fn new(adapters: Adapters) -> Self {
        Self {
            adapters,
            timeouts: Timeouts::default(),
            clock: Arc::new(SystemClock),
            workers: 4,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime: stopped")]
    Stopped,
    #[error("runtime: spawn worker: {0}")]
    Spawn(#[source] std::io::Error),
}

struct Shared {
    model: RwLock<RuntimeModel>,
    stopped: AtomicBool,
}

/// Cloneable front door for feeding events to a running [`Runtime`].
#[derive(Clone)]
pub struct RuntimeHandle {
    shared: Arc<Shared>,
    events: Sender<RuntimeEvent>,
    stop: Sender<()>,
}

impl RuntimeHandle {
    pub fn dispatch(&self, event: RuntimeEvent) -> Result<(), RuntimeError> {
        if self.is_stopped() {
            return Err(RuntimeError::Stopped);
        }
        self.events.send(event).map_err(|_| RuntimeError::Stopped)
    }

    /// Decodes and dispatches a wire event. Returns `false` when the event
    /// type is unknown and was skipped.
    pub fn dispatch_json(&self, raw: &str) -> Result<bool> {
        match decode_event(raw)? {
            Some(event) => {
                self.dispatch(event)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn model(&self) -> RuntimeModel {
        self.shared.model.read().clone()
    }

    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        let _ = self.stop.send(());
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }
}

struct Executor {
    adapters: Adapters,
    timeouts: Timeouts,
    clock: Arc<dyn Clock>,
}

pub struct Runtime {
    shared: Arc<Shared>,
    executor: Arc<Executor>,
    events_tx: Sender<RuntimeEvent>,
    events_rx: Receiver<RuntimeEvent>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    jobs: Option<Sender<RuntimeCommand>>,
    worker_stop: Sender<()>,
    workers: Vec<thread::JoinHandle<()>>,
    scheduler: TickScheduler,
}

impl Runtime {
    pub fn new(deps: RuntimeDeps) -> Result<Self, RuntimeError> {
        let executor = Arc::new(Executor {
            adapters: deps.adapters,
            timeouts: deps.timeouts,
            clock: deps.clock,
        });

        let (events_tx, events_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();
        let (job_tx, job_rx) = unbounded::<RuntimeCommand>();
        let (worker_stop_tx, worker_stop_rx) = unbounded::<()>();

        let mut workers = Vec::new();
        for idx in 0..deps.workers.max(1) {
            let rx_jobs = job_rx.clone();
            let rx_stop = worker_stop_rx.clone();
            let results = events_tx.clone();
            let worker = executor.clone();
            let handle = thread::Builder::new()
                .name(format!("xeg-runtime-{idx}"))
                .spawn(move || worker.worker(rx_jobs, rx_stop, results))
                .map_err(RuntimeError::Spawn)?;
            workers.push(handle);
        }

        Ok(Self {
            shared: Arc::new(Shared {
                model: RwLock::new(RuntimeModel::new()),
                stopped: AtomicBool::new(false),
            }),
            executor,
            events_tx,
            events_rx,
            stop_tx,
            stop_rx,
            jobs: Some(job_tx),
            worker_stop: worker_stop_tx,
            workers,
            scheduler: TickScheduler::new(),
        })
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            shared: self.shared.clone(),
            events: self.events_tx.clone(),
            stop: self.stop_tx.clone(),
        }
    }

    pub fn dispatch(&self, event: RuntimeEvent) -> Result<(), RuntimeError> {
        self.handle().dispatch(event)
    }

    pub fn model(&self) -> RuntimeModel {
        self.shared.model.read().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Applies every queued event without blocking. Returns how many ran.
    pub fn process_pending(&self) -> usize {
        let mut applied = 0;
        while !self.is_stopped() {
            match self.events_rx.try_recv() {
                Ok(event) => {
                    self.apply(event);
                    applied += 1;
                }
                Err(_) => break,
            }
        }
        applied
    }

    /// Processes events until nothing is in flight and the queue is empty,
    /// or until `timeout` elapses. Returns whether the runtime settled.
    pub fn run_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_pending();
            if self.is_stopped() {
                return false;
            }
            if self.shared.model.read().is_idle() && self.events_rx.is_empty() {
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.events_rx.recv_timeout(remaining) {
                Ok(event) => self.apply(event),
                Err(RecvTimeoutError::Timeout) => return self.shared.model.read().is_idle(),
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    /// Blocks applying events until [`RuntimeHandle::stop`] is called.
    pub fn run(&mut self) {
        loop {
            crossbeam_channel::select! {
                recv(self.stop_rx) -> _ => break,
                recv(self.events_rx) -> msg => {
                    match msg {
                        Ok(event) => {
                            if self.is_stopped() {
                                break;
                            }
                            self.apply(event);
                        }
                        Err(_) => break,
                    }
                }
            }
        }
        self.shutdown();
    }

    pub fn stop(&mut self) {
        self.handle().stop();
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.scheduler.cancel_all();
        self.jobs.take();
        for _ in &self.workers {
            let _ = self.worker_stop.send(());
        }
        while let Some(handle) = self.workers.pop() {
            let _ = handle.join();
        }
    }

    fn apply(&self, event: RuntimeEvent) {
        if self.is_stopped() {
            return;
        }
        tracing::trace!(event = event.type_name(), "runtime: apply");
        let current = self.shared.model.read().clone();
        let result = update(current, event);
        *self.shared.model.write() = result.model;
        for cmd in result.cmds {
            self.interpret(cmd);
        }
    }

    fn interpret(&self, cmd: RuntimeCommand) {
        match cmd {
            RuntimeCommand::Log {
                level,
                message,
                context,
            } => {
                if let Err(err) = self.executor.adapters.log.log(level, &message, context.as_ref()) {
                    tracing::debug!(error = %format!("{err:#}"), "runtime: log sink failed");
                }
            }
            RuntimeCommand::ScheduleTick { id, interval_ms } => {
                let events = self.events_tx.clone();
                let clock = self.executor.clock.clone();
                let tick_id = id.clone();
                let scheduled = self.scheduler.schedule(
                    &id,
                    Duration::from_millis(interval_ms),
                    move || {
                        let _ = events.send(RuntimeEvent::Tick {
                            tick_id: tick_id.clone(),
                            now: clock.now_ms(),
                        });
                    },
                );
                if let Err(err) = scheduled {
                    self.log_error(
                        "[command-runtime] SCHEDULE_TICK failed",
                        json!({ "id": id, "intervalMs": interval_ms, "error": format_error_message(&err) }),
                    );
                }
            }
            RuntimeCommand::CancelTick { id } => {
                if !self.scheduler.cancel(&id) {
                    tracing::debug!(id = %id, "runtime: no tick to cancel");
                }
            }
            async_cmd => {
                let Some(jobs) = self.jobs.as_ref() else {
                    return;
                };
                if jobs.send(async_cmd).is_err() {
                    tracing::debug!("runtime: worker pool closed, command dropped");
                }
            }
        }
    }

    fn log_error(&self, message: &str, context: Value) {
        let context = match context {
            Value::Object(map) => Some(map),
            _ => None,
        };
        let _ = self
            .executor
            .adapters
            .log
            .log(LogLevel::Error, message, context.as_ref());
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Executor {
    fn worker(&self, jobs: Receiver<RuntimeCommand>, stop: Receiver<()>, results: Sender<RuntimeEvent>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(cmd) => {
                            if let Some(event) = self.execute(cmd) {
                                let _ = results.send(event);
                            }
                        }
                        Err(_) => break,
                    }
                }
            }
        }
    }

    /// Runs one async command and converts its outcome into an event.
    fn execute(&self, cmd: RuntimeCommand) -> Option<RuntimeEvent> {
        let adapters = &self.adapters;
        let event = match cmd {
            RuntimeCommand::StoreGet { request_id, key } => {
                let storage = adapters.storage.clone();
                let lookup = key.clone();
                match race(self.timeouts.store_get, "storeGet", move || storage.get(&lookup)) {
                    Ok(value) => RuntimeEvent::StorageLoaded {
                        request_id,
                        key,
                        value: value.unwrap_or(Value::Null),
                        now: self.clock.now_ms(),
                    },
                    Err(error) => RuntimeEvent::StorageFailed {
                        request_id,
                        key,
                        error,
                        now: self.clock.now_ms(),
                    },
                }
            }
            RuntimeCommand::StoreSet {
                request_id,
                key,
                value,
            } => {
                let storage = adapters.storage.clone();
                let target = key.clone();
                match race(self.timeouts.store_set, "storeSet", move || storage.set(&target, &value)) {
                    Ok(()) => RuntimeEvent::StorageSetCompleted {
                        request_id,
                        key,
                        now: self.clock.now_ms(),
                    },
                    Err(error) => RuntimeEvent::StorageSetFailed {
                        request_id,
                        key,
                        error,
                        now: self.clock.now_ms(),
                    },
                }
            }
            RuntimeCommand::TakeDomFacts { request_id, kind } => {
                let provider = adapters.dom_facts.clone();
                match race(self.timeouts.dom_facts, "domFacts", move || provider.take(kind)) {
                    Ok(facts) => RuntimeEvent::DomFactsReady {
                        request_id,
                        facts,
                        now: self.clock.now_ms(),
                    },
                    Err(error) => RuntimeEvent::DomFactsFailed {
                        request_id,
                        kind,
                        error,
                        now: self.clock.now_ms(),
                    },
                }
            }
            RuntimeCommand::HttpRequest {
                request_id,
                url,
                method,
                headers,
                body,
                response_type,
            } => {
                let http = adapters.http.clone();
                let request = HttpRequest {
                    url: url.clone(),
                    method,
                    headers,
                    body,
                    response_type,
                };
                match race(self.timeouts.http, "http", move || http.request(&request)) {
                    Ok(response) => RuntimeEvent::HttpCompleted {
                        request_id,
                        url,
                        status: response.status,
                        body: response.body,
                        now: self.clock.now_ms(),
                    },
                    Err(error) => RuntimeEvent::HttpFailed {
                        request_id,
                        url,
                        error,
                        now: self.clock.now_ms(),
                    },
                }
            }
            RuntimeCommand::Navigate {
                request_id,
                url,
                mode,
                target,
            } => {
                let navigator = adapters.navigator.clone();
                let request = NavigateRequest {
                    url: url.clone(),
                    mode,
                    target,
                };
                match race(self.timeouts.navigate, "navigate", move || navigator.navigate(&request)) {
                    Ok(()) => RuntimeEvent::NavigateCompleted {
                        request_id,
                        url,
                        now: self.clock.now_ms(),
                    },
                    Err(error) => RuntimeEvent::NavigateFailed {
                        request_id,
                        url,
                        error,
                        now: self.clock.now_ms(),
                    },
                }
            }
            other => {
                tracing::warn!(command = other.type_name(), "runtime: not an async command");
                return None;
            }
        };
        Some(event)
    }
}

/// Runs `call` on its own thread and waits at most `timeout` for it. The
/// error side is the message carried by the failure event.
fn race<T, F>(timeout: Duration, label: &str, call: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = bounded(1);
    let spawned = thread::Builder::new()
        .name(format!("xeg-adapter-{label}"))
        .spawn(move || {
            let _ = tx.send(call());
        });
    if let Err(err) = spawned {
        return Err(format!("runtime: spawn {label} adapter: {err}"));
    }

    let outcome = if timeout.is_zero() {
        rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
    } else {
        rx.recv_timeout(timeout)
    };

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(format_error_message(&err)),
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(adapter = label, ?timeout, "runtime: adapter timed out");
            Err(TIMEOUT_ERROR.to_string())
        }
        Err(RecvTimeoutError::Disconnected) => Err(CRASH_ERROR.to_string()),
    }
}
