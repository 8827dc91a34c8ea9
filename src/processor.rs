//! The stream processor keeps a [`DataStore`] in sync with the server's
//! event stream.
//!
//! One background task owns the connection from open to teardown:
//!
//! ```text
//! Idle -> Connecting -> AwaitingInitialSnapshot -> Live <-> Reconnecting
//!              \________________________________________-> PermanentlyFailed
//! ```
//!
//! Recoverable failures (network errors, HTTP 400/408/429/5xx) schedule a
//! reconnect after an exponential, jittered delay. Any other 4xx stops the
//! processor for good. Either way the ready signal is released exactly once,
//! so callers waiting on startup are never left hanging.
//!
//! If the store reports that it came back from an outage and may have missed
//! updates, the stream is torn down and reopened so the next `put` replaces
//! the store contents from scratch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, USER_AGENT};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backoff::Backoff;
use crate::config::Config;
use crate::diagnostics::ConnectionAttemptRecorder;
use crate::error::{Result, StreamError};
use crate::events::StreamEvent;
use crate::model::Snapshot;
use crate::requestor::{HttpRequestor, Requestor};
use crate::sse::{EventParser, SseEvent};
use crate::store::{DataStore, StoreStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    Connecting,
    AwaitingInitialSnapshot,
    Live,
    Reconnecting,
    PermanentlyFailed,
    Closed,
}

impl ProcessorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessorState::PermanentlyFailed | ProcessorState::Closed)
    }
}

/// Completes once the first full data set has been stored, or once the
/// processor has given up. Check [`StreamProcessor::initialized`] afterwards
/// to tell the two apart.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    rx: watch::Receiver<bool>,
}

impl ReadySignal {
    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(mut self) {
        let _ = self.rx.wait_for(|ready| *ready).await;
    }

    /// Returns `false` if the signal did not fire within `timeout`.
    pub async fn wait_timeout(self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

/// State shared between the processor handle and its worker task.
struct Signals {
    initialized: AtomicBool,
    ready_tx: watch::Sender<bool>,
    state_tx: watch::Sender<ProcessorState>,
}

impl Signals {
    fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            ready_tx: watch::channel(false).0,
            state_tx: watch::channel(ProcessorState::Idle).0,
        }
    }

    fn state(&self) -> ProcessorState {
        *self.state_tx.borrow()
    }

    /// Terminal states are sticky.
    fn set_state(&self, next: ProcessorState) {
        self.state_tx.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            tracing::debug!(from = ?*current, to = ?next, "stream processor state");
            *current = next;
            true
        });
    }

    fn release_ready(&self) {
        self.ready_tx.send_if_modified(|ready| !std::mem::replace(ready, true));
    }

    fn ready_signal(&self) -> ReadySignal {
        ReadySignal {
            rx: self.ready_tx.subscribe(),
        }
    }
}

pub struct StreamProcessor {
    config: Arc<Config>,
    client: reqwest::Client,
    store: Arc<dyn DataStore>,
    requestor: Arc<dyn Requestor>,
    recorder: Arc<ConnectionAttemptRecorder>,
    signals: Arc<Signals>,
    close_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamProcessor {
    /// Creates a processor that pulls indirect updates over HTTP from
    /// `config.base_uri`.
    pub fn new(config: Config, store: Arc<dyn DataStore>) -> Self {
        let requestor = Arc::new(HttpRequestor::new(&config));
        Self {
            client: config.http_client(),
            config: Arc::new(config),
            store,
            requestor,
            recorder: Arc::new(ConnectionAttemptRecorder::new()),
            signals: Arc::new(Signals::new()),
            close_tx: watch::channel(false).0,
            worker: Mutex::new(None),
        }
    }

    pub fn with_requestor(mut self, requestor: Arc<dyn Requestor>) -> Self {
        self.requestor = requestor;
        self
    }

    /// Shares a recorder with a diagnostics reporter.
    pub fn with_recorder(mut self, recorder: Arc<ConnectionAttemptRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Launches the background worker and returns immediately. Calling it
    /// again returns another handle on the same ready signal.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn start(&self) -> ReadySignal {
        let mut worker = self.worker.lock();
        if worker.is_none() && !*self.close_tx.borrow() {
            let task = Worker {
                config: Arc::clone(&self.config),
                client: self.client.clone(),
                store: Arc::clone(&self.store),
                requestor: Arc::clone(&self.requestor),
                recorder: Arc::clone(&self.recorder),
                signals: Arc::clone(&self.signals),
                close_rx: self.close_tx.subscribe(),
                status_rx: None,
                backoff: Backoff::new(self.config.retry.clone()),
            };
            tracing::info!(url = %self.config.stream_url(), "starting stream processor");
            *worker = Some(tokio::spawn(task.run()));
        }
        self.signals.ready_signal()
    }

    /// True once a full data set from the stream has been stored.
    pub fn initialized(&self) -> bool {
        self.signals.initialized.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ProcessorState {
        self.signals.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ProcessorState> {
        self.signals.state_tx.subscribe()
    }

    pub fn ready_signal(&self) -> ReadySignal {
        self.signals.ready_signal()
    }

    pub fn recorder(&self) -> Arc<ConnectionAttemptRecorder> {
        Arc::clone(&self.recorder)
    }

    /// Stops the worker. Safe to call from any thread and more than once;
    /// an open connection or a pending reconnect delay is abandoned at once.
    pub fn close(&self) {
        if self.close_tx.send_replace(true) {
            return;
        }
        tracing::info!("closing stream processor");
        self.signals.set_state(ProcessorState::Closed);
        self.signals.release_ready();
    }

    /// Closes the processor and waits for the worker task to finish.
    pub async fn shutdown(&self) {
        self.close();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "stream worker terminated abnormally");
            }
        }
    }
}

impl Drop for StreamProcessor {
    fn drop(&mut self) {
        self.close();
    }
}

/// How one connection ended.
enum SessionEnd {
    Closed,
    /// The store asked for a full re-synchronization.
    Restart,
    Failed(StreamError),
}

struct Worker {
    config: Arc<Config>,
    client: reqwest::Client,
    store: Arc<dyn DataStore>,
    requestor: Arc<dyn Requestor>,
    recorder: Arc<ConnectionAttemptRecorder>,
    signals: Arc<Signals>,
    close_rx: watch::Receiver<bool>,
    status_rx: Option<watch::Receiver<StoreStatus>>,
    backoff: Backoff,
}

impl Worker {
    async fn run(mut self) {
        self.status_rx = self.store.status_subscribe();

        loop {
            if *self.close_rx.borrow() {
                break;
            }
            self.signals.set_state(ProcessorState::Connecting);

            match self.run_session().await {
                SessionEnd::Closed => break,
                SessionEnd::Restart => {
                    tracing::info!("store needs a refresh, restarting stream");
                }
                SessionEnd::Failed(err) if !err.is_recoverable() => {
                    tracing::error!(error = %err, "unrecoverable stream error, giving up");
                    self.signals.set_state(ProcessorState::PermanentlyFailed);
                    self.signals.release_ready();
                    return;
                }
                SessionEnd::Failed(err) => {
                    self.signals.set_state(ProcessorState::Reconnecting);
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        error = %err,
                        attempt = self.backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "stream connection lost, reconnecting"
                    );
                    if !self.wait_before_reconnect(delay).await {
                        break;
                    }
                }
            }
        }

        self.signals.set_state(ProcessorState::Closed);
        self.signals.release_ready();
    }

    async fn run_session(&mut self) -> SessionEnd {
        let started_at = Utc::now();
        let started = Instant::now();

        let connected = tokio::select! {
            biased;
            _ = closed(&mut self.close_rx) => return SessionEnd::Closed,
            result = connect(&self.client, &self.config) => result,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let response = match connected {
            Ok(response) => {
                self.recorder.record_attempt(false, started_at, elapsed_ms);
                response
            }
            Err(err) => {
                self.recorder.record_attempt(true, started_at, elapsed_ms);
                return SessionEnd::Failed(err);
            }
        };

        tracing::info!(elapsed_ms, "stream connected");
        self.signals.set_state(ProcessorState::AwaitingInitialSnapshot);
        self.consume(response).await
    }

    async fn consume(&mut self, response: reqwest::Response) -> SessionEnd {
        let mut body = response.bytes_stream();
        let mut parser = EventParser::new();

        loop {
            tokio::select! {
                biased;
                _ = closed(&mut self.close_rx) => return SessionEnd::Closed,
                status = next_status(&mut self.status_rx) => {
                    if status.requires_resync() && self.signals.state() == ProcessorState::Live {
                        return SessionEnd::Restart;
                    }
                }
                chunk = body.next() => match chunk {
                    None => return SessionEnd::Failed(StreamError::StreamEnded),
                    Some(Err(e)) => return SessionEnd::Failed(StreamError::Network(e)),
                    Some(Ok(bytes)) => {
                        for event in parser.push(&bytes) {
                            match self.handle_event(&event).await {
                                Ok(()) => {}
                                Err(StreamError::Closed) => return SessionEnd::Closed,
                                Err(err) => return SessionEnd::Failed(err),
                            }
                        }
                    }
                },
            }
        }
    }

    /// Applies one event to the store. Malformed events are skipped; only a
    /// failed follow-up pull is returned as an error, and that one always
    /// leads to a reconnect.
    async fn handle_event(&mut self, event: &SseEvent) -> Result<()> {
        let decoded = match StreamEvent::decode(event) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => {
                tracing::debug!(event = %event.event, "ignoring unrecognized event");
                return Ok(());
            }
            Err(err) => {
                tracing::warn!(event = %event.event, error = %err, "skipping malformed event");
                return Ok(());
            }
        };

        match decoded {
            StreamEvent::Put(snapshot) => self.apply_full(snapshot),
            StreamEvent::Patch { kind, item } => {
                tracing::debug!(%kind, key = %item.key, version = item.version, "patch");
                self.store.upsert(kind, item);
            }
            StreamEvent::Delete { kind, key, version } => {
                tracing::debug!(%kind, %key, version, "delete");
                self.store.delete(kind, &key, version);
            }
            StreamEvent::IndirectPut => {
                let snapshot = tokio::select! {
                    biased;
                    _ = closed(&mut self.close_rx) => return Err(StreamError::Closed),
                    result = self.requestor.fetch_all() => result.map_err(pull_failed)?,
                };
                self.apply_full(snapshot);
            }
            StreamEvent::IndirectPatch { kind, key } => {
                let item = tokio::select! {
                    biased;
                    _ = closed(&mut self.close_rx) => return Err(StreamError::Closed),
                    result = self.requestor.fetch_item(kind, &key) => {
                        result.map_err(pull_failed)?
                    }
                };
                tracing::debug!(%kind, %key, version = item.version, "indirect patch");
                self.store.upsert(kind, item);
            }
        }
        Ok(())
    }

    fn apply_full(&mut self, snapshot: Snapshot) {
        self.store.init(snapshot);
        self.backoff.reset();
        self.signals.set_state(ProcessorState::Live);
        if !self.signals.initialized.swap(true, Ordering::AcqRel) {
            tracing::info!("stream processor initialized");
            self.signals.release_ready();
        }
    }

    /// Sleeps before the next reconnect. Returns `false` if the processor was
    /// closed meanwhile; a store refresh request cuts the wait short.
    async fn wait_before_reconnect(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = closed(&mut self.close_rx) => return false,
                status = next_status(&mut self.status_rx) => {
                    if status.requires_resync() {
                        return true;
                    }
                }
                _ = &mut sleep => return true,
            }
        }
    }
}

/// Opens the stream. The timeout covers only establishing the connection
/// and receiving the response headers, never reading the body.
async fn connect(client: &reqwest::Client, config: &Config) -> Result<reqwest::Response> {
    let request = client
        .get(config.stream_url())
        .header(AUTHORIZATION, &config.sdk_key)
        .header(USER_AGENT, &config.user_agent)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send();

    let response = tokio::time::timeout(config.connect_timeout, request)
        .await
        .map_err(|_| StreamError::ConnectTimeout(config.connect_timeout))??;

    let status = response.status();
    if !status.is_success() {
        return Err(StreamError::Http {
            status: status.as_u16(),
        });
    }
    Ok(response)
}

fn pull_failed(err: StreamError) -> StreamError {
    tracing::warn!(error = %err, "indirect pull failed, restarting stream");
    StreamError::Pull(Box::new(err))
}

async fn closed(rx: &mut watch::Receiver<bool>) {
    // A dropped sender means the processor itself is gone.
    let _ = rx.wait_for(|closed| *closed).await;
}

/// Next status published by the store; pends forever for stores that never
/// publish.
async fn next_status(rx: &mut Option<watch::Receiver<StoreStatus>>) -> StoreStatus {
    let Some(receiver) = rx.as_mut() else {
        return std::future::pending().await;
    };
    if receiver.changed().await.is_ok() {
        return *receiver.borrow_and_update();
    }
    *rx = None;
    std::future::pending().await
}
