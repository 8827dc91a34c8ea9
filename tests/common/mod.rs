#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Router;
use flagsync::{
    Config, DataKind, DataStore, InMemoryStore, Requestor, RetryConfig, Snapshot, StatusNotifier,
    StoreStatus, StreamError, VersionedItem,
};
use tokio::sync::{broadcast, mpsc, watch};

pub const SDK_KEY: &str = "sdk-key";

pub const INITIAL_PUT: &str = r#"{"path": "/", "data": {
"flags": {"my-flag": {"key": "my-flag", "version": 2}},
"segments": {"my-segment": {"key": "my-segment", "version": 5}}
}}"#;

/// What the stream endpoint does when a client connects.
#[derive(Clone)]
pub enum StreamBehavior {
    /// Send the initial event, then relay published events.
    Events,
    /// Send headers and then stay silent forever.
    Silent,
}

/// A minimal streaming endpoint: replays one initial event to every new
/// connection, then relays whatever the test publishes.
pub struct StreamServer {
    initial_event: Mutex<(String, String)>,
    events: broadcast::Sender<(String, String)>,
    failures: Mutex<VecDeque<u16>>,
    behavior: Mutex<StreamBehavior>,
    connections: AtomicUsize,
    paths: Mutex<Vec<String>>,
    auth_headers: Mutex<Vec<String>>,
}

impl StreamServer {
    pub fn new(initial_event: &str, initial_data: &str) -> Arc<Self> {
        Arc::new(Self {
            initial_event: Mutex::new((initial_event.to_string(), initial_data.to_string())),
            events: broadcast::channel(1000).0,
            failures: Mutex::new(VecDeque::new()),
            behavior: Mutex::new(StreamBehavior::Events),
            connections: AtomicUsize::new(0),
            paths: Mutex::new(Vec::new()),
            auth_headers: Mutex::new(Vec::new()),
        })
    }

    pub fn with_initial_put() -> Arc<Self> {
        Self::new("put", INITIAL_PUT)
    }

    /// The next connections answer with these statuses, in order.
    pub fn fail_next(&self, statuses: &[u16]) {
        self.failures.lock().unwrap().extend(statuses);
    }

    pub fn set_behavior(&self, behavior: StreamBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_initial_event(&self, event: &str, data: &str) {
        *self.initial_event.lock().unwrap() = (event.to_string(), data.to_string());
    }

    pub fn publish(&self, event: &str, data: &str) {
        let _ = self.events.send((event.to_string(), data.to_string()));
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }

    pub fn auth_headers(&self) -> Vec<String> {
        self.auth_headers.lock().unwrap().clone()
    }
}

async fn handle_stream(
    State(server): State<Arc<StreamServer>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    server.connections.fetch_add(1, Ordering::SeqCst);
    server.paths.lock().unwrap().push(uri.path().to_string());
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        server.auth_headers.lock().unwrap().push(auth.to_string());
    }

    let failure = server.failures.lock().unwrap().pop_front();
    if let Some(status) = failure {
        return StatusCode::from_u16(status).unwrap().into_response();
    }

    let behavior = server.behavior.lock().unwrap().clone();
    let (name, data) = server.initial_event.lock().unwrap().clone();
    let mut rx = server.events.subscribe();

    let stream = async_stream::stream! {
        if let StreamBehavior::Silent = behavior {
            std::future::pending::<()>().await;
        }
        yield Ok::<Event, Infallible>(Event::default().event(name).data(data));
        loop {
            match rx.recv().await {
                Ok((name, data)) => yield Ok(Event::default().event(name).data(data)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).into_response()
}

pub struct TestServer {
    pub addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn serve(router: Router) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    TestServer { addr, handle }
}

pub async fn serve_stream(server: Arc<StreamServer>) -> TestServer {
    serve(Router::new().fallback(handle_stream).with_state(server)).await
}

/// Config pointing at a test stream, with reconnect delays short enough for
/// tests.
pub fn test_config(stream_url: &str, base_url: &str) -> Config {
    Config::new(SDK_KEY, stream_url, base_url).with_retry(
        RetryConfig::new(Duration::from_millis(10), Duration::from_millis(100)),
    )
}

pub async fn wait_for_version(
    store: &dyn DataStore,
    kind: DataKind,
    key: &str,
    version: u64,
) -> VersionedItem {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let item = store.get(kind, key);
        if let Some(found) = item.as_ref().filter(|i| i.version == version) {
            return found.clone();
        }
        if tokio::time::Instant::now() > deadline {
            panic!("{} {} never reached version {}: {:?}", kind, key, version, item);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_delete(store: &dyn DataStore, kind: DataKind, key: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while store.get(kind, key).is_some() {
        if tokio::time::Instant::now() > deadline {
            panic!("{} {} was never deleted", kind, key);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Requestor that serves canned items and counts calls.
#[derive(Default)]
pub struct MockRequestor {
    pub all: Mutex<Option<Snapshot>>,
    pub items: Mutex<HashMap<(DataKind, String), VersionedItem>>,
    pub fail_with: Mutex<Option<u16>>,
    pub calls: Mutex<Vec<String>>,
}

impl MockRequestor {
    pub fn with_item(kind: DataKind, item: VersionedItem) -> Arc<Self> {
        let mock = Self::default();
        mock.items
            .lock()
            .unwrap()
            .insert((kind, item.key.clone()), item);
        Arc::new(mock)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn failure(&self) -> Option<StreamError> {
        self.fail_with
            .lock()
            .unwrap()
            .map(|status| StreamError::Http { status })
    }

    fn item(&self, kind: DataKind, key: &str) -> flagsync::Result<VersionedItem> {
        if let Some(err) = self.failure() {
            return Err(err);
        }
        self.items
            .lock()
            .unwrap()
            .get(&(kind, key.to_string()))
            .cloned()
            .ok_or(StreamError::Http { status: 404 })
    }
}

#[async_trait]
impl Requestor for MockRequestor {
    async fn fetch_all(&self) -> flagsync::Result<Snapshot> {
        self.calls.lock().unwrap().push("all".to_string());
        if let Some(err) = self.failure() {
            return Err(err);
        }
        Ok(self.all.lock().unwrap().clone().unwrap_or_default())
    }

    async fn fetch_flag(&self, key: &str) -> flagsync::Result<VersionedItem> {
        self.calls.lock().unwrap().push(format!("flag:{}", key));
        self.item(DataKind::Flags, key)
    }

    async fn fetch_segment(&self, key: &str) -> flagsync::Result<VersionedItem> {
        self.calls.lock().unwrap().push(format!("segment:{}", key));
        self.item(DataKind::Segments, key)
    }
}

/// Store that simulates an external backend: it can report outages and
/// forwards every full data set it receives to the test.
pub struct StoreWithStatus {
    inner: InMemoryStore,
    notifier: StatusNotifier,
    inits: mpsc::UnboundedSender<Snapshot>,
}

impl StoreWithStatus {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Snapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            inner: InMemoryStore::new(),
            notifier: StatusNotifier::new(),
            inits: tx,
        });
        (store, rx)
    }

    pub fn publish_status(&self, status: StoreStatus) {
        self.notifier.publish(status);
    }
}

impl DataStore for StoreWithStatus {
    fn init(&self, snapshot: Snapshot) {
        self.inner.init(snapshot.clone());
        let _ = self.inits.send(snapshot);
    }

    fn upsert(&self, kind: DataKind, item: VersionedItem) -> bool {
        self.inner.upsert(kind, item)
    }

    fn get(&self, kind: DataKind, key: &str) -> Option<VersionedItem> {
        self.inner.get(kind, key)
    }

    fn all(&self, kind: DataKind) -> HashMap<String, VersionedItem> {
        self.inner.all(kind)
    }

    fn initialized(&self) -> bool {
        self.inner.initialized()
    }

    fn status(&self) -> StoreStatus {
        self.notifier.current()
    }

    fn status_subscribe(&self) -> Option<watch::Receiver<StoreStatus>> {
        Some(self.notifier.subscribe())
    }
}
