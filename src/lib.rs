//! Client-side synchronization of feature flag and segment definitions.
//!
//! A [`StreamProcessor`] holds a long-lived server-sent-events connection and
//! applies `put`, `patch`, `delete` and indirect events to a versioned
//! [`DataStore`]. Evaluation code reads the store; only the processor writes.
//!
//! # Examples
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use flagsync::{Config, DataKind, DataStore, InMemoryStore, StreamProcessor};
//!
//! # async fn run() {
//! let store = Arc::new(InMemoryStore::new());
//! let config = Config::new(
//!     "sdk-key",
//!     "https://stream.flags.example.com",
//!     "https://sdk.flags.example.com",
//! );
//! let processor = StreamProcessor::new(config, store.clone());
//!
//! if processor.start().wait_timeout(Duration::from_secs(5)).await && processor.initialized() {
//!     println!("{} flags loaded", store.all(DataKind::Flags).len());
//! }
//! processor.shutdown().await;
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod model;
pub mod processor;
pub mod requestor;
pub mod sse;
pub mod store;

pub use config::{Config, RetryConfig};
pub use diagnostics::{ConnectionAttempt, ConnectionAttemptRecorder};
pub use error::{is_http_error_recoverable, Result, StreamError};
pub use events::StreamEvent;
pub use model::{DataKind, Snapshot, VersionedItem};
pub use processor::{ProcessorState, ReadySignal, StreamProcessor};
pub use requestor::{HttpRequestor, Requestor};
pub use store::{DataStore, InMemoryStore, StatusNotifier, StoreStatus};
