pub mod memory;

use std::collections::HashMap;

use tokio::sync::watch;

use crate::model::{DataKind, Snapshot, VersionedItem};

pub use memory::InMemoryStore;

/// Availability of a store's backing medium.
///
/// `available: true, needs_refresh: true` after an outage means updates may
/// have been missed and only a full re-synchronization can repair the gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStatus {
    pub available: bool,
    pub needs_refresh: bool,
}

impl StoreStatus {
    pub const fn available() -> Self {
        Self {
            available: true,
            needs_refresh: false,
        }
    }

    pub const fn unavailable() -> Self {
        Self {
            available: false,
            needs_refresh: false,
        }
    }

    pub fn requires_resync(&self) -> bool {
        self.available && self.needs_refresh
    }
}

impl Default for StoreStatus {
    fn default() -> Self {
        Self::available()
    }
}

/// Versioned flag and segment storage. Implementations must be thread-safe.
///
/// Reads never block on writers for long and are safe to call from
/// evaluation code. Only the stream processor writes.
pub trait DataStore: Send + Sync {
    /// Replaces the whole contents of every kind. Readers see either the old
    /// data or the new data, never a mix.
    fn init(&self, snapshot: Snapshot);

    /// Stores `item` if its version is newer than what is held for its key.
    /// Returns whether the write was accepted.
    fn upsert(&self, kind: DataKind, item: VersionedItem) -> bool;

    /// Records a tombstone for `key` at `version`, subject to the same
    /// version check as [`DataStore::upsert`].
    fn delete(&self, kind: DataKind, key: &str, version: u64) -> bool {
        self.upsert(kind, VersionedItem::tombstone(key, version))
    }

    /// Current item for `key`; deleted and absent items are both `None`.
    fn get(&self, kind: DataKind, key: &str) -> Option<VersionedItem>;

    /// All live items of a kind. Tombstones are never included.
    fn all(&self, kind: DataKind) -> HashMap<String, VersionedItem>;

    /// True once [`DataStore::init`] has been called at least once.
    fn initialized(&self) -> bool;

    fn status(&self) -> StoreStatus {
        StoreStatus::available()
    }

    /// Subscribes to availability changes. Stores that can never become
    /// unavailable return `None`.
    fn status_subscribe(&self) -> Option<watch::Receiver<StoreStatus>> {
        None
    }
}

/// Single-slot status publisher for stores backed by an external service.
///
/// Publishing never waits for the subscriber: a newer status replaces one
/// that has not been read yet, since only the current availability matters.
#[derive(Debug)]
pub struct StatusNotifier {
    tx: watch::Sender<StoreStatus>,
}

impl StatusNotifier {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StoreStatus::available());
        Self { tx }
    }

    pub fn publish(&self, status: StoreStatus) {
        let previous = self.tx.send_replace(status);
        if previous != status {
            tracing::debug!(
                available = status.available,
                needs_refresh = status.needs_refresh,
                "store status changed"
            );
        }
    }

    pub fn mark_unavailable(&self) {
        self.publish(StoreStatus::unavailable());
    }

    /// Marks the store available again, flagging whether data may have been
    /// missed while it was down.
    pub fn mark_available(&self, needs_refresh: bool) {
        self.publish(StoreStatus {
            available: true,
            needs_refresh,
        });
    }

    pub fn current(&self) -> StoreStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreStatus> {
        self.tx.subscribe()
    }
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new()
    }
}
