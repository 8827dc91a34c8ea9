use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use super::DataStore;
use crate::model::{DataKind, Snapshot, VersionedItem};

/// In-memory store backed by a `RwLock<HashMap>`. Tombstones are kept so a
/// stale write can never resurrect a deleted key.
pub struct InMemoryStore {
    data: RwLock<Snapshot>,
    initialized: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Snapshot::new()),
            initialized: AtomicBool::new(false),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore for InMemoryStore {
    fn init(&self, mut snapshot: Snapshot) {
        for kind in DataKind::ALL {
            snapshot.entry(kind).or_default();
        }
        *self.data.write() = snapshot;
        self.initialized.store(true, Ordering::Release);
    }

    fn upsert(&self, kind: DataKind, item: VersionedItem) -> bool {
        let mut data = self.data.write();
        let items = data.entry(kind).or_default();
        match items.get(&item.key) {
            Some(existing) if existing.version >= item.version => {
                tracing::debug!(
                    %kind,
                    key = %item.key,
                    stored = existing.version,
                    incoming = item.version,
                    "ignoring stale write"
                );
                false
            }
            _ => {
                items.insert(item.key.clone(), item);
                true
            }
        }
    }

    fn get(&self, kind: DataKind, key: &str) -> Option<VersionedItem> {
        let data = self.data.read();
        data.get(&kind)
            .and_then(|items| items.get(key))
            .filter(|item| !item.deleted)
            .cloned()
    }

    fn all(&self, kind: DataKind) -> HashMap<String, VersionedItem> {
        let data = self.data.read();
        data.get(&kind)
            .map(|items| {
                items
                    .iter()
                    .filter(|(_, item)| !item.deleted)
                    .map(|(k, item)| (k.clone(), item.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}
