use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

/// A named partition of the store. Keys are only unique within a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Flags,
    Segments,
}

impl DataKind {
    pub const ALL: [DataKind; 2] = [DataKind::Flags, DataKind::Segments];

    /// Path segment used by stream events and pull endpoints.
    pub fn path_segment(self) -> &'static str {
        match self {
            DataKind::Flags => "flags",
            DataKind::Segments => "segments",
        }
    }

    /// Splits a stream path like `/flags/my-flag` into its kind and key.
    pub fn parse_path(path: &str) -> Option<(DataKind, &str)> {
        DataKind::ALL.into_iter().find_map(|kind| {
            let key = path
                .strip_prefix('/')?
                .strip_prefix(kind.path_segment())?
                .strip_prefix('/')?;
            if key.is_empty() {
                None
            } else {
                Some((kind, key))
            }
        })
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// A flag or segment definition. The payload is kept as opaque JSON; only
/// the key, version and deleted marker matter to synchronization.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedItem {
    pub key: String,
    pub version: u64,
    pub deleted: bool,
    pub payload: Value,
}

#[derive(Deserialize)]
struct ItemHeader {
    key: Option<String>,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    deleted: bool,
}

impl VersionedItem {
    pub fn new(key: impl Into<String>, version: u64, payload: Value) -> Self {
        Self {
            key: key.into(),
            version,
            deleted: false,
            payload,
        }
    }

    /// Tombstone recording that `key` was deleted at `version`.
    pub fn tombstone(key: impl Into<String>, version: u64) -> Self {
        Self {
            key: key.into(),
            version,
            deleted: true,
            payload: Value::Null,
        }
    }

    /// Reads an item from its JSON document. `fallback_key` is used when the
    /// document carries no `key` of its own (e.g. entries of a put map).
    pub fn from_json(payload: Value, fallback_key: Option<&str>) -> serde_json::Result<Self> {
        let header = ItemHeader::deserialize(&payload)?;
        let key = match (header.key, fallback_key) {
            (Some(key), _) => key,
            (None, Some(key)) => key.to_string(),
            (None, None) => return Err(serde::de::Error::missing_field("key")),
        };
        Ok(Self {
            key,
            version: header.version,
            deleted: header.deleted,
            payload,
        })
    }
}

/// Full contents of a store, partitioned by kind.
pub type Snapshot = HashMap<DataKind, HashMap<String, VersionedItem>>;

/// Wire shape of a full data set: `{"flags": {...}, "segments": {...}}`.
#[derive(Debug, Default, Deserialize)]
pub struct AllData {
    #[serde(default)]
    pub flags: HashMap<String, Value>,
    #[serde(default)]
    pub segments: HashMap<String, Value>,
}

impl AllData {
    pub fn into_snapshot(self) -> serde_json::Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        for (kind, items) in [
            (DataKind::Flags, self.flags),
            (DataKind::Segments, self.segments),
        ] {
            let mut converted = HashMap::with_capacity(items.len());
            for (key, value) in items {
                let item = VersionedItem::from_json(value, Some(&key))?;
                converted.insert(item.key.clone(), item);
            }
            snapshot.insert(kind, converted);
        }
        Ok(snapshot)
    }
}
