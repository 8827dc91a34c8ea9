use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, StreamError};
use crate::model::{AllData, DataKind, Snapshot, VersionedItem};
use crate::sse::SseEvent;

pub const PUT_EVENT: &str = "put";
pub const PATCH_EVENT: &str = "patch";
pub const DELETE_EVENT: &str = "delete";
pub const INDIRECT_PUT_EVENT: &str = "indirect/put";
pub const INDIRECT_PATCH_EVENT: &str = "indirect/patch";

/// A decoded stream notification. Each variant maps to exactly one store
/// operation, either directly or through a follow-up pull.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Full data set replacing everything in the store.
    Put(Snapshot),
    Patch {
        kind: DataKind,
        item: VersionedItem,
    },
    Delete {
        kind: DataKind,
        key: String,
        version: u64,
    },
    /// Data changed; fetch the full data set.
    IndirectPut,
    /// One item changed; fetch it.
    IndirectPatch { kind: DataKind, key: String },
}

#[derive(Deserialize)]
struct PutData {
    #[serde(default)]
    data: AllData,
}

#[derive(Deserialize)]
struct PatchData {
    path: String,
    data: Value,
}

#[derive(Deserialize)]
struct DeleteData {
    path: String,
    version: u64,
}

impl StreamEvent {
    /// Decodes a server-sent event. Returns `Ok(None)` for event names this
    /// client does not act on (heartbeats and the like).
    pub fn decode(event: &SseEvent) -> Result<Option<StreamEvent>> {
        let decoded = match event.event.as_str() {
            PUT_EVENT => {
                let put: PutData = serde_json::from_str(&event.data)?;
                StreamEvent::Put(put.data.into_snapshot()?)
            }
            PATCH_EVENT => {
                let patch: PatchData = serde_json::from_str(&event.data)?;
                let (kind, key) = parse_path(&patch.path)?;
                let item = VersionedItem::from_json(patch.data, Some(key))?;
                StreamEvent::Patch { kind, item }
            }
            DELETE_EVENT => {
                let delete: DeleteData = serde_json::from_str(&event.data)?;
                let (kind, key) = parse_path(&delete.path)?;
                StreamEvent::Delete {
                    kind,
                    key: key.to_string(),
                    version: delete.version,
                }
            }
            INDIRECT_PUT_EVENT => StreamEvent::IndirectPut,
            INDIRECT_PATCH_EVENT => {
                let (kind, key) = parse_path(event.data.trim())?;
                StreamEvent::IndirectPatch {
                    kind,
                    key: key.to_string(),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }
}

fn parse_path(path: &str) -> Result<(DataKind, &str)> {
    DataKind::parse_path(path).ok_or_else(|| StreamError::InvalidPath(path.to_string()))
}
