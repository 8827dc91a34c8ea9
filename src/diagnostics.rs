use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};

pub const DEFAULT_ATTEMPT_CAPACITY: usize = 100;

/// Outcome of one stream connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionAttempt {
    #[serde(rename = "timestamp", serialize_with = "as_unix_millis")]
    pub start_time: DateTime<Utc>,
    pub failed: bool,
    #[serde(rename = "durationMillis")]
    pub duration_ms: u64,
}

fn as_unix_millis<S: Serializer>(time: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(time.timestamp_millis())
}

/// Collects connection attempts between diagnostic reports.
///
/// The stream worker records while a reporting task periodically drains;
/// both sides may run on different threads. When full, the oldest attempt
/// is dropped.
#[derive(Debug)]
pub struct ConnectionAttemptRecorder {
    attempts: Mutex<VecDeque<ConnectionAttempt>>,
    capacity: usize,
}

impl ConnectionAttemptRecorder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ATTEMPT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            attempts: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn record_attempt(&self, failed: bool, start_time: DateTime<Utc>, duration_ms: u64) {
        let mut attempts = self.attempts.lock();
        if attempts.len() == self.capacity {
            attempts.pop_front();
        }
        attempts.push_back(ConnectionAttempt {
            start_time,
            failed,
            duration_ms,
        });
    }

    /// Returns every attempt recorded since the last call, oldest first.
    pub fn collect_and_reset(&self) -> Vec<ConnectionAttempt> {
        let mut attempts = self.attempts.lock();
        attempts.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.lock().is_empty()
    }
}

impl Default for ConnectionAttemptRecorder {
    fn default() -> Self {
        Self::new()
    }
}
