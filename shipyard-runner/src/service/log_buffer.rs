//! Log buffer service
//!
//! Holds the log text of one job execution. Backends report logs as
//! cumulative snapshots; the buffer keeps the latest one and tells callers
//! which part is new so it can be forwarded once.

use std::sync::{Arc, Mutex};

/// Thread-safe buffer of a job's log text
///
/// Cloning shares the underlying buffer.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    buffer: Arc<Mutex<String>>,
}

impl LogBuffer {
    /// Creates a new empty log buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the buffer with a newer snapshot
    ///
    /// Returns the text that was not in the previous snapshot. If the backend
    /// rewrote earlier output, the whole snapshot is returned.
    pub fn sync(&self, snapshot: &str) -> String {
        let mut buffer = self.buffer.lock().unwrap();

        let added = if snapshot.starts_with(buffer.as_str()) {
            snapshot[buffer.len()..].to_string()
        } else {
            snapshot.to_string()
        };

        if snapshot.len() >= buffer.len() || !added.is_empty() {
            buffer.clear();
            buffer.push_str(snapshot);
        }

        added
    }

    /// Returns a copy of everything buffered so far
    pub fn snapshot(&self) -> String {
        self.buffer.lock().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().unwrap().is_empty()
    }
}
