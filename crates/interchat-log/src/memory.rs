//! In-process log store.
//!
//! Holds every log in memory behind one mutex. Failures and latency can be
//! injected to exercise the error paths of callers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use interchat_core::Payload;
use parking_lot::Mutex;

use crate::error::LogError;
use crate::store::{Bound, EntryId, LogEntry, LogStore, Trim};

#[derive(Default)]
struct Stream {
    last_id: u64,
    entries: VecDeque<LogEntry>,
}

/// Memory-backed [`LogStore`].
#[derive(Default)]
pub struct MemoryLogStore {
    streams: Mutex<HashMap<String, Stream>>,
    fail_appends: AtomicBool,
    fail_reads: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl MemoryLogStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent append fail with [`LogError::Unavailable`].
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent read fail with [`LogError::Unavailable`].
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Delay every operation by `latency` before it touches the data.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(
        &self,
        log: &str,
        payload: Payload,
        trim: Option<Trim>,
    ) -> Result<EntryId, LogError> {
        self.simulate_latency().await;
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(LogError::Unavailable("injected append failure".into()));
        }

        let mut streams = self.streams.lock();
        let stream = streams.entry(log.to_string()).or_default();
        stream.last_id += 1;
        let id = EntryId(stream.last_id);
        stream.entries.push_back(LogEntry { id, payload });

        if let Some(trim) = trim {
            let excess = trim.excess(stream.entries.len());
            let _ = stream.entries.drain(..excess);
        }
        Ok(id)
    }

    async fn rev_range(
        &self,
        log: &str,
        end: Bound,
        start: Bound,
        count: usize,
    ) -> Result<Vec<LogEntry>, LogError> {
        self.simulate_latency().await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LogError::Unavailable("injected read failure".into()));
        }

        let (hi, lo) = (end.position(), start.position());
        let streams = self.streams.lock();
        let Some(stream) = streams.get(log) else {
            return Ok(Vec::new());
        };
        Ok(stream
            .entries
            .iter()
            .rev()
            .filter(|e| e.id.0 <= hi && e.id.0 >= lo)
            .take(count)
            .cloned()
            .collect())
    }

    async fn len(&self, log: &str) -> Result<usize, LogError> {
        Ok(self
            .streams
            .lock()
            .get(log)
            .map_or(0, |s| s.entries.len()))
    }
}
