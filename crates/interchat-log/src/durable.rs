//! One named, capacity-bounded log over a [`LogStore`].

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use interchat_core::Payload;
use interchat_telemetry::metrics::{LOG_OPERATION_DURATION_SECONDS, LOG_TIMEOUTS_TOTAL};
use metrics::{counter, histogram};
use tracing::warn;

use crate::error::LogError;
use crate::store::{Bound, EntryId, LogStore, Trim};

/// Capacity and deadline settings for a [`DurableLog`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogOptions {
    /// Maximum retained entries.
    pub max_len: usize,
    /// Trim approximately; the log may briefly hold a few more than `max_len`.
    pub approximate: bool,
    /// Deadline for a single append or read.
    pub operation_timeout: Duration,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            max_len: 100,
            approximate: false,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl LogOptions {
    /// Trim bound applied after each append.
    pub fn trim(&self) -> Trim {
        if self.approximate {
            Trim::Approximate(self.max_len)
        } else {
            Trim::Exact(self.max_len)
        }
    }
}

/// An append-only log named after the room it records.
///
/// Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct DurableLog {
    name: Arc<str>,
    store: Arc<dyn LogStore>,
    options: LogOptions,
}

impl DurableLog {
    /// Bind `name` in `store`.
    pub fn new(name: impl Into<Arc<str>>, store: Arc<dyn LogStore>, options: LogOptions) -> Self {
        Self {
            name: name.into(),
            store,
            options,
        }
    }

    /// Log name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Options in effect.
    pub fn options(&self) -> &LogOptions {
        &self.options
    }

    /// Append `payload` and trim the log to its capacity.
    pub async fn append(&self, payload: Payload) -> Result<EntryId, LogError> {
        let trim = self.options.trim();
        self.deadline("append", self.store.append(&self.name, payload, Some(trim)))
            .await
    }

    /// The newest `n` payloads, newest first. `n == 0` reads nothing.
    pub async fn read_last(&self, n: usize) -> Result<Vec<Payload>, LogError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let entries = self
            .deadline(
                "read",
                self.store
                    .rev_range(&self.name, Bound::Newest, Bound::Oldest, n),
            )
            .await?;
        Ok(entries.into_iter().map(|e| e.payload).collect())
    }

    /// Number of retained entries.
    pub async fn len(&self) -> Result<usize, LogError> {
        self.deadline("len", self.store.len(&self.name)).await
    }

    async fn deadline<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, LogError>>,
    ) -> Result<T, LogError> {
        let after = self.options.operation_timeout;
        let started = Instant::now();
        let result = tokio::time::timeout(after, fut).await;
        histogram!(LOG_OPERATION_DURATION_SECONDS, "op" => op)
            .record(started.elapsed().as_secs_f64());
        if let Ok(result) = result {
            result
        } else {
            counter!(LOG_TIMEOUTS_TOTAL, "op" => op).increment(1);
            warn!(log = %self.name, op, ?after, "log operation timed out");
            Err(LogError::Timeout { op, after })
        }
    }
}

impl std::fmt::Debug for DurableLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableLog")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
