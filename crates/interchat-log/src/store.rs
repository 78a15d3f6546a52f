//! Backing store boundary for durable logs.

use std::fmt;

use async_trait::async_trait;
use interchat_core::Payload;

use crate::error::LogError;

/// Position of an entry within its log. Assigned by the store on append and
/// strictly increasing per log, including across evictions.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One stored payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Store-assigned position.
    pub id: EntryId,
    /// Opaque payload, byte-exact as appended.
    pub payload: Payload,
}

/// Range marker for [`LogStore::rev_range`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bound {
    /// The newest entry in the log (`+`).
    Newest,
    /// The oldest entry in the log (`-`).
    Oldest,
    /// A specific entry, inclusive.
    At(EntryId),
}

impl Bound {
    /// Resolve to an inclusive numeric position.
    pub fn position(self) -> u64 {
        match self {
            Bound::Newest => u64::MAX,
            Bound::Oldest => 0,
            Bound::At(id) => id.0,
        }
    }
}

/// Capacity bound applied after an append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trim {
    /// Keep exactly the newest `n` entries.
    Exact(usize),
    /// Keep at least the newest `n` entries. Eviction is deferred until the
    /// log overshoots by a slack of `n / 10` (at least one), then done in one
    /// batch.
    Approximate(usize),
}

impl Trim {
    /// The retained length this bound converges to.
    pub fn max_len(self) -> usize {
        match self {
            Trim::Exact(n) | Trim::Approximate(n) => n,
        }
    }

    /// Number of oldest entries to evict from a log holding `len` entries.
    pub fn excess(self, len: usize) -> usize {
        match self {
            Trim::Exact(max) => len.saturating_sub(max),
            Trim::Approximate(max) => {
                let slack = (max / 10).max(1);
                if len > max.saturating_add(slack) {
                    len - max
                } else {
                    0
                }
            }
        }
    }
}

/// An ordered keyed-stream store addressed by log name.
///
/// Implementations must assign strictly increasing [`EntryId`]s per log and
/// must not interpret payloads.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append `payload` to `log`, then apply `trim` if given.
    async fn append(
        &self,
        log: &str,
        payload: Payload,
        trim: Option<Trim>,
    ) -> Result<EntryId, LogError>;

    /// Up to `count` entries with positions in `[start, end]`, newest first.
    async fn rev_range(
        &self,
        log: &str,
        end: Bound,
        start: Bound,
        count: usize,
    ) -> Result<Vec<LogEntry>, LogError>;

    /// Number of entries currently retained in `log`.
    async fn len(&self, log: &str) -> Result<usize, LogError>;
}
