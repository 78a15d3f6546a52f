//! SQLite-backed log store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use interchat_core::Payload;
use parking_lot::Mutex;
use rusqlite::{Connection, InterruptHandle, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::LogError;
use crate::schema;
use crate::store::{Bound, EntryId, LogEntry, LogStore, Trim};

/// Durable [`LogStore`] on a single SQLite connection.
///
/// rusqlite connections are blocking, so every operation runs on the
/// blocking pool with the connection held behind a `parking_lot::Mutex`.
///
/// Dropping an operation's future abandons it: a queued operation never
/// starts, a running statement is interrupted and an append rolls back
/// instead of committing.
#[derive(Clone)]
pub struct SqliteLogStore {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    path: PathBuf,
}

impl SqliteLogStore {
    /// Open or create a database at `path`.
    pub fn open(path: &Path) -> Result<Self, LogError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| LogError::Unavailable(format!("create dir: {e}")))?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| LogError::Unavailable(format!("open {}: {e}", path.display())))?;
        Self::init(&conn)?;

        info!(path = %path.display(), "log database opened");

        Ok(Self::from_connection(conn, path.to_owned()))
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, LogError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self::from_connection(conn, PathBuf::from(":memory:")))
    }

    fn from_connection(conn: Connection, path: PathBuf) -> Self {
        Self {
            interrupt: Arc::new(conn.get_interrupt_handle()),
            conn: Arc::new(Mutex::new(conn)),
            path,
        }
    }

    /// Database location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init(conn: &Connection) -> Result<(), LogError> {
        conn.execute_batch(schema::PRAGMAS)
            .map_err(|e| LogError::Storage(format!("pragmas: {e}")))?;
        conn.execute_batch(schema::CREATE_TABLES)
            .map_err(|e| LogError::Storage(format!("schema: {e}")))?;

        let version: Option<u32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        if version.is_none() {
            let _ = conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [schema::SCHEMA_VERSION],
            )?;
        }
        Ok(())
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, LogError>
    where
        F: FnOnce(&mut Connection, &OpState) -> Result<T, LogError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let state = Arc::new(OpState::default());
        let mut abandon = AbandonOnDrop {
            state: Arc::clone(&state),
            interrupt: Arc::clone(&self.interrupt),
            armed: true,
        };

        let result = tokio::task::spawn_blocking(move || {
            let mut locked = conn.lock();
            state.start()?;
            let result = f(&mut *locked, &*state);
            state.finish();
            result
        })
        .await;
        abandon.armed = false;
        result?
    }
}

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const COMMITTING: u8 = 2;
const FINISHED: u8 = 3;
const ABANDONED: u8 = 4;

/// Progress of one blocking operation, shared with the future awaiting it.
#[derive(Debug, Default)]
struct OpState(AtomicU8);

impl OpState {
    fn start(&self) -> Result<(), LogError> {
        self.transition(QUEUED, RUNNING)
    }

    /// Must succeed before a transaction commits.
    fn commit(&self) -> Result<(), LogError> {
        self.transition(RUNNING, COMMITTING)
    }

    fn finish(&self) {
        let _ = self
            .0
            .compare_exchange(RUNNING, FINISHED, Ordering::AcqRel, Ordering::Acquire);
        let _ = self
            .0
            .compare_exchange(COMMITTING, FINISHED, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Mark the operation abandoned. Returns `true` if it was mid-flight and
    /// its statement should be interrupted.
    fn abandon(&self) -> bool {
        match self
            .0
            .compare_exchange(QUEUED, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
        {
            Err(RUNNING) => self
                .0
                .compare_exchange(RUNNING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            Ok(_) | Err(_) => false,
        }
    }

    fn transition(&self, from: u8, to: u8) -> Result<(), LogError> {
        self.0
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| LogError::Storage("operation abandoned by caller".into()))
    }
}

struct AbandonOnDrop {
    state: Arc<OpState>,
    interrupt: Arc<InterruptHandle>,
    armed: bool,
}

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        if self.armed && self.state.abandon() {
            debug!("interrupting abandoned log operation");
            self.interrupt.interrupt();
        }
    }
}

fn to_sql_position(position: u64) -> i64 {
    i64::try_from(position).unwrap_or(i64::MAX)
}

fn from_sql_id(id: i64) -> Result<EntryId, LogError> {
    u64::try_from(id)
        .map(EntryId)
        .map_err(|_| LogError::Storage(format!("negative entry id {id}")))
}

fn count_entries(conn: &Connection, log: &str) -> Result<usize, LogError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM log_entries WHERE log = ?1",
        [log],
        |row| row.get(0),
    )?;
    usize::try_from(count).map_err(|_| LogError::Storage(format!("bad row count {count}")))
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn append(
        &self,
        log: &str,
        payload: Payload,
        trim: Option<Trim>,
    ) -> Result<EntryId, LogError> {
        let log = log.to_string();
        self.with_conn(move |conn, state| {
            let tx = conn.transaction()?;
            let _ = tx.execute(
                "INSERT INTO log_entries (log, payload, created_at) VALUES (?1, ?2, ?3)",
                params![log, &payload[..], chrono::Utc::now().to_rfc3339()],
            )?;
            let id = from_sql_id(tx.last_insert_rowid())?;

            if let Some(trim) = trim {
                let excess = trim.excess(count_entries(&tx, &log)?);
                if excess > 0 {
                    let evicted = tx.execute(
                        "DELETE FROM log_entries WHERE id IN (
                            SELECT id FROM log_entries WHERE log = ?1 ORDER BY id ASC LIMIT ?2
                        )",
                        params![log, i64::try_from(excess).unwrap_or(i64::MAX)],
                    )?;
                    debug!(%log, evicted, "trimmed log");
                }
            }

            // Dropping `tx` on this error rolls the append back.
            state.commit()?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    async fn rev_range(
        &self,
        log: &str,
        end: Bound,
        start: Bound,
        count: usize,
    ) -> Result<Vec<LogEntry>, LogError> {
        let log = log.to_string();
        let hi = to_sql_position(end.position());
        let lo = to_sql_position(start.position());
        let limit = i64::try_from(count).unwrap_or(i64::MAX);
        self.with_conn(move |conn, _| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, payload FROM log_entries
                 WHERE log = ?1 AND id <= ?2 AND id >= ?3
                 ORDER BY id DESC LIMIT ?4",
            )?;
            let rows = stmt.query_map(params![log, hi, lo, limit], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;

            let mut entries = Vec::new();
            for row in rows {
                let (id, payload) = row?;
                entries.push(LogEntry {
                    id: from_sql_id(id)?,
                    payload: Payload::from(payload),
                });
            }
            Ok(entries)
        })
        .await
    }

    async fn len(&self, log: &str) -> Result<usize, LogError> {
        let log = log.to_string();
        self.with_conn(move |conn, _| count_entries(conn, &log))
            .await
    }
}
