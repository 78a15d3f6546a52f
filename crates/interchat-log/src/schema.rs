//! SQL DDL for the log database.

/// Current schema version, recorded on first open.
pub const SCHEMA_VERSION: u32 = 1;

/// Connection pragmas applied on every open.
pub const PRAGMAS: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA busy_timeout = 5000;
";

/// Tables and indexes. `AUTOINCREMENT` keeps ids monotonic even after the
/// newest rows are trimmed away.
pub const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS log_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    log TEXT NOT NULL,
    payload BLOB NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_log_entries_log_id ON log_entries(log, id);
";
