//! # interchat-log
//!
//! The durable log behind a chat room: an ordered, capacity-bounded record
//! of every broadcast payload.
//!
//! - [`LogStore`]: backing store boundary (append + newest-first range read)
//! - [`MemoryLogStore`]: in-process store with fault injection
//! - [`SqliteLogStore`]: durable store on SQLite
//! - [`DurableLog`]: one named log over a store, with a deadline on every call

#![deny(unsafe_code)]

pub mod durable;
pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use durable::{DurableLog, LogOptions};
pub use error::LogError;
pub use memory::MemoryLogStore;
pub use sqlite::SqliteLogStore;
pub use store::{Bound, EntryId, LogEntry, LogStore, Trim};
