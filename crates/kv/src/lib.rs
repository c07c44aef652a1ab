//! Shared key-value store.
//!
//! Mirrors keep two kinds of state outside the filesystem: the approval sets
//! ("enabled" and "approved" packages) and the statistics of the last sync.
//! Both are small, are written by sync jobs and read by request handlers, and
//! must survive restarts, so they live in SQLite behind a Redis-like API of
//! sets and hashes.
//!
//! Every operation is a single statement (or a transaction), so concurrent
//! writers never observe a partially-applied set update.

mod db;
pub mod error;
mod repo;

pub use crate::db::Database;
pub use crate::repo::KeyValue;
