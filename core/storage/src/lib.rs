//! Cursor and transaction persistence for tallyfeed.
//!
//! This module provides the trait-based persistence boundary the sync core
//! commits through, plus in-memory and SQLite implementations.
//!
//! # Design Principles
//! - Atomic commit: a delta and the cursor acknowledging it land together or not at all
//! - Idempotent apply: committing the same delta twice leaves the same state
//! - Tombstones: a removed transaction is never resurrected by a stale delta

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::CursorStore;
