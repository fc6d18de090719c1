//! In-memory entries backed by a durable blob store.
//!
//! Explicit values and defaults are held separately so that removing an
//! explicit value falls back to the registered default.

mod persistent;

pub use persistent::{LoadStats, PersistentStore, StoreEntry};
