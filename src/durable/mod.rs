//! Durable key-value blob storage behind the reactive store.
//!
//! The store treats durable storage as a synchronous, string-keyed blob
//! store. Two backends are provided:
//! - [`MemoryDurableStore`] for tests and ephemeral sessions
//! - [`FileDurableStore`] persisting one checksummed file per key

mod file;
mod memory;

pub use file::FileDurableStore;
pub use memory::MemoryDurableStore;

use crate::error::Result;

/// Synchronous string-keyed blob store.
pub trait DurableStore: Send + Sync {
    /// Read the raw text stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store raw text under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Enumerate every stored key.
    fn keys(&self) -> Result<Vec<String>>;

    fn len(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
