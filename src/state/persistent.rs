//! Persistent entry storage.

use crate::durable::DurableStore;
use crate::error::{Result, RuntimeError};
use crate::types::Value;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Raw durable content that is never loaded.
const UNDEFINED_SENTINEL: &str = "undefined";

/// Explicit and default value of a single key.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StoreEntry {
    pub explicit: Option<Value>,
    pub default: Option<Value>,
}

impl StoreEntry {
    /// Explicit value if present, otherwise the default.
    pub fn effective(&self) -> Option<&Value> {
        self.explicit.as_ref().or(self.default.as_ref())
    }
}

/// Outcome of loading the durable store at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Entries loaded as explicit values.
    pub loaded: usize,
    /// Unusable entries deleted from durable storage.
    pub purged: usize,
}

/// Key-value entries held in memory and mirrored to a durable store.
///
/// The in-memory maps are authoritative for the session; durable writes are
/// reported back to the caller but never roll back memory.
pub struct PersistentStore {
    /// Prefix for every durable key.
    namespace: String,

    /// Explicitly set values.
    explicit: RwLock<BTreeMap<String, Value>>,

    /// Fallback values (never persisted).
    defaults: RwLock<BTreeMap<String, Value>>,

    /// Durable backing store.
    durable: Arc<dyn DurableStore>,
}

impl PersistentStore {
    /// Create a store over `durable` and load every entry under `namespace`.
    pub fn open(durable: Arc<dyn DurableStore>, namespace: impl Into<String>) -> (Self, LoadStats) {
        let store = Self {
            namespace: namespace.into(),
            explicit: RwLock::new(BTreeMap::new()),
            defaults: RwLock::new(BTreeMap::new()),
            durable,
        };
        let stats = store.load();
        (store, stats)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Load persisted entries, purging the ones that cannot be used.
    fn load(&self) -> LoadStats {
        let mut stats = LoadStats::default();

        let keys = match self.durable.keys() {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "failed to enumerate durable keys");
                return stats;
            }
        };

        let mut explicit = self.explicit.write();
        for durable_key in keys {
            let Some(key) = durable_key.strip_prefix(&self.namespace) else {
                continue;
            };

            match self.read_entry(&durable_key) {
                Ok(Some(value)) => {
                    explicit.insert(key.to_string(), value);
                    stats.loaded += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    let raw = self.durable.get(&durable_key).ok().flatten();
                    error!(key, raw = ?raw, error = %e, "failed to load stored value, purging");
                    self.purge(&durable_key);
                    stats.purged += 1;
                }
            }
        }

        debug!(
            namespace = %self.namespace,
            loaded = stats.loaded,
            purged = stats.purged,
            "loaded durable entries"
        );
        stats
    }

    fn read_entry(&self, durable_key: &str) -> Result<Option<Value>> {
        let Some(raw) = self.durable.get(durable_key)? else {
            return Ok(None);
        };
        if raw == UNDEFINED_SENTINEL {
            return Err(RuntimeError::Corruption("undefined sentinel".into()));
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| RuntimeError::Deserialization(e.to_string()))
    }

    fn purge(&self, durable_key: &str) {
        if let Err(e) = self.durable.remove(durable_key) {
            warn!(key = durable_key, error = %e, "failed to purge durable entry");
        }
    }

    fn durable_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    // --- Reads ---

    pub fn explicit(&self, key: &str) -> Option<Value> {
        self.explicit.read().get(key).cloned()
    }

    pub fn default_value(&self, key: &str) -> Option<Value> {
        self.defaults.read().get(key).cloned()
    }

    pub fn has_explicit(&self, key: &str) -> bool {
        self.explicit.read().contains_key(key)
    }

    /// Explicit value if present, otherwise the default.
    pub fn effective(&self, key: &str) -> Option<Value> {
        self.explicit(key).or_else(|| self.default_value(key))
    }

    /// Keys holding an explicit value, sorted.
    pub fn explicit_keys(&self) -> Vec<String> {
        self.explicit.read().keys().cloned().collect()
    }

    /// Every key with an explicit value or a default, sorted.
    pub fn entries(&self) -> BTreeMap<String, StoreEntry> {
        let mut out: BTreeMap<String, StoreEntry> = BTreeMap::new();
        for (key, value) in self.defaults.read().iter() {
            out.entry(key.clone()).or_default().default = Some(value.clone());
        }
        for (key, value) in self.explicit.read().iter() {
            out.entry(key.clone()).or_default().explicit = Some(value.clone());
        }
        out
    }

    // --- Writes ---

    /// Store an explicit value in memory, returning the previous one.
    pub fn insert(&self, key: &str, value: Value) -> Option<Value> {
        self.explicit.write().insert(key.to_string(), value)
    }

    /// Drop the explicit value from memory, returning it.
    pub fn take(&self, key: &str) -> Option<Value> {
        self.explicit.write().remove(key)
    }

    /// Record a default, returning the previous default.
    pub fn insert_default(&self, key: &str, value: Value) -> Option<Value> {
        self.defaults.write().insert(key.to_string(), value)
    }

    /// Write the JSON text of `value` to durable storage.
    pub fn persist(&self, key: &str, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)
            .map_err(|e| RuntimeError::Serialization(e.to_string()))?;
        self.durable.set(&self.durable_key(key), &text)
    }

    /// Delete the durable copy of `key`.
    pub fn unpersist(&self, key: &str) -> Result<()> {
        self.durable.remove(&self.durable_key(key))
    }
}
