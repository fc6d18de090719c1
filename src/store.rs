//! Reactive key-value store tying entries and watchers together.

use crate::config::StoreConfig;
use crate::durable::{DurableStore, FileDurableStore, MemoryDurableStore};
use crate::error::{Result, RuntimeError};
use crate::state::{LoadStats, PersistentStore};
use crate::subscriptions::{
    CallbackResult, ChannelSubscription, ListenerRegistry, Subscription,
};
use crate::types::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// One row of a [`ReactiveStore::dump`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DumpEntry {
    /// Explicit value if present, otherwise the default.
    pub effective: Option<Value>,
    pub explicit: Option<Value>,
    pub default: Option<Value>,
}

/// A persisted key-value store whose keys can be watched.
///
/// Provides:
/// - Reads that fall back from explicit values to defaults to a caller fallback
/// - Best-effort persistence of explicit values
/// - Synchronous delivery of effective-value changes to watchers
///
/// Watcher callbacks run after the store has been updated and with no
/// internal lock held, so they may read from or write to the store.
pub struct ReactiveStore {
    /// Explicit values and defaults.
    state: PersistentStore,

    /// Watchers by key.
    listeners: Arc<ListenerRegistry>,

    load_stats: LoadStats,
}

impl std::fmt::Debug for ReactiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveStore")
            .field("namespace", &self.state.namespace())
            .field("explicit", &self.state.explicit_keys().len())
            .field("listeners", &self.listeners.total_count())
            .finish()
    }
}

impl ReactiveStore {
    /// Open a store over `durable`, loading every entry under the
    /// configured namespace.
    pub fn open(durable: Arc<dyn DurableStore>, config: &StoreConfig) -> Self {
        let (state, stats) = PersistentStore::open(durable, config.namespace.clone());
        if stats.purged > 0 {
            info!(purged = stats.purged, "purged unusable stored values");
        }
        Self {
            state,
            listeners: ListenerRegistry::new(),
            load_stats: stats,
        }
    }

    /// Open a store using the durable backend named by `config`: a
    /// [`FileDurableStore`] if `path` is set, memory otherwise.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let durable: Arc<dyn DurableStore> = match &config.path {
            Some(path) => Arc::new(FileDurableStore::open(path)?),
            None => Arc::new(MemoryDurableStore::new()),
        };
        Ok(Self::open(durable, config))
    }

    /// A store with no durable backing beyond this process.
    pub fn in_memory() -> Self {
        Self::open(Arc::new(MemoryDurableStore::new()), &StoreConfig::default())
    }

    // --- Reads ---

    /// Effective value of `key`, or `fallback` if it has none.
    pub fn get(&self, key: &str, fallback: Option<Value>) -> Option<Value> {
        self.state.effective(key).or(fallback)
    }

    /// Effective value of `key` decoded as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.state.effective(key) {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| RuntimeError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Whether `key` has an explicit value or a default.
    pub fn contains(&self, key: &str) -> bool {
        self.state.effective(key).is_some()
    }

    /// Keys holding an explicit value.
    pub fn keys(&self) -> Vec<String> {
        self.state.explicit_keys()
    }

    // --- Writes ---

    /// Store `value` under `key` and notify its watchers.
    ///
    /// `None` removes the key. Persistence failures are logged; the
    /// in-memory value stays authoritative for the session.
    pub fn set(&self, key: &str, value: Option<Value>) -> Option<Value> {
        let Some(value) = value else {
            self.remove(key);
            return None;
        };

        self.state.insert(key, value.clone());
        if let Err(e) = self.state.persist(key, &value) {
            error!(key, error = %e, "failed to persist value");
        }

        self.listeners.notify(key, Some(&value));
        Some(value)
    }

    /// Serialize `value` and store it under `key`.
    pub fn set_as<T: Serialize>(&self, key: &str, value: &T) -> Result<Value> {
        let value =
            serde_json::to_value(value).map_err(|e| RuntimeError::Serialization(e.to_string()))?;
        self.set(key, Some(value.clone()));
        Ok(value)
    }

    /// Record a fallback value for `key`.
    ///
    /// Watchers are notified only when no explicit value shadows the default.
    /// Defaults are never persisted.
    pub fn set_default(&self, key: &str, value: Value) -> Value {
        self.state.insert_default(key, value.clone());
        if !self.state.has_explicit(key) {
            self.listeners.notify(key, Some(&value));
        }
        value
    }

    /// Remove the explicit value of `key`, returning it.
    ///
    /// Watchers receive the default if one exists, otherwise `None`.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let (previous, persisted) = self.remove_entry(key);
        if let Err(e) = persisted {
            error!(key, error = %e, "failed to remove persisted value");
        }
        previous
    }

    fn remove_entry(&self, key: &str) -> (Option<Value>, Result<()>) {
        let previous = self.state.take(key);
        let persisted = self.state.unpersist(key);

        let fallback = self.state.default_value(key);
        self.listeners.notify(key, fallback.as_ref());

        (previous, persisted)
    }

    /// Remove every explicit value, one key at a time. Defaults are kept.
    ///
    /// Returns the number of keys removed.
    pub fn remove_all(&self) -> usize {
        let keys = self.state.explicit_keys();
        let mut failures = 0;

        for key in &keys {
            if let (_, Err(e)) = self.remove_entry(key) {
                failures += 1;
                error!(key = %key, error = %e, "failed to remove persisted value");
            }
        }

        debug!(removed = keys.len(), failures, "removed all explicit values");
        keys.len()
    }

    // --- Watchers ---

    /// Watch `key`, invoking `callback` with its effective value now and on
    /// every change.
    ///
    /// The initial call is skipped when the key has no value, unless
    /// `call_on_undefined` is set.
    pub fn watch<F>(&self, key: &str, callback: F, call_on_undefined: bool) -> Subscription
    where
        F: Fn(Option<&Value>, &str) -> CallbackResult + Send + Sync + 'static,
    {
        let subscription = self.listeners.register_callback(key, callback);

        let current = self.state.effective(key);
        if current.is_some() || call_on_undefined {
            self.listeners
                .send_to(key, subscription.id(), current.as_ref());
        }

        subscription
    }

    /// Watch `key` through a bounded channel of [`StoreEvent`]s.
    ///
    /// The current value, if any, is delivered immediately. A subscriber
    /// that lets its buffer fill up is dropped.
    ///
    /// [`StoreEvent`]: crate::subscriptions::StoreEvent
    pub fn subscribe(&self, key: &str, buffer_size: usize) -> ChannelSubscription {
        let handle = self.listeners.register_channel(key, buffer_size);
        if let Some(current) = self.state.effective(key) {
            self.listeners
                .send_to(key, handle.subscription.id(), Some(&current));
        }
        handle
    }

    /// Number of watchers on `key`.
    pub fn listener_count(&self, key: &str) -> usize {
        self.listeners.listener_count(key)
    }

    // --- Diagnostics ---

    /// Snapshot of every key starting with `prefix`, sorted by key.
    ///
    /// Each row is also logged at info level.
    pub fn dump(&self, prefix: Option<&str>, strip_prefix: bool) -> BTreeMap<String, DumpEntry> {
        let prefix = prefix.unwrap_or("");
        let mut rows = BTreeMap::new();

        for (key, entry) in self.state.entries() {
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            let name = if strip_prefix { rest.to_string() } else { key.clone() };
            let row = DumpEntry {
                effective: entry.effective().cloned(),
                explicit: entry.explicit,
                default: entry.default,
            };
            info!(
                key = %name,
                effective = ?row.effective,
                explicit = ?row.explicit,
                default = ?row.default,
                "store entry"
            );
            rows.insert(name, row);
        }

        rows
    }

    /// Entries loaded and purged when the store was opened.
    pub fn load_stats(&self) -> LoadStats {
        self.load_stats
    }

    /// Prefix of the durable keys owned by this store.
    pub fn namespace(&self) -> &str {
        self.state.namespace()
    }
}
