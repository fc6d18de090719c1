//! Listener registry delivering value changes to watchers.

use crate::error::RuntimeError;
use crate::types::Value;
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error};

use super::types::{
    Callback, CallbackResult, ChannelSubscription, DropReason, RemoveHook, StoreEvent, Subscription,
    SubscriptionId,
};

/// Where deliveries for a listener go.
#[derive(Clone)]
enum Sink {
    Callback(Callback),
    Channel(Sender<StoreEvent>),
}

/// Internal subscription state.
struct Listener {
    sink: Sink,
    hooks: Vec<RemoveHook>,
}

/// Per-key multiset of watchers.
///
/// Listeners for a key are kept ordered by id, so deliveries follow
/// registration order. Callbacks always run with no registry lock held.
pub struct ListenerRegistry {
    /// Active listeners by key, then by id.
    listeners: RwLock<HashMap<String, BTreeMap<SubscriptionId, Listener>>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    /// Back-reference handed out to subscription handles.
    this: Weak<ListenerRegistry>,
}

impl ListenerRegistry {
    /// Create a new registry.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            this: this.clone(),
        })
    }

    fn register(&self, key: &str, sink: Sink) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));

        self.listeners
            .write()
            .entry(key.to_string())
            .or_default()
            .insert(id, Listener { sink, hooks: Vec::new() });

        Subscription {
            id,
            key: key.to_string(),
            registry: self.this.clone(),
        }
    }

    /// Register a callback watcher on `key`.
    pub fn register_callback<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn(Option<&Value>, &str) -> CallbackResult + Send + Sync + 'static,
    {
        self.register_shared(key, Arc::new(callback))
    }

    /// Register an already shared callback on `key`.
    pub fn register_shared(&self, key: &str, callback: Callback) -> Subscription {
        self.register(key, Sink::Callback(callback))
    }

    /// Register a channel watcher on `key` with a bounded buffer.
    pub fn register_channel(&self, key: &str, buffer_size: usize) -> ChannelSubscription {
        let (sender, receiver) = bounded(buffer_size.max(1));
        let subscription = self.register(key, Sink::Channel(sender));
        ChannelSubscription {
            subscription,
            receiver,
        }
    }

    pub(crate) fn add_remove_hook(&self, key: &str, id: SubscriptionId, hook: RemoveHook) {
        if let Some(listener) = self
            .listeners
            .write()
            .get_mut(key)
            .and_then(|by_id| by_id.get_mut(&id))
        {
            listener.hooks.push(hook);
        }
    }

    /// Remove a listener and run its hooks. No-op if it is already gone.
    pub fn unregister(&self, key: &str, id: SubscriptionId) {
        let removed = {
            let mut listeners = self.listeners.write();
            let removed = listeners.get_mut(key).and_then(|by_id| by_id.remove(&id));
            if listeners.get(key).is_some_and(|by_id| by_id.is_empty()) {
                listeners.remove(key);
            }
            removed
        };

        let Some(listener) = removed else {
            return;
        };

        if let Sink::Channel(sender) = &listener.sink {
            let _ = sender.try_send(StoreEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }

        for hook in listener.hooks {
            if let Err(e) = hook() {
                let err = listener_failure(key, e);
                error!(subscription = id.0, error = %err, "remove hook failed");
            }
        }
    }

    /// Deliver `value` to a single listener (for initial values).
    /// Returns false if the listener is gone or could not receive.
    pub fn send_to(&self, key: &str, id: SubscriptionId, value: Option<&Value>) -> bool {
        let sink = match self.listeners.read().get(key).and_then(|by_id| by_id.get(&id)) {
            Some(listener) => listener.sink.clone(),
            None => return false,
        };

        match sink {
            Sink::Callback(callback) => match callback(value, key) {
                Ok(()) => true,
                Err(e) => {
                    let err = listener_failure(key, e);
                    error!(subscription = id.0, error = %err, "listener callback failed");
                    false
                }
            },
            Sink::Channel(sender) => sender
                .try_send(StoreEvent::Changed {
                    key: key.to_string(),
                    value: value.cloned(),
                })
                .is_ok(),
        }
    }

    pub fn contains(&self, key: &str, id: SubscriptionId) -> bool {
        self.listeners
            .read()
            .get(key)
            .is_some_and(|by_id| by_id.contains_key(&id))
    }

    /// Number of listeners on `key`.
    pub fn listener_count(&self, key: &str) -> usize {
        self.listeners.read().get(key).map_or(0, |by_id| by_id.len())
    }

    /// Total number of listeners.
    pub fn total_count(&self) -> usize {
        self.listeners.read().values().map(|by_id| by_id.len()).sum()
    }

    /// Deliver `value` to every listener on `key`, in registration order.
    ///
    /// A failing callback is logged and delivery continues. Channel
    /// listeners whose buffer is full or whose receiver is gone are dropped.
    /// Returns the number of listeners that received the value.
    pub fn notify(&self, key: &str, value: Option<&Value>) -> usize {
        let targets: Vec<(SubscriptionId, Sink)> = match self.listeners.read().get(key) {
            Some(by_id) => by_id
                .iter()
                .map(|(id, listener)| (*id, listener.sink.clone()))
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut to_drop = Vec::new();

        for (id, sink) in targets {
            // An earlier callback may have removed this listener
            if !self.contains(key, id) {
                continue;
            }

            match sink {
                Sink::Callback(callback) => match callback(value, key) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        let err = listener_failure(key, e);
                        error!(subscription = id.0, error = %err, "listener callback failed");
                    }
                },
                Sink::Channel(sender) => {
                    let event = StoreEvent::Changed {
                        key: key.to_string(),
                        value: value.cloned(),
                    };
                    match sender.try_send(event) {
                        Ok(()) => delivered += 1,
                        Err(crossbeam_channel::TrySendError::Full(_)) => {
                            to_drop.push((id, DropReason::BufferOverflow));
                        }
                        Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                            to_drop.push((id, DropReason::Disconnected));
                        }
                    }
                }
            }
        }

        if !to_drop.is_empty() {
            self.drop_channels(key, to_drop);
        }

        delivered
    }

    fn drop_channels(&self, key: &str, to_drop: Vec<(SubscriptionId, DropReason)>) {
        let mut listeners = self.listeners.write();
        if let Some(by_id) = listeners.get_mut(key) {
            for (id, reason) in to_drop {
                if let Some(listener) = by_id.remove(&id) {
                    debug!(key, subscription = id.0, ?reason, "dropping channel subscriber");
                    if let Sink::Channel(sender) = listener.sink {
                        // Might fail, that's ok
                        let _ = sender.try_send(StoreEvent::Dropped { reason });
                    }
                }
            }
            if by_id.is_empty() {
                listeners.remove(key);
            }
        }
    }
}

fn listener_failure(key: &str, e: Box<dyn std::error::Error + Send + Sync>) -> RuntimeError {
    RuntimeError::Listener {
        key: key.to_string(),
        reason: e.to_string(),
    }
}
