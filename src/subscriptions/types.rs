//! Subscription types for key watchers.

use super::manager::ListenerRegistry;
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

/// Result of a listener callback or removal hook.
pub type CallbackResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Callback invoked with the new effective value of a key.
pub type Callback = Arc<dyn Fn(Option<&Value>, &str) -> CallbackResult + Send + Sync>;

/// Hook run once after a subscription is removed.
pub type RemoveHook = Box<dyn FnOnce() -> CallbackResult + Send + Sync>;

/// Unique identifier for a subscription.
///
/// Ids are allocated in registration order and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Events delivered to channel subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// The effective value of a watched key changed.
    Changed { key: String, value: Option<Value> },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a channel subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver was dropped.
    Disconnected,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Handle to a registered watcher.
///
/// Dropping the handle leaves the watcher registered; call
/// [`Subscription::remove`] to unregister it.
pub struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) key: String,
    pub(crate) registry: Weak<ListenerRegistry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Register a hook to run after this subscription is removed.
    ///
    /// Hooks run in registration order. A hook added to a subscription that
    /// is already gone is dropped without running.
    pub fn on_remove<F>(&self, hook: F)
    where
        F: FnOnce() -> CallbackResult + Send + Sync + 'static,
    {
        if let Some(registry) = self.registry.upgrade() {
            registry.add_remove_hook(&self.key, self.id, Box::new(hook));
        }
    }

    /// Whether the subscription is still registered.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.contains(&self.key, self.id))
    }

    /// Unregister and run the removal hooks.
    pub fn remove(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.key, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}

/// A watcher that receives [`StoreEvent`]s over a bounded channel.
pub struct ChannelSubscription {
    pub subscription: Subscription,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl ChannelSubscription {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Unregister the underlying subscription.
    pub fn remove(self) {
        self.subscription.remove()
    }
}
