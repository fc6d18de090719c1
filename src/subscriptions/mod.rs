//! Key watchers for the reactive store.
//!
//! Two kinds of watchers share one registry:
//! - callbacks, invoked synchronously on every change of the watched key
//! - bounded channels receiving [`StoreEvent`]s, dropped when they fall behind
//!
//! # Example
//!
//! ```ignore
//! let registry = ListenerRegistry::new();
//!
//! let sub = registry.register_callback("theme", |value, key| {
//!     println!("{} is now {:?}", key, value);
//!     Ok(())
//! });
//! sub.on_remove(|| {
//!     println!("no longer watching");
//!     Ok(())
//! });
//!
//! registry.notify("theme", Some(&json!("dark")));
//! sub.remove();
//! ```

mod manager;
mod types;

pub use manager::ListenerRegistry;
pub use types::{
    Callback, CallbackResult, ChannelSubscription, DropReason, RemoveHook, StoreEvent,
    Subscription, SubscriptionId,
};
