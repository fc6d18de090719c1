//! # Client Runtime
//!
//! Shared client-side state for an interactive web client: a reactive,
//! persisted key-value store and a request layer that deduplicates
//! identical in-flight requests.
//!
//! ## Core Concepts
//!
//! - **Store**: Explicit values shadow defaults; explicit values are persisted
//! - **Watchers**: Callbacks or channels notified synchronously on change
//! - **Requests**: URL templates, payload translation, shared in-flight futures
//! - **Durable storage**: Pluggable string store (memory or checksummed files)
//!
//! ## Example
//!
//! ```ignore
//! use client_runtime::{ClientRuntime, RuntimeConfig};
//!
//! let runtime = ClientRuntime::open_http(RuntimeConfig::default())?;
//!
//! let sub = runtime.store().watch("theme", |value, key| {
//!     println!("{} -> {:?}", key, value);
//!     Ok(())
//! }, false);
//! runtime.store().set("theme", Some(json!("dark")));
//!
//! let game = runtime.requests().get("games/%%", 42u64).await?;
//! ```

pub mod config;
pub mod durable;
pub mod error;
pub mod requests;
pub mod runtime;
pub mod state;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use config::{RequestConfig, RuntimeConfig, StoreConfig};
pub use durable::{DurableStore, FileDurableStore, MemoryDurableStore};
pub use error::{RequestError, Result, RuntimeError, TransportError};
pub use requests::{
    RequestArgs, RequestBody, RequestDispatcher, ReqwestTransport, ResponseFuture, Transport,
    TransportRequest, Translations,
};
pub use runtime::ClientRuntime;
pub use state::{LoadStats, PersistentStore, StoreEntry};
pub use store::{DumpEntry, ReactiveStore};
pub use subscriptions::{
    ChannelSubscription, DropReason, ListenerRegistry, StoreEvent, Subscription, SubscriptionId,
};
pub use types::*;
