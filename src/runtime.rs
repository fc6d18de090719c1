//! Composition of the store and the request layer.

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::requests::{RequestDispatcher, ReqwestTransport, Transport, Translations};
use crate::store::ReactiveStore;
use std::sync::Arc;
use tracing::info;

/// Shared client state: one reactive store and one request dispatcher.
///
/// Every instance is independent, so tests and embedders can hold as many
/// as they need.
#[derive(Debug)]
pub struct ClientRuntime {
    store: ReactiveStore,
    requests: RequestDispatcher,
}

impl ClientRuntime {
    /// Open a runtime issuing requests through `transport`.
    pub fn open(config: RuntimeConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let store = ReactiveStore::from_config(&config.store)?;
        let stats = store.load_stats();
        info!(
            namespace = store.namespace(),
            loaded = stats.loaded,
            purged = stats.purged,
            "opened client runtime"
        );

        Ok(Self {
            store,
            requests: RequestDispatcher::new(transport, config.requests),
        })
    }

    /// Open a runtime talking HTTP to `config.requests.base_url`.
    pub fn open_http(config: RuntimeConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config.requests));
        Self::open(config, transport)
    }

    pub fn with_translations(mut self, translations: Translations) -> Self {
        self.requests = self.requests.with_translations(translations);
        self
    }

    pub fn store(&self) -> &ReactiveStore {
        &self.store
    }

    pub fn requests(&self) -> &RequestDispatcher {
        &self.requests
    }
}
