//! Translation between client payloads and server wire shapes.
//!
//! Translators are looked up by method and URL template (the template as
//! passed to the dispatcher, before id substitution). A missing entry means
//! the payload or response passes through unchanged.

use crate::types::{Method, Payload, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Outbound payload transform.
pub type RequestTranslator = Arc<dyn Fn(Payload) -> Payload + Send + Sync>;

/// Inbound response transform.
pub type ResponseTranslator = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Translation tables keyed by (method, URL template).
#[derive(Clone, Default)]
pub struct Translations {
    to_server: HashMap<Method, HashMap<String, RequestTranslator>>,
    from_server: HashMap<Method, HashMap<String, ResponseTranslator>>,
}

impl Translations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outbound transform for `method` on `template`.
    pub fn on_request<F>(mut self, method: Method, template: &str, f: F) -> Self
    where
        F: Fn(Payload) -> Payload + Send + Sync + 'static,
    {
        self.to_server
            .entry(method)
            .or_default()
            .insert(template.to_string(), Arc::new(f));
        self
    }

    /// Register an inbound transform for `method` on `template`.
    pub fn on_response<F>(mut self, method: Method, template: &str, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.from_server
            .entry(method)
            .or_default()
            .insert(template.to_string(), Arc::new(f));
        self
    }

    pub fn request_translator(&self, method: Method, template: &str) -> Option<RequestTranslator> {
        self.to_server.get(&method)?.get(template).cloned()
    }

    pub fn response_translator(
        &self,
        method: Method,
        template: &str,
    ) -> Option<ResponseTranslator> {
        self.from_server.get(&method)?.get(template).cloned()
    }

    /// Apply the outbound transform, if any.
    pub fn to_server(&self, method: Method, template: &str, payload: Payload) -> Payload {
        match self.request_translator(method, template) {
            Some(translate) => translate(payload),
            None => payload,
        }
    }

    /// Apply the inbound transform, if any.
    pub fn from_server(&self, method: Method, template: &str, response: Value) -> Value {
        match self.response_translator(method, template) {
            Some(translate) => translate(response),
            None => response,
        }
    }
}

impl std::fmt::Debug for Translations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let to_server: usize = self.to_server.values().map(|by_url| by_url.len()).sum();
        let from_server: usize = self.from_server.values().map(|by_url| by_url.len()).sum();
        f.debug_struct("Translations")
            .field("to_server", &to_server)
            .field("from_server", &from_server)
            .finish()
    }
}
