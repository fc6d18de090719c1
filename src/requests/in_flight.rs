//! Bookkeeping for outstanding requests.

use super::fingerprint::Fingerprint;
use crate::error::RequestError;
use crate::types::{Method, RequestId, Value};
use futures::future::{BoxFuture, Shared};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::Location;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Final outcome of a dispatched request.
pub type RequestResult = Result<Value, RequestError>;

/// Future handed to every caller of a request; joined callers get clones.
pub type ResponseFuture = Shared<BoxFuture<'static, RequestResult>>;

/// A request whose transport call has not settled yet.
pub struct PendingRequest {
    pub id: RequestId,
    pub method: Method,
    /// Resolved URL (marker substituted, before API path normalisation).
    pub url: String,
    pub fingerprint: Fingerprint,
    pub response: ResponseFuture,
    pub cancel: CancellationToken,
    /// Call site of the dispatch that created the request.
    pub origin: &'static Location<'static>,
    pub started: Instant,
}

impl PendingRequest {
    /// Signal the transport call to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("origin", &self.origin)
            .field("elapsed", &self.started.elapsed())
            .finish()
    }
}

/// Pending requests indexed by id and by fingerprint.
///
/// Invariant: every fingerprint in the index points at a live entry, and at
/// most one pending request exists per fingerprint.
#[derive(Debug, Default)]
pub struct InFlightTable {
    entries: BTreeMap<RequestId, PendingRequest>,
    by_fingerprint: HashMap<Fingerprint, RequestId>,
    next_id: u64,
}

impl InFlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next request id. Ids are never reused.
    pub fn allocate_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId(self.next_id)
    }

    /// Pending request with the same fingerprint, if any.
    pub fn find(&self, fingerprint: &Fingerprint) -> Option<&PendingRequest> {
        self.by_fingerprint
            .get(fingerprint)
            .and_then(|id| self.entries.get(id))
    }

    pub fn insert(&mut self, request: PendingRequest) {
        self.by_fingerprint
            .insert(request.fingerprint.clone(), request.id);
        self.entries.insert(request.id, request);
    }

    /// Remove a settled request. Returns `None` if it was already removed
    /// (for instance by an abort).
    pub fn remove(&mut self, id: RequestId) -> Option<PendingRequest> {
        let request = self.entries.remove(&id)?;
        if self.by_fingerprint.get(&request.fingerprint) == Some(&id) {
            self.by_fingerprint.remove(&request.fingerprint);
        }
        Some(request)
    }

    /// Remove every request to `url`, restricted to `method` when given.
    pub fn take_matching(&mut self, url: &str, method: Option<Method>) -> Vec<PendingRequest> {
        let ids: Vec<RequestId> = self
            .entries
            .values()
            .filter(|r| r.url == url && method.map_or(true, |m| r.method == m))
            .map(|r| r.id)
            .collect();

        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
