//! Request dispatcher with in-flight deduplication.

use super::fingerprint::Fingerprint;
use super::in_flight::{InFlightTable, PendingRequest, RequestResult, ResponseFuture};
use super::transport::{encode_body, Transport, TransportRequest};
use super::translate::Translations;
use super::url::{api_path, resolve_url};
use crate::config::RequestConfig;
use crate::error::{RequestError, TransportError};
use crate::types::{BlobPart, Method, Payload, RequestId, Value};
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::Location;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Arguments of a dispatch: an optional URL id and an optional payload.
///
/// A missing payload is sent as an empty JSON object.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum RequestArgs {
    #[default]
    None,
    Id(u64),
    Payload(Payload),
    IdAndPayload(u64, Payload),
}

impl RequestArgs {
    pub fn split(self) -> (Option<u64>, Payload) {
        match self {
            RequestArgs::None => (None, Payload::empty()),
            RequestArgs::Id(id) => (Some(id), Payload::empty()),
            RequestArgs::Payload(payload) => (None, payload),
            RequestArgs::IdAndPayload(id, payload) => (Some(id), payload),
        }
    }
}

impl From<()> for RequestArgs {
    fn from(_: ()) -> Self {
        RequestArgs::None
    }
}

impl From<u64> for RequestArgs {
    fn from(id: u64) -> Self {
        RequestArgs::Id(id)
    }
}

impl From<u32> for RequestArgs {
    fn from(id: u32) -> Self {
        RequestArgs::Id(u64::from(id))
    }
}

impl From<usize> for RequestArgs {
    fn from(id: usize) -> Self {
        RequestArgs::Id(id as u64)
    }
}

impl From<i32> for RequestArgs {
    fn from(id: i32) -> Self {
        signed_id(i64::from(id)).map_or(RequestArgs::None, RequestArgs::Id)
    }
}

impl From<i64> for RequestArgs {
    fn from(id: i64) -> Self {
        signed_id(id).map_or(RequestArgs::None, RequestArgs::Id)
    }
}

/// A JSON number is an id; anything else is the payload.
///
/// Numbers that are not non-negative integers are logged and dropped.
impl From<Value> for RequestArgs {
    fn from(value: Value) -> Self {
        match value {
            Value::Number(n) => match n.as_u64() {
                Some(id) => RequestArgs::Id(id),
                None => {
                    warn!(id = %n, "not a valid request id, ignoring it");
                    RequestArgs::None
                }
            },
            value => RequestArgs::Payload(Payload::Json(value)),
        }
    }
}

impl From<(i32, Value)> for RequestArgs {
    fn from((id, value): (i32, Value)) -> Self {
        with_signed_id(i64::from(id), Payload::Json(value))
    }
}

impl From<(i32, Payload)> for RequestArgs {
    fn from((id, payload): (i32, Payload)) -> Self {
        with_signed_id(i64::from(id), payload)
    }
}

fn signed_id(id: i64) -> Option<u64> {
    let valid = u64::try_from(id).ok();
    if valid.is_none() {
        warn!(id, "not a valid request id, ignoring it");
    }
    valid
}

fn with_signed_id(id: i64, payload: Payload) -> RequestArgs {
    match signed_id(id) {
        Some(id) => RequestArgs::IdAndPayload(id, payload),
        None => RequestArgs::Payload(payload),
    }
}

impl From<Payload> for RequestArgs {
    fn from(payload: Payload) -> Self {
        RequestArgs::Payload(payload)
    }
}

impl From<BlobPart> for RequestArgs {
    fn from(blob: BlobPart) -> Self {
        RequestArgs::Payload(Payload::Blob(blob))
    }
}

impl From<(u64, Value)> for RequestArgs {
    fn from((id, value): (u64, Value)) -> Self {
        RequestArgs::IdAndPayload(id, Payload::Json(value))
    }
}

impl From<(u64, Payload)> for RequestArgs {
    fn from((id, payload): (u64, Payload)) -> Self {
        RequestArgs::IdAndPayload(id, payload)
    }
}

/// Issues requests through a [`Transport`], joining identical requests that
/// are already in flight.
pub struct RequestDispatcher {
    transport: Arc<dyn Transport>,
    translations: Arc<Translations>,
    in_flight: Arc<Mutex<InFlightTable>>,
    config: RequestConfig,
}

impl RequestDispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: RequestConfig) -> Self {
        Self {
            transport,
            translations: Arc::new(Translations::new()),
            in_flight: Arc::new(Mutex::new(InFlightTable::new())),
            config,
        }
    }

    pub fn with_translations(mut self, translations: Translations) -> Self {
        self.translations = Arc::new(translations);
        self
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    /// Dispatch a request and return a future of its translated response.
    ///
    /// If an identical request (same method, resolved URL and translated
    /// payload) is still in flight, its future is returned instead and no
    /// new transport call is made. The transport call starts immediately on
    /// the current tokio runtime whether or not the future is polled.
    #[track_caller]
    pub fn dispatch(
        &self,
        method: Method,
        template: &str,
        args: impl Into<RequestArgs>,
    ) -> ResponseFuture {
        let origin = Location::caller();
        let (id, payload) = args.into().split();

        let url = resolve_url(template, &self.config.id_marker, id, origin);
        let payload = self.translations.to_server(method, template, payload);
        let fingerprint = Fingerprint::new(method, &url, &payload);

        let mut table = self.in_flight.lock();
        if let Some(existing) = table.find(&fingerprint) {
            debug!(id = %existing.id, method = %method, url = %url, "joining in-flight request");
            return existing.response.clone();
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(method = %method, url = %url, origin = %origin, "dispatch outside a tokio runtime");
                let failed: RequestResult = Err(RequestError::Task(e.to_string()));
                return futures::future::ready(failed).boxed().shared();
            }
        };

        let request_id = table.allocate_id();
        let cancel = CancellationToken::new();
        let (body, negotiate_json) = encode_body(method, payload);
        let request = TransportRequest {
            method,
            url: api_path(&url, &self.config.api_prefix),
            body,
            negotiate_json,
        };

        let task = handle.spawn(run_request(
            Arc::clone(&self.transport),
            Arc::clone(&self.in_flight),
            request,
            Settle {
                id: request_id,
                method,
                url: url.clone(),
                template: template.to_string(),
                origin,
                cancel: cancel.clone(),
                translations: Arc::clone(&self.translations),
            },
        ));

        let slots = Arc::clone(&self.in_flight);
        let response: ResponseFuture = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    // A task cancelled before its first poll never held a slot guard
                    slots.lock().remove(request_id);
                    warn!(id = %request_id, origin = %origin, error = %e, "request task failed");
                    Err(RequestError::Task(e.to_string()))
                }
            }
        }
        .boxed()
        .shared();

        debug!(id = %request_id, method = %method, url = %url, "dispatching request");
        table.insert(PendingRequest {
            id: request_id,
            method,
            url,
            fingerprint,
            response: response.clone(),
            cancel,
            origin,
            started: Instant::now(),
        });

        response
    }

    #[track_caller]
    pub fn get(&self, template: &str, args: impl Into<RequestArgs>) -> ResponseFuture {
        self.dispatch(Method::Get, template, args)
    }

    #[track_caller]
    pub fn post(&self, template: &str, args: impl Into<RequestArgs>) -> ResponseFuture {
        self.dispatch(Method::Post, template, args)
    }

    #[track_caller]
    pub fn put(&self, template: &str, args: impl Into<RequestArgs>) -> ResponseFuture {
        self.dispatch(Method::Put, template, args)
    }

    #[track_caller]
    pub fn patch(&self, template: &str, args: impl Into<RequestArgs>) -> ResponseFuture {
        self.dispatch(Method::Patch, template, args)
    }

    #[track_caller]
    pub fn delete(&self, template: &str, args: impl Into<RequestArgs>) -> ResponseFuture {
        self.dispatch(Method::Delete, template, args)
    }

    /// Abort every in-flight request to the resolved `url`, restricted to
    /// `method` when given.
    ///
    /// Aborted requests leave the table at once and their futures settle
    /// with [`RequestError::Aborted`]. Returns how many were aborted.
    pub fn abort_all(&self, url: &str, method: Option<Method>) -> usize {
        let aborted = self.in_flight.lock().take_matching(url, method);
        for request in &aborted {
            debug!(id = %request.id, method = %request.method, url = %request.url, "aborting request");
            request.cancel();
        }
        aborted.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

struct Settle {
    id: RequestId,
    method: Method,
    url: String,
    template: String,
    origin: &'static Location<'static>,
    cancel: CancellationToken,
    translations: Arc<Translations>,
}

/// Frees a request's table slot when its task ends, however it ends.
struct SlotGuard {
    in_flight: Arc<Mutex<InFlightTable>>,
    id: RequestId,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(self.id);
    }
}

async fn run_request(
    transport: Arc<dyn Transport>,
    in_flight: Arc<Mutex<InFlightTable>>,
    request: TransportRequest,
    settle: Settle,
) -> RequestResult {
    let slot = SlotGuard {
        in_flight,
        id: settle.id,
    };

    let outcome = tokio::select! {
        biased;
        _ = settle.cancel.cancelled() => Err(TransportError::Aborted),
        result = transport.send(request) => result,
    };

    drop(slot);

    match outcome {
        Ok(value) => Ok(settle
            .translations
            .from_server(settle.method, &settle.template, value)),
        Err(err) => {
            match &err {
                TransportError::Aborted => {
                    debug!(id = %settle.id, method = %settle.method, url = %settle.url, "request aborted");
                }
                TransportError::Status {
                    status,
                    status_text,
                } => {
                    warn!(
                        method = %settle.method,
                        url = %settle.url,
                        status,
                        status_text = %status_text,
                        origin = %settle.origin,
                        "request failed"
                    );
                }
                TransportError::Network(message) => {
                    warn!(
                        method = %settle.method,
                        url = %settle.url,
                        error = %message,
                        origin = %settle.origin,
                        "request failed"
                    );
                }
            }
            Err(RequestError::from_transport(settle.method, &settle.url, err))
        }
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("translations", &self.translations)
            .field("in_flight", &self.in_flight_count())
            .field("config", &self.config)
            .finish()
    }
}
