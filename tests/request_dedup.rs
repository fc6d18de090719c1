//! Dispatcher tests against a scripted transport.

use client_runtime::{
    BlobPart, Method, Payload, RequestBody, RequestConfig, RequestDispatcher, RequestError,
    Transport, TransportError, TransportRequest, Translations, Value,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Records every call and answers once the gate is open.
struct MockTransport {
    calls: Mutex<Vec<TransportRequest>>,
    replies: Mutex<HashMap<String, Result<Value, TransportError>>>,
    gate: watch::Sender<bool>,
}

impl MockTransport {
    fn open() -> Arc<Self> {
        let transport = Self::gated();
        transport.release();
        transport
    }

    fn gated() -> Arc<Self> {
        let (gate, _) = watch::channel(false);
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            gate,
        })
    }

    fn release(&self) {
        self.gate.send_replace(true);
    }

    fn reply(&self, url: &str, reply: Result<Value, TransportError>) {
        self.replies.lock().insert(url.to_string(), reply);
    }

    fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().clone()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'static, Result<Value, TransportError>> {
        let reply = self
            .replies
            .lock()
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| Ok(json!({"method": request.method.as_str(), "url": request.url})));
        self.calls.lock().push(request);

        let mut gate = self.gate.subscribe();
        async move {
            let _ = gate.wait_for(|open| *open).await;
            reply
        }
        .boxed()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn dispatcher(transport: &Arc<MockTransport>) -> RequestDispatcher {
    RequestDispatcher::new(transport.clone(), RequestConfig::default())
}

// --- Deduplication ---

#[tokio::test]
async fn test_identical_requests_share_one_call() {
    let transport = MockTransport::gated();
    let requests = dispatcher(&transport);

    let a = requests.get("games/%%", 42u64);
    let b = requests.get("games/%%", 42u64);
    assert_eq!(requests.in_flight_count(), 1);

    transport.release();
    let (a, b) = futures::join!(a, b);

    assert_eq!(a, b);
    assert_eq!(a.unwrap()["url"], "/api/v1/games/42");
    assert_eq!(transport.calls().len(), 1);
    assert_eq!(requests.in_flight_count(), 0);
}

#[tokio::test]
async fn test_key_order_does_not_matter() {
    let transport = MockTransport::gated();
    let requests = dispatcher(&transport);

    let mut first = serde_json::Map::new();
    first.insert("x".to_string(), json!(3));
    first.insert("y".to_string(), json!(4));
    let mut second = serde_json::Map::new();
    second.insert("y".to_string(), json!(4));
    second.insert("x".to_string(), json!(3));

    let a = requests.post("games/%%/move", (1u64, Value::Object(first)));
    let b = requests.post("games/%%/move", (1u64, Value::Object(second)));

    transport.release();
    let _ = futures::join!(a, b);
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn test_different_payloads_are_separate_calls() {
    let transport = MockTransport::gated();
    let requests = dispatcher(&transport);

    let a = requests.post("games/%%/chat", (7u64, json!({"body": "hi"})));
    let b = requests.post("games/%%/chat", (7u64, json!({"body": "bye"})));
    let c = requests.put("games/%%/chat", (7u64, json!({"body": "hi"})));
    assert_eq!(requests.in_flight_count(), 3);

    transport.release();
    let (a, b, c) = futures::join!(a, b, c);

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(transport.calls().len(), 3);
}

#[tokio::test]
async fn test_settled_request_is_not_reused() {
    let transport = MockTransport::open();
    let requests = dispatcher(&transport);

    requests.get("me", ()).await.unwrap();
    requests.get("me", ()).await.unwrap();

    assert_eq!(transport.calls().len(), 2);
}

#[tokio::test]
async fn test_joined_callers_share_failure() {
    init_tracing();
    let transport = MockTransport::gated();
    transport.reply("/api/v1/games/1", Err(TransportError::status(404, "Not Found")));
    let requests = dispatcher(&transport);

    let a = requests.get("games/%%", 1u64);
    let b = requests.get("games/%%", 1u64);
    transport.release();
    let (a, b) = futures::join!(a, b);

    let err = a.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(b.unwrap_err(), err);
    assert_eq!(transport.calls().len(), 1);
    assert_eq!(requests.in_flight_count(), 0);
}

#[tokio::test]
async fn test_network_failure_is_not_an_abort() {
    init_tracing();
    let transport = MockTransport::open();
    transport.reply(
        "/api/v1/ui/config",
        Err(TransportError::Network("connection refused".to_string())),
    );
    let requests = dispatcher(&transport);

    let err = requests.get("ui/config", ()).await.unwrap_err();

    assert!(matches!(err, RequestError::Network { .. }));
    assert!(!err.is_aborted());
}

// --- Abort ---

#[tokio::test]
async fn test_abort_all_settles_and_frees_slots() {
    init_tracing();
    let transport = MockTransport::gated();
    let requests = dispatcher(&transport);

    let get = requests.get("games/%%", 5u64);
    let post = requests.post("games/%%", 5u64);
    let other = requests.get("games/%%", 6u64);
    tokio::task::yield_now().await;

    assert_eq!(requests.abort_all("games/5", Some(Method::Get)), 1);
    assert_eq!(requests.in_flight_count(), 2);

    let err = get.await.unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(
        err,
        RequestError::Aborted {
            method: Method::Get,
            url: "games/5".to_string(),
        }
    );

    // A new dispatch after the abort gets a fresh request
    let again = requests.get("games/%%", 5u64);
    assert_eq!(requests.in_flight_count(), 3);

    transport.release();
    assert!(again.await.is_ok());
    assert!(post.await.is_ok());
    assert!(other.await.is_ok());
}

#[tokio::test]
async fn test_abort_all_without_method() {
    let transport = MockTransport::gated();
    let requests = dispatcher(&transport);

    let a = requests.get("games/9", ());
    let b = requests.delete("games/9", ());

    assert_eq!(requests.abort_all("games/9", None), 2);
    assert_eq!(requests.abort_all("games/9", None), 0);

    assert!(a.await.unwrap_err().is_aborted());
    assert!(b.await.unwrap_err().is_aborted());
    assert_eq!(requests.in_flight_count(), 0);
}

// --- URL templates ---

#[tokio::test]
async fn test_url_resolution() {
    init_tracing();
    let transport = MockTransport::open();
    let requests = dispatcher(&transport);

    requests.get("games/%%", 42u64).await.unwrap();
    requests.get("games/%%", ()).await.unwrap();
    requests.get("games", 3u64).await.unwrap();
    requests.get("/api/v2/tournaments", ()).await.unwrap();

    let urls: Vec<_> = transport.calls().into_iter().map(|c| c.url).collect();
    assert_eq!(
        urls,
        vec![
            "/api/v1/games/42",
            "/api/v1/games/%%",
            "/api/v1/games",
            "/api/v2/tournaments",
        ]
    );
}

#[tokio::test]
async fn test_json_number_is_an_id() {
    let transport = MockTransport::open();
    let requests = dispatcher(&transport);

    requests.get("players/%%", json!(1001)).await.unwrap();

    assert_eq!(transport.calls()[0].url, "/api/v1/players/1001");
    assert_eq!(transport.calls()[0].body, RequestBody::Query(vec![]));
}

#[tokio::test]
async fn test_plain_integer_id() {
    let transport = MockTransport::open();
    let requests = dispatcher(&transport);

    requests.get("games/%%", 42).await.unwrap();
    requests.post("games/%%/chat", (7, json!({"body": "gg"}))).await.unwrap();

    let urls: Vec<_> = transport.calls().into_iter().map(|c| c.url).collect();
    assert_eq!(urls, vec!["/api/v1/games/42", "/api/v1/games/7/chat"]);
}

#[tokio::test]
async fn test_invalid_number_is_not_a_payload() {
    init_tracing();
    let transport = MockTransport::open();
    let requests = dispatcher(&transport);

    requests.get("games/%%", json!(-1)).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls[0].url, "/api/v1/games/%%");
    assert_eq!(calls[0].body, RequestBody::Query(vec![]));
}

// --- Body encoding ---

#[tokio::test]
async fn test_body_encoding_per_payload() {
    let transport = MockTransport::open();
    let requests = dispatcher(&transport);

    requests
        .get("games", json!({"page": 2, "ended": true}))
        .await
        .unwrap();
    requests.post("games", json!({"rules": "japanese"})).await.unwrap();
    requests
        .put(
            "me/icon",
            BlobPart::new(b"\x89PNG".to_vec(), "image/png").with_file_name("icon.png"),
        )
        .await
        .unwrap();

    let calls = transport.calls();
    assert_eq!(
        calls[0].body,
        RequestBody::Query(vec![
            ("ended".to_string(), "true".to_string()),
            ("page".to_string(), "2".to_string()),
        ])
    );
    assert!(calls[0].negotiate_json);

    assert_eq!(calls[1].body, RequestBody::Json(json!({"rules": "japanese"})));
    assert!(calls[1].negotiate_json);

    match &calls[2].body {
        RequestBody::Multipart(parts) => {
            assert_eq!(parts.len(), 1);
            assert_eq!(parts[0].file_name.as_deref(), Some("icon.png"));
        }
        other => panic!("expected multipart body, got {:?}", other),
    }
    assert!(!calls[2].negotiate_json);
}

#[tokio::test]
async fn test_empty_blob_list_is_sent_as_json() {
    let transport = MockTransport::open();
    let requests = dispatcher(&transport);

    requests.post("me/icons", Payload::Blobs(Vec::new())).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls[0].body, RequestBody::Json(json!([])));
    assert!(calls[0].negotiate_json);
}

// --- Translation ---

#[tokio::test]
async fn test_translations_apply_at_both_boundaries() {
    let transport = MockTransport::gated();
    let translations = Translations::new()
        .on_request(Method::Post, "games/%%/move", |payload| match payload {
            Payload::Json(v) => Payload::Json(json!({"move": v["coords"]})),
            other => other,
        })
        .on_response(Method::Post, "games/%%/move", |response| {
            json!({"accepted": response["url"]})
        });
    let requests = dispatcher(&transport).with_translations(translations);

    // Both payloads translate to the same server payload
    let a = requests.post("games/%%/move", (3u64, json!({"coords": "dd", "client": 1})));
    let b = requests.post("games/%%/move", (3u64, json!({"coords": "dd", "client": 2})));

    transport.release();
    let (a, b) = futures::join!(a, b);

    assert_eq!(a.unwrap(), json!({"accepted": "/api/v1/games/3/move"}));
    assert!(b.is_ok());

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].body, RequestBody::Json(json!({"move": "dd"})));
}

#[tokio::test]
async fn test_untranslated_response_passes_through() {
    let transport = MockTransport::open();
    transport.reply("/api/v1/me", Ok(json!({"id": 1, "username": "anon"})));
    let requests = dispatcher(&transport).with_translations(
        Translations::new().on_response(Method::Post, "me", |_| json!(null)),
    );

    let me = requests.get("me", ()).await.unwrap();

    assert_eq!(me, json!({"id": 1, "username": "anon"}));
}

// --- Task failure ---

/// Panics on its first call and answers normally afterwards.
struct FlakyTransport {
    calls: AtomicUsize,
}

impl Transport for FlakyTransport {
    fn send(&self, _request: TransportRequest) -> BoxFuture<'static, Result<Value, TransportError>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if call == 0 {
                panic!("transport crashed");
            }
            Ok(json!(call))
        }
        .boxed()
    }
}

#[tokio::test]
async fn test_crashed_request_frees_its_slot() {
    init_tracing();
    let transport = Arc::new(FlakyTransport {
        calls: AtomicUsize::new(0),
    });
    let requests = RequestDispatcher::new(transport.clone(), RequestConfig::default());

    let first = requests.get("games/%%", 1u64).await;
    assert!(matches!(first, Err(RequestError::Task(_))));
    assert_eq!(requests.in_flight_count(), 0);

    // The next identical dispatch reaches the transport again
    let second = requests.get("games/%%", 1u64).await;
    assert_eq!(second, Ok(json!(1)));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}
