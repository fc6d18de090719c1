//! Transport boundary and request body encoding.

use crate::config::RequestConfig;
use crate::error::TransportError;
use crate::types::{BlobPart, Method, Payload, Value};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::ACCEPT;

/// Encoded request body.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    /// No body and no query parameters.
    Empty,
    /// Query string parameters (read-style methods).
    Query(Vec<(String, String)>),
    /// JSON document.
    Json(Value),
    /// Multipart form data, one `file` part per blob.
    Multipart(Vec<BlobPart>),
}

/// A single call handed to a [`Transport`].
#[derive(Clone, Debug, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    /// API path (or absolute URL) to call.
    pub url: String,
    pub body: RequestBody,
    /// Whether to negotiate JSON content for this call.
    pub negotiate_json: bool,
}

/// Encode a translated payload for `method`.
///
/// Blobs become multipart form data and switch off JSON negotiation. JSON
/// payloads go in the query string for reads and in the body otherwise;
/// `null` sends nothing. An empty blob list has no file to upload and is
/// sent as an empty JSON array.
pub fn encode_body(method: Method, payload: Payload) -> (RequestBody, bool) {
    match payload {
        Payload::Blob(blob) => (RequestBody::Multipart(vec![blob]), false),
        Payload::Blobs(blobs) if blobs.is_empty() => {
            encode_body(method, Payload::Json(Value::Array(Vec::new())))
        }
        Payload::Blobs(blobs) => (RequestBody::Multipart(blobs), false),
        Payload::Json(Value::Null) => (RequestBody::Empty, true),
        Payload::Json(value) if method.is_read() => (RequestBody::Query(query_pairs(&value)), true),
        Payload::Json(value) => (RequestBody::Json(value), true),
    }
}

/// Flatten a JSON object into query pairs.
///
/// Nested objects use `a[b]=c`, arrays of scalars repeat `a[]=x`, and
/// arrays of structures are indexed `a[0][b]=c`.
pub fn query_pairs(value: &Value) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if let Value::Object(map) = value {
        for (key, value) in map {
            push_pairs(key, value, &mut pairs);
        }
    }
    pairs
}

fn push_pairs(name: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => out.push((name.to_string(), String::new())),
        Value::Bool(b) => out.push((name.to_string(), b.to_string())),
        Value::Number(n) => out.push((name.to_string(), n.to_string())),
        Value::String(s) => out.push((name.to_string(), s.clone())),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let child = if item.is_object() || item.is_array() {
                    format!("{}[{}]", name, i)
                } else {
                    format!("{}[]", name)
                };
                push_pairs(&child, item, out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                push_pairs(&format!("{}[{}]", name, key), item, out);
            }
        }
    }
}

/// Issues HTTP calls on behalf of the dispatcher.
///
/// Dropping the returned future must cancel the call.
pub trait Transport: Send + Sync {
    fn send(&self, request: TransportRequest) -> BoxFuture<'static, Result<Value, TransportError>>;
}

/// [`Transport`] over a `reqwest` client.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    csrf_token: Option<String>,
}

impl ReqwestTransport {
    pub fn new(config: &RequestConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &RequestConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            csrf_token: config.csrf_token.clone(),
        }
    }

    fn full_url(&self, url: &str) -> String {
        if url.contains("://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }

    fn build(&self, request: TransportRequest) -> Result<reqwest::RequestBuilder, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, self.full_url(&request.url));

        if request.negotiate_json {
            builder = builder.header(ACCEPT, "application/json");
        }
        if !request.method.is_csrf_safe() {
            if let Some(token) = &self.csrf_token {
                builder = builder.header("X-CSRFToken", token);
            }
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Query(pairs) => builder.query(&pairs),
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart(blobs) => {
                let mut form = reqwest::multipart::Form::new();
                for blob in blobs {
                    let mut part = reqwest::multipart::Part::bytes(blob.content)
                        .mime_str(&blob.content_type)
                        .map_err(|e| TransportError::Network(e.to_string()))?;
                    if let Some(name) = blob.file_name {
                        part = part.file_name(name);
                    }
                    form = form.part("file", part);
                }
                builder.multipart(form)
            }
        };

        Ok(builder)
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'static, Result<Value, TransportError>> {
        let builder = self.build(request);

        async move {
            let response = builder?
                .send()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;

            if !status.is_success() {
                return Err(TransportError::status(
                    status.as_u16(),
                    status.canonical_reason().unwrap_or(""),
                ));
            }

            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&text)
                .map_err(|_| TransportError::status(status.as_u16(), "parsererror"))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::CONTENT_TYPE;
    use serde_json::json;

    #[test]
    fn test_encode_blob_as_multipart() {
        let blob = BlobPart::new(b"data".to_vec(), "image/png").with_file_name("icon.png");

        let (body, negotiate) = encode_body(Method::Post, Payload::Blob(blob.clone()));
        assert_eq!(body, RequestBody::Multipart(vec![blob.clone()]));
        assert!(!negotiate);

        // Blobs win over the read-style query encoding too
        let (body, negotiate) = encode_body(Method::Get, Payload::Blobs(vec![blob.clone(), blob]));
        assert!(matches!(body, RequestBody::Multipart(ref parts) if parts.len() == 2));
        assert!(!negotiate);
    }

    #[test]
    fn test_encode_empty_blob_list_as_json() {
        let (body, negotiate) = encode_body(Method::Post, Payload::Blobs(Vec::new()));
        assert_eq!(body, RequestBody::Json(json!([])));
        assert!(negotiate);

        let (body, _) = encode_body(Method::Get, Payload::Blobs(Vec::new()));
        assert_eq!(body, RequestBody::Query(Vec::new()));
    }

    #[test]
    fn test_encode_get_as_query() {
        let (body, negotiate) =
            encode_body(Method::Get, Payload::Json(json!({"page": 2, "ordering": "-id"})));
        assert_eq!(
            body,
            RequestBody::Query(vec![
                ("ordering".to_string(), "-id".to_string()),
                ("page".to_string(), "2".to_string()),
            ])
        );
        assert!(negotiate);
    }

    #[test]
    fn test_encode_other_methods_as_json() {
        let (body, negotiate) = encode_body(Method::Put, Payload::Json(json!({"a": [1, 2]})));
        assert_eq!(body, RequestBody::Json(json!({"a": [1, 2]})));
        assert!(negotiate);

        let (body, _) = encode_body(Method::Delete, Payload::Json(Value::Null));
        assert_eq!(body, RequestBody::Empty);
    }

    #[test]
    fn test_query_pairs_nesting() {
        let pairs = query_pairs(&json!({
            "ids": [1, 2],
            "filter": {"rank": 5, "tags": ["a"]},
            "rows": [{"x": 1}],
            "none": null,
        }));
        assert_eq!(
            pairs,
            vec![
                ("filter[rank]".to_string(), "5".to_string()),
                ("filter[tags][]".to_string(), "a".to_string()),
                ("ids[]".to_string(), "1".to_string()),
                ("ids[]".to_string(), "2".to_string()),
                ("none".to_string(), String::new()),
                ("rows[0][x]".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_query_pairs_ignore_non_objects() {
        assert!(query_pairs(&json!([1, 2])).is_empty());
        assert!(query_pairs(&json!("x")).is_empty());
    }

    #[test]
    fn test_reqwest_build_headers() {
        let transport = ReqwestTransport::new(&RequestConfig {
            base_url: "https://example.com/".to_string(),
            csrf_token: Some("tok".to_string()),
            ..Default::default()
        });

        let request = transport
            .build(TransportRequest {
                method: Method::Post,
                url: "/api/v1/games".to_string(),
                body: RequestBody::Json(json!({})),
                negotiate_json: true,
            })
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.url().as_str(), "https://example.com/api/v1/games");
        assert_eq!(request.headers()["X-CSRFToken"], "tok");
        assert_eq!(request.headers()[CONTENT_TYPE], "application/json");

        let request = transport
            .build(TransportRequest {
                method: Method::Get,
                url: "/api/v1/games".to_string(),
                body: RequestBody::Query(vec![("page".to_string(), "2".to_string())]),
                negotiate_json: true,
            })
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.url().query(), Some("page=2"));
        assert!(request.headers().get("X-CSRFToken").is_none());
    }
}
