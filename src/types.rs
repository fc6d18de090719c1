//! Core types shared by the store and the request layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A stored or transmitted JSON value.
pub type Value = serde_json::Value;

/// Unique identifier for an in-flight request.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HTTP method of a dispatched request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Read-style methods carry their payload in the query string.
    pub fn is_read(&self) -> bool {
        matches!(self, Method::Get)
    }

    /// Methods that do not need a CSRF token.
    pub fn is_csrf_safe(&self) -> bool {
        matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(format!("unsupported method: {}", other)),
        }
    }
}

/// A binary upload.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BlobPart {
    pub file_name: Option<String>,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl BlobPart {
    pub fn new(content: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            file_name: None,
            content_type: content_type.into(),
            content: content.into(),
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

impl fmt::Debug for BlobPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobPart")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.content.len())
            .finish()
    }
}

/// Outbound request payload.
///
/// The variant decides the body encoding: blobs go out as multipart form
/// data, everything else as JSON (or query parameters for reads).
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Json(Value),
    Blob(BlobPart),
    Blobs(Vec<BlobPart>),
}

impl Payload {
    /// The default payload: an empty JSON object.
    pub fn empty() -> Self {
        Payload::Json(Value::Object(Default::default()))
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Payload::Blob(_) | Payload::Blobs(_))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::empty()
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Payload::Json(v)
    }
}

impl From<BlobPart> for Payload {
    fn from(b: BlobPart) -> Self {
        Payload::Blob(b)
    }
}

impl From<Vec<BlobPart>> for Payload {
    fn from(b: Vec<BlobPart>) -> Self {
        Payload::Blobs(b)
    }
}
