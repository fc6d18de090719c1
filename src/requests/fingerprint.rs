//! Request identity for deduplication.
//!
//! Two requests are the same when their method, resolved URL and payload
//! match structurally. The payload is reduced to a SHA-256 digest of a
//! canonical serialization, so a fingerprint can be used directly as a map
//! key instead of comparing payloads pairwise.

use crate::types::{BlobPart, Method, Payload, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identity of an outstanding request.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    method: Method,
    url: String,
    payload: [u8; 32],
}

impl Fingerprint {
    /// Compute the fingerprint of `payload` sent with `method` to `url`.
    pub fn new(method: Method, url: &str, payload: &Payload) -> Self {
        Self {
            method,
            url: url.to_string(),
            payload: payload_digest(payload),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Hex form of the payload digest.
    pub fn payload_hex(&self) -> String {
        hex::encode(self.payload)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fingerprint({} {} {}...)",
            self.method,
            self.url,
            &self.payload_hex()[..8]
        )
    }
}

fn payload_digest(payload: &Payload) -> [u8; 32] {
    let mut hasher = Sha256::new();
    match payload {
        Payload::Json(value) => {
            hasher.update(b"json\0");
            hasher.update(canonical_json(value).as_bytes());
        }
        Payload::Blob(blob) => {
            hasher.update(b"blob\0");
            hash_blob(&mut hasher, blob);
        }
        Payload::Blobs(blobs) => {
            hasher.update(b"blobs\0");
            hasher.update((blobs.len() as u64).to_le_bytes());
            for blob in blobs {
                hash_blob(&mut hasher, blob);
            }
        }
    }
    hasher.finalize().into()
}

fn hash_blob(hasher: &mut Sha256, blob: &BlobPart) {
    let name = blob.file_name.as_deref().unwrap_or("");
    for field in [name.as_bytes(), blob.content_type.as_bytes(), blob.content.as_slice()] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
}

/// Serialize `value` with object keys sorted at every level.
///
/// Integral floats are written as integers so that `1` and `1.0` compare
/// equal, as they would in the browser.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
                out.push_str(&(f as i64).to_string())
            }
            _ => out.push_str(&n.to_string()),
        },
        Value::String(s) => out.push_str(&Value::String(s.clone()).to_string()),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}
