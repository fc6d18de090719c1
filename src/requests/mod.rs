//! Request layer: URL templates, payload translation, in-flight
//! deduplication and the HTTP transport.
//!
//! Identical requests issued while one is still outstanding share a single
//! transport call and its outcome:
//!
//! ```ignore
//! let dispatcher = RequestDispatcher::new(Arc::new(ReqwestTransport::new(&config)), config);
//!
//! let a = dispatcher.get("games/%%", 42u64);
//! let b = dispatcher.get("games/%%", 42u64); // joins `a`
//! let (a, b) = futures::join!(a, b);
//! ```

mod dispatcher;
mod fingerprint;
mod in_flight;
mod translate;
mod transport;
mod url;

pub use dispatcher::{RequestArgs, RequestDispatcher};
pub use fingerprint::{canonical_json, Fingerprint};
pub use in_flight::{InFlightTable, PendingRequest, RequestResult, ResponseFuture};
pub use translate::{RequestTranslator, ResponseTranslator, Translations};
pub use transport::{
    encode_body, query_pairs, ReqwestTransport, RequestBody, Transport, TransportRequest,
};
pub use url::{api_path, resolve_url};
