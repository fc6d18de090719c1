//! URL template resolution.

use std::panic::Location;
use tracing::{error, warn};

/// Substitute `id` for `marker` in `template`.
///
/// Mismatches between the template and the arguments are usage mistakes:
/// they are logged with the call site and the template is used as-is.
pub fn resolve_url(
    template: &str,
    marker: &str,
    id: Option<u64>,
    origin: &'static Location<'static>,
) -> String {
    let has_marker = !marker.is_empty() && template.contains(marker);

    match (has_marker, id) {
        (true, Some(id)) => template.replacen(marker, &id.to_string(), 1),
        (true, None) => {
            error!(url = template, origin = %origin, "url contains an id but none was given");
            template.to_string()
        }
        (false, Some(id)) => {
            warn!(url = template, id, origin = %origin, "url doesn't contain an id but one was given");
            template.to_string()
        }
        (false, None) => template.to_string(),
    }
}

/// Normalise a resolved URL to an API path.
///
/// Paths that are already versioned, absolute or carry a scheme are left
/// untouched; anything else is placed under `prefix`.
pub fn api_path(url: &str, prefix: &str) -> String {
    if url.starts_with("/api/v") || url.starts_with('/') || url.contains("://") {
        return url.to_string();
    }
    format!("{}{}", prefix, url)
}
