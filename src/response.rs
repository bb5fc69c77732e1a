//! The response value the core reads and writes: status, headers, body.
//!
//! Modeled on the teacher's `HttpResponse` (`status`/`headers`/`body`), minus
//! the client-only `url`/`version` fields — store entries here are keyed by
//! the *request*, not by the response's own notion of its URL. Headers use
//! an [`IndexMap`] rather than a `HashMap` so the metastore's "persisted
//! request headers, in insertion order" invariant (spec.md §3) survives a
//! store round trip.

use indexmap::IndexMap;

/// `{status, headers, body}` as described in spec.md §3.
///
/// Header names are case-sensitive in lookups here; the pipeline is
/// expected to present them in canonical case (spec.md §9, "Header case").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, in insertion order.
    pub headers: IndexMap<String, String>,
    /// Response body.
    pub body: Vec<u8>,
}

impl CachedResponse {
    /// Builds an empty response with the given status.
    pub fn new(status: u16) -> Self {
        Self { status, headers: IndexMap::new(), body: Vec::new() }
    }

    /// Shorthand for `self.headers.get(name).map(String::as_str)`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Inserts or replaces a header.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Removes a header, returning its prior value if present.
    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.shift_remove(name)
    }
}

/// Well-known headers this crate reads and writes under a fixed case.
/// Anything outside this list falls back to `Train-Case`.
///
/// The source this crate is modeled on stores and looks up headers under
/// inconsistent case ("Etag" in some paths, "ETag" in others); callers here
/// are expected to run every header name through this function on ingress
/// so a single canonical form is used everywhere.
const WELL_KNOWN: &[(&str, &str)] = &[
    ("cache-control", "Cache-Control"),
    ("etag", "ETag"),
    ("last-modified", "Last-Modified"),
    ("if-none-match", "If-None-Match"),
    ("if-modified-since", "If-Modified-Since"),
    ("content-length", "Content-Length"),
    ("content-type", "Content-Type"),
    ("content-encoding", "Content-Encoding"),
    ("content-language", "Content-Language"),
    ("content-md5", "Content-MD5"),
    ("transfer-encoding", "Transfer-Encoding"),
    ("allow", "Allow"),
    ("vary", "Vary"),
    ("age", "Age"),
    ("date", "Date"),
    ("expires", "Expires"),
    ("pragma", "Pragma"),
    ("expect", "Expect"),
    ("host", "Host"),
    ("x-forwarded-proto", "X-Forwarded-Proto"),
    ("x-content-digest", "X-Content-Digest"),
    ("x-status", "X-Status"),
    ("x-plug-cache", "X-Plug-Cache"),
];

/// Canonicalizes a header name: well-known headers map to their fixed form,
/// anything else is title-cased per hyphen-separated segment.
pub fn canonical_header_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if let Some((_, canonical)) = WELL_KNOWN.iter().find(|(k, _)| *k == lower) {
        return canonical.to_string();
    }
    lower
        .split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn canonicalizes_well_known_headers() {
        assert_eq!(canonical_header_name("etag"), "ETag");
        assert_eq!(canonical_header_name("CACHE-CONTROL"), "Cache-Control");
        assert_eq!(canonical_header_name("If-None-Match"), "If-None-Match");
    }

    #[test]
    fn title_cases_unknown_headers() {
        assert_eq!(canonical_header_name("x-custom-thing"), "X-Custom-Thing");
    }
}
