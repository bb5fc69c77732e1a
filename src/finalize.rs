//! The outbound finalizer (spec.md §4.6): writes the trace header, and
//! short-circuits conditional GETs/HEADs into a 304 or empty-bodied HEAD.
//!
//! Per the Design Note in spec.md §9 ("Before-send hook... invert
//! control"), this crate has no registered callback type — `finalize` is
//! called inline by [`crate::pipeline`] once the outbound response (from
//! cache or from the origin) is known.

use indexmap::IndexMap;

use crate::response::CachedResponse;

/// Headers a 304 must never carry (spec.md §3, invariant 6).
const OMIT_ON_304: &[&str] = &[
    "Allow",
    "Content-Encoding",
    "Content-Language",
    "Content-Length",
    "Content-MD5",
    "Content-Type",
    "Last-Modified",
];

/// `not_modified?(req, res)` (spec.md §4.6).
pub fn not_modified(request_headers: &IndexMap<String, String>, response: &CachedResponse) -> bool {
    let first = request_headers
        .iter()
        .find(|(name, _)| name.as_str() == "If-None-Match" || name.as_str() == "If-Modified-Since");

    match first {
        Some((name, value)) if name == "If-None-Match" => {
            let req_etags: Vec<&str> = value.split(',').map(str::trim).collect();
            match response.header("ETag") {
                None => req_etags.contains(&"*"),
                Some(resp_etag) => {
                    let etag_matches = req_etags.contains(&"*") || req_etags.contains(&resp_etag);
                    match request_headers.get("If-Modified-Since") {
                        None => etag_matches,
                        Some(ims) => {
                            etag_matches && response.header("Last-Modified") == Some(ims.as_str())
                        }
                    }
                }
            }
        }
        Some((name, value)) if name == "If-Modified-Since" => {
            response.header("Last-Modified") == Some(value.as_str())
        }
        _ => false,
    }
}

/// Runs the finalizer: stamps `X-Plug-Cache`, then applies the 304/HEAD
/// hygiene rules.
pub fn finalize(
    method: &str,
    request_headers: &IndexMap<String, String>,
    trace: &[String],
    response: &mut CachedResponse,
) {
    response.set_header("X-Plug-Cache", trace.join(", "));

    let is_get_or_head = method == "GET" || method == "HEAD";
    if is_get_or_head && not_modified(request_headers, response) {
        for name in OMIT_ON_304 {
            response.remove_header(name);
        }
        response.status = 304;
        response.body.clear();
    } else if method == "HEAD" {
        response.body.clear();
    }
}
