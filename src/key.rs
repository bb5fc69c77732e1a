//! Derives a canonical cache key from a request (spec.md §4.3).

use http::request::Parts;
use http::HeaderMap;

use crate::error::Result;

/// The request-identifying components a cache key is built from.
///
/// Grounded in the teacher's `extract_url_from_request_parts` /
/// `determine_scheme` helpers (`http-cache/src/lib.rs`), generalized to
/// return the components directly rather than assembling an intermediate
/// `url::Url` — the key derivation here needs scheme/host/port/path/query
/// individually (spec.md §4.3 steps 1-4), not a parsed URL object.
#[derive(Debug, Clone, Copy)]
pub struct KeyParts<'a> {
    /// `http` or `https`.
    pub scheme: &'a str,
    /// The request's host, without port.
    pub host: &'a str,
    /// The request's port.
    pub port: u16,
    /// Mount-point prefix ahead of `path`; empty unless the pipeline is
    /// mounted under a sub-path.
    pub script_name: &'a str,
    /// The path, not including the mount-point prefix.
    pub path: &'a str,
    /// The raw (still percent-encoded) query string, without the leading `?`.
    pub query: Option<&'a str>,
}

/// Builds `scheme://host[:port]script_name/path[?query]` per spec.md §4.3.
///
/// A bare root `path` (`"/"`) contributes nothing to the key, the same way
/// the original implementation's `path_info` is an empty segment list (and
/// so joins to `""`) at the root — `http::Uri::path()` instead normalizes
/// an omitted path to `"/"`, which would otherwise put a spurious `/` ahead
/// of `?query` and break spec.md §8 scenarios 2, 3, and 7's literal keys.
pub fn derive_key(parts: &KeyParts<'_>) -> String {
    let mut key = format!("{}://{}", parts.scheme, parts.host);
    let default_port = match parts.scheme {
        "https" => 443,
        "http" => 80,
        _ => 0,
    };
    if parts.port != default_port {
        key.push(':');
        key.push_str(&parts.port.to_string());
    }
    key.push_str(parts.script_name);
    if parts.path != "/" {
        key.push_str(parts.path);
    }
    if let Some(query) = parts.query {
        if !query.is_empty() {
            key.push('?');
            key.push_str(&normalize_query(query));
        }
    }
    key
}

/// Splits `query` on `[&;] *`, URL-decodes each pair, splits each on the
/// first `=`, sorts the resulting `(key, value)` pairs lexicographically,
/// then URL-encodes and rejoins them with `&`.
fn normalize_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for raw in query.split(|c| c == '&' || c == ';') {
        let raw = raw.trim_start_matches(' ');
        if raw.is_empty() {
            continue;
        }
        if let Some((k, v)) = url::form_urlencoded::parse(raw.as_bytes()).next() {
            pairs.push((k.into_owned(), v.into_owned()));
        }
    }
    pairs.sort();

    let mut ser = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in &pairs {
        ser.append_pair(k, v);
    }
    ser.finish()
}

/// Determines scheme/host/port from `http::request::Parts`, preferring an
/// absolute request URI, then `X-Forwarded-Proto`/`Host`, falling back to
/// plain HTTP for bare loopback hosts — the same precedence the teacher's
/// `determine_scheme` uses, extended to also recover the port.
pub fn request_origin(parts: &Parts) -> Result<(String, String, u16)> {
    if let Some(scheme) = parts.uri.scheme_str() {
        // Absolute-form URIs carry their own host; uncommon for a server
        // middleware but handled for parity with client-style callers.
        let host = parts.uri.host().unwrap_or_default().to_string();
        let port = parts.uri.port_u16().unwrap_or(default_port_for(scheme));
        return Ok((scheme.to_string(), host, port));
    }

    let host_header = header_str(&parts.headers, "host")?;
    let (host, port_from_header) = split_host_port(host_header);
    let scheme = determine_scheme(host, &parts.headers)?;
    let port = port_from_header.unwrap_or_else(|| default_port_for(&scheme));
    Ok((scheme, host.to_string(), port))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    Ok(headers
        .get(name)
        .map(|v| v.to_str())
        .transpose()?
        .unwrap_or(""))
}

fn split_host_port(host_header: &str) -> (&str, Option<u16>) {
    match host_header.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(p) => (host, Some(p)),
            Err(_) => (host_header, None),
        },
        None => (host_header, None),
    }
}

fn default_port_for(scheme: &str) -> u16 {
    if scheme == "https" {
        443
    } else {
        80
    }
}

fn determine_scheme(host: &str, headers: &HeaderMap) -> Result<String> {
    if let Some(proto) = headers.get("x-forwarded-proto") {
        let proto = proto.to_str()?;
        return Ok(match proto {
            "http" | "https" => proto.to_string(),
            _ => "https".to_string(),
        });
    }
    if host.starts_with("localhost") || host.starts_with("127.0.0.1") {
        Ok("http".to_string())
    } else {
        Ok("https".to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_ports_elided() {
        let parts = KeyParts {
            scheme: "https",
            host: "www.example.com",
            port: 443,
            script_name: "",
            path: "/",
            query: None,
        };
        assert_eq!(derive_key(&parts), "https://www.example.com");
    }

    #[test]
    fn non_default_port_included() {
        let parts = KeyParts {
            scheme: "http",
            host: "www.example.com",
            port: 8080,
            script_name: "",
            path: "/",
            query: None,
        };
        assert_eq!(derive_key(&parts), "http://www.example.com:8080");
    }

    #[test]
    fn non_root_path_is_kept_verbatim() {
        let parts = KeyParts {
            scheme: "http",
            host: "www.example.com",
            port: 80,
            script_name: "",
            path: "/doc",
            query: None,
        };
        assert_eq!(derive_key(&parts), "http://www.example.com/doc");
    }

    #[test]
    fn query_permutation_is_order_invariant() {
        let a = KeyParts {
            scheme: "http",
            host: "www.example.com",
            port: 80,
            script_name: "",
            path: "",
            query: Some("z=last&a=first"),
        };
        assert_eq!(derive_key(&a), "http://www.example.com?a=first&z=last");
    }

    #[test]
    fn query_percent_decoded_key_collides() {
        let a = KeyParts {
            scheme: "http",
            host: "www.example.com",
            port: 80,
            script_name: "",
            path: "",
            query: Some("x=q&a=b&%78=c"),
        };
        assert_eq!(derive_key(&a), "http://www.example.com?a=b&x=c&x=q");
    }
}
