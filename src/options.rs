//! Cache-wide configuration (spec.md §6) and the per-request private-state
//! toggles the core reads via `http::Extensions`.

use std::fmt;
use std::sync::Arc;

use http::request::Parts;

/// A caller-supplied cache key generator (spec.md §4.3, "Alternative").
pub type CacheKeyFn = Arc<dyn Fn(&Parts) -> String + Send + Sync>;

/// Configuration knobs from spec.md §6's options table (excluding the two
/// stores themselves, which the [`crate::CacheLayer`] holds directly).
#[derive(Clone, Debug)]
pub struct CacheOptions {
    /// If `false`, never let the request's own `max-age` shorten freshness
    /// (spec.md §4.5, `fresh_enough?`). Default `true`.
    pub allow_revalidate: bool,
    /// If `> 0`, assigned as `s-maxage` to responses that have no TTL and
    /// are not `must-revalidate` (spec.md §4.5, `CleanCacheControl`).
    /// Default `0`.
    pub default_ttl: i64,
    /// Header names whose presence on a response forces it to `private`
    /// (spec.md §4.5, `CleanCacheControl`).
    pub private_header_keys: Vec<String>,
    /// Header names stripped from a response before it is stored
    /// (spec.md §4.5, `Store`).
    pub ignored_headers: Vec<String>,
    /// Gates `debug!`/`trace!`-level logging. Has no effect on caching
    /// behavior (spec.md §6).
    pub verbose: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            allow_revalidate: true,
            default_ttl: 0,
            private_header_keys: Vec::new(),
            ignored_headers: Vec::new(),
            verbose: false,
        }
    }
}

/// Per-request opt-out: bypass the cache entirely (spec.md §6,
/// `plug_cache_force_pass`). Insert into the request's `Extensions` before
/// calling the service.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForcePass(pub bool);

/// Per-request cache-key override (spec.md §6, `plug_cache_cache_key`).
/// Insert into the request's `Extensions` before calling the service.
#[derive(Clone)]
pub struct CacheKeyOverride(pub CacheKeyFn);

impl fmt::Debug for CacheKeyOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheKeyOverride").field(&"<fn>").finish()
    }
}
