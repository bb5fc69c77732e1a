//! Freshness/age arithmetic driving the cache's reuse decisions (spec.md §4.2).
//!
//! `now()` is an implicit dependency of every function here; it is injected
//! via [`Clock`] (spec.md §9, "Time source") so tests can pin exact
//! freshness boundaries instead of racing real wall-clock time.

use std::time::{Duration, SystemTime};

use crate::cache_control::CacheControl;
use crate::error::{CacheError, Result};
use crate::response::CachedResponse;

// rfc2616 13.4 (with 206 dropped — spec.md treats bodies as opaque whole
// blobs and does not model partial content).
const CACHEABLE_STATUSES: &[u16] = &[200, 203, 300, 301, 302, 404, 410];

/// Supplies the current time to the freshness calculus.
pub trait Clock: Send + Sync {
    /// The current wall-clock time.
    fn now(&self) -> SystemTime;
}

/// The default clock, backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock pinned to a fixed instant, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub SystemTime);

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        self.0
    }
}

fn parse_http_date(value: &str) -> Result<SystemTime> {
    httpdate::parse_http_date(value).map_err(CacheError::MalformedDate)
}

fn secs_between(later: SystemTime, earlier: SystemTime) -> i64 {
    match later.duration_since(earlier) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// `Date(R)`: the parsed `Date` header, or `now()` if absent.
pub fn response_date(res: &CachedResponse, clock: &dyn Clock) -> Result<SystemTime> {
    match res.header("Date") {
        Some(v) => parse_http_date(v),
        None => Ok(clock.now()),
    }
}

/// `max_age(R)`: first non-null of `r-maxage`, `s-maxage`, `max-age`, else
/// `Expires(R) − Date(R)` in seconds if `Expires` is present, else `None`.
pub fn max_age(res: &CachedResponse, clock: &dyn Clock) -> Result<Option<i64>> {
    let cc = CacheControl::parse(res.header("Cache-Control"));
    if let Some(v) = cc.reverse_max_age() {
        return Ok(Some(v));
    }
    if let Some(v) = cc.shared_max_age() {
        return Ok(Some(v));
    }
    if let Some(v) = cc.max_age() {
        return Ok(Some(v));
    }
    match res.header("Expires") {
        Some(expires) => {
            let expires = parse_http_date(expires)?;
            let date = response_date(res, clock)?;
            Ok(Some(secs_between(expires, date)))
        }
        None => Ok(None),
    }
}

/// `age(R)`: the `Age` header if present and well-formed, else
/// `max(0, now − Date(R))`.
pub fn age(res: &CachedResponse, clock: &dyn Clock) -> Result<i64> {
    if let Some(v) = res.header("Age") {
        if let Ok(parsed) = v.trim().parse::<i64>() {
            return Ok(parsed);
        }
        // MalformedDirective: treated as absent (spec.md §7).
    }
    let date = response_date(res, clock)?;
    Ok(secs_between(clock.now(), date).max(0))
}

/// `ttl(R)`: `max_age(R) − age(R)` when `max_age` is defined, else `None`.
pub fn ttl(res: &CachedResponse, clock: &dyn Clock) -> Result<Option<i64>> {
    let Some(m) = max_age(res, clock)? else {
        return Ok(None);
    };
    Ok(Some(m - age(res, clock)?))
}

/// `fresh?(R)`: `ttl(R)` is defined and positive.
pub fn is_fresh(res: &CachedResponse, clock: &dyn Clock) -> Result<bool> {
    Ok(matches!(ttl(res, clock)?, Some(t) if t > 0))
}

/// `validateable?(R)`: carries `Last-Modified` and/or `ETag`.
pub fn is_validateable(res: &CachedResponse) -> bool {
    res.header("Last-Modified").is_some() || res.header("ETag").is_some()
}

/// `cacheable?(R)`: cacheable status, not `no-store`, not `private`, and
/// either validateable or fresh.
pub fn is_cacheable(res: &CachedResponse, clock: &dyn Clock) -> Result<bool> {
    if !CACHEABLE_STATUSES.contains(&res.status) {
        return Ok(false);
    }
    let cc = CacheControl::parse(res.header("Cache-Control"));
    if cc.no_store() || cc.private() {
        return Ok(false);
    }
    Ok(is_validateable(res) || is_fresh(res, clock)?)
}

/// `expire!(R)`: if fresh, rewrites `Age` to `max_age` (as a decimal
/// string); otherwise leaves the response unchanged. Applying it twice has
/// the same effect as once: after the first application `ttl == 0`, so the
/// second call's freshness check is already false.
pub fn expire(res: &mut CachedResponse, clock: &dyn Clock) -> Result<()> {
    if is_fresh(res, clock)? {
        if let Some(m) = max_age(res, clock)? {
            res.set_header("Age", m.to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn at(secs_from_epoch: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs_from_epoch)
    }

    fn response_with(cc: &str, age: Option<&str>) -> CachedResponse {
        let mut r = CachedResponse::new(200);
        r.set_header("Cache-Control", cc);
        if let Some(a) = age {
            r.set_header("Age", a);
        }
        r
    }

    #[test]
    fn fresh_vs_age() {
        let clock = FixedClock(at(1_000_000));
        let fresh = response_with("public, max-age=300", Some("299"));
        assert!(is_fresh(&fresh, &clock).unwrap());
        let stale = response_with("public, max-age=300", Some("301"));
        assert!(!is_fresh(&stale, &clock).unwrap());
    }

    #[test]
    fn expires_vs_date() {
        let clock = FixedClock(at(1_000_000));
        let mut r = CachedResponse::new(200);
        r.set_header("Date", httpdate::fmt_http_date(at(1_000_000)));
        r.set_header("Expires", httpdate::fmt_http_date(at(1_000_100)));
        assert!(is_fresh(&r, &clock).unwrap());
        r.set_header("Date", httpdate::fmt_http_date(at(999_900)));
        r.set_header("Expires", httpdate::fmt_http_date(at(1_000_000)));
        assert!(!is_fresh(&r, &clock).unwrap());
    }

    #[test]
    fn expire_sets_age_to_max_age_and_is_idempotent() {
        let clock = FixedClock(at(1_000_000));
        let mut r = response_with("public, max-age=60", Some("10"));
        expire(&mut r, &clock).unwrap();
        assert_eq!(r.header("Age"), Some("60"));
        expire(&mut r, &clock).unwrap();
        assert_eq!(r.header("Age"), Some("60"));
    }

    #[test]
    fn expire_leaves_stale_response_unchanged() {
        let clock = FixedClock(at(1_000_000));
        let mut r = response_with("public, max-age=60", Some("61"));
        expire(&mut r, &clock).unwrap();
        assert_eq!(r.header("Age"), Some("61"));
    }

    #[test]
    fn cacheable_requires_validator_or_freshness() {
        let clock = FixedClock(at(0));
        let mut r = CachedResponse::new(200);
        assert!(!is_cacheable(&r, &clock).unwrap());
        r.set_header("ETag", "\"x\"");
        assert!(is_cacheable(&r, &clock).unwrap());
    }

    #[test]
    fn no_store_and_private_are_never_cacheable() {
        let clock = FixedClock(at(0));
        let mut r = response_with("public, max-age=60, no-store", None);
        assert!(!is_cacheable(&r, &clock).unwrap());
        r.set_header("Cache-Control", "private, max-age=60");
        assert!(!is_cacheable(&r, &clock).unwrap());
    }

    #[test]
    fn malformed_max_age_treated_as_absent() {
        let clock = FixedClock(at(0));
        let r = response_with("max-age=notanumber", None);
        assert_eq!(max_age(&r, &clock).unwrap(), None);
    }
}
