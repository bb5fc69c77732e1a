//! The `tower::Layer`/`tower::Service` pair that classifies and dispatches
//! every inbound request, grounded in the teacher's `HttpCacheLayer` /
//! `HttpCacheService` (`http-cache-tower/src/lib.rs`): generic over the
//! downstream service, `Clone`, a boxed-future `call`, `poll_ready`
//! delegated straight through to the inner service.
//!
//! Bodies are buffered to [`Bytes`] on both the inbound and outbound side —
//! chunked/streaming bodies are explicitly out of scope, so there is no
//! value in keeping the inner service generic over a streaming `ResBody`
//! the way the teacher's streaming variant does.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response};
use http_body_util::{BodyExt, Full};
use indexmap::IndexMap;
use tower::util::ServiceExt;
use tower::{Layer, Service};

use crate::cache_control::CacheControl;
use crate::error::CacheError;
use crate::freshness::{self, Clock, SystemClock};
use crate::key::{self, KeyParts};
use crate::options::{CacheKeyOverride, CacheOptions, ForcePass};
use crate::finalize;
use crate::response::{canonical_header_name, CachedResponse};
use crate::store::{self, EntityStore, MetaStore};

/// Everything a [`CacheService`] needs beyond the downstream service itself.
struct Core<M, E> {
    meta: M,
    entities: E,
    options: CacheOptions,
    clock: Arc<dyn Clock>,
}

/// A [`tower::Layer`] that wraps a downstream service with RFC 2616 §13
/// caching semantics.
pub struct CacheLayer<M, E> {
    core: Arc<Core<M, E>>,
}

impl<M, E> Clone for CacheLayer<M, E> {
    fn clone(&self) -> Self {
        Self { core: self.core.clone() }
    }
}

impl<M, E> fmt::Debug for CacheLayer<M, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLayer").finish_non_exhaustive()
    }
}

impl<M, E> CacheLayer<M, E>
where
    M: MetaStore,
    E: EntityStore,
{
    /// Builds a layer with default [`CacheOptions`] and the system clock.
    pub fn new(meta: M, entities: E) -> Self {
        Self::with_options(meta, entities, CacheOptions::default())
    }

    /// Builds a layer with caller-supplied options.
    pub fn with_options(meta: M, entities: E, options: CacheOptions) -> Self {
        Self { core: Arc::new(Core { meta, entities, options, clock: Arc::new(SystemClock) }) }
    }

    /// Overrides the clock. Exposed for tests that need to pin exact
    /// freshness boundaries; production callers should use [`Self::new`].
    pub fn with_clock(meta: M, entities: E, options: CacheOptions, clock: Arc<dyn Clock>) -> Self {
        Self { core: Arc::new(Core { meta, entities, options, clock }) }
    }
}

impl<S, M, E> Layer<S> for CacheLayer<M, E>
where
    M: MetaStore,
    E: EntityStore,
{
    type Service = CacheService<S, M, E>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheService { inner, core: self.core.clone() }
    }
}

/// The `Service` produced by [`CacheLayer`].
pub struct CacheService<S, M, E> {
    inner: S,
    core: Arc<Core<M, E>>,
}

impl<S, M, E> Clone for CacheService<S, M, E>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), core: self.core.clone() }
    }
}

impl<S, M, E> fmt::Debug for CacheService<S, M, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheService").finish_non_exhaustive()
    }
}

/// The error type surfaced by [`CacheService`]: either the core's own
/// classification/storage work failed, or the downstream service did.
/// A `Store` failure from [`CacheError`] is deliberately *not* surfaced this
/// way — per the `StoreBackendError` entry in the error taxonomy the
/// request still passes through; only [`run`] is allowed to swallow it.
#[derive(Debug)]
pub enum PipelineError {
    /// Failure classifying the request or assembling a response.
    Cache(CacheError),
    /// The downstream service returned an error.
    Inner(Box<dyn std::error::Error + Send + Sync>),
    /// A request or response body failed to read.
    Body(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Cache(e) => write!(f, "cache pipeline error: {e}"),
            PipelineError::Inner(e) => write!(f, "downstream service error: {e}"),
            PipelineError::Body(e) => write!(f, "body read error: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Cache(e) => Some(e),
            PipelineError::Inner(e) => Some(e.as_ref()),
            PipelineError::Body(e) => Some(e.as_ref()),
        }
    }
}

impl From<CacheError> for PipelineError {
    fn from(e: CacheError) -> Self {
        PipelineError::Cache(e)
    }
}

impl<S, M, E, ReqBody, ResBody> Service<Request<ReqBody>> for CacheService<S, M, E>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    S::Future: Send + 'static,
    ReqBody: http_body::Body<Data = Bytes> + Send + 'static,
    ReqBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    ResBody: http_body::Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    M: MetaStore,
    E: EntityStore,
{
    type Response = Response<Full<Bytes>>;
    type Error = PipelineError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(|e| PipelineError::Inner(e.into()))
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let core = self.core.clone();
        let inner = self.inner.clone();
        let (parts, body) = req.into_parts();

        Box::pin(async move {
            let body = body.collect().await.map_err(|e| PipelineError::Body(e.into()))?.to_bytes();
            let response = run(core, inner, parts, body).await?;
            to_http_response(response)
        })
    }
}

/// Classifies and dispatches one request (spec §4.5), then runs the
/// outbound finalizer (§4.6) over whatever path produced a response.
async fn run<S, M, E, ResBody>(
    core: Arc<Core<M, E>>,
    inner: S,
    parts: Parts,
    body: Bytes,
) -> Result<CachedResponse, PipelineError>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Send + 'static,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    S::Future: Send + 'static,
    ResBody: http_body::Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    M: MetaStore,
    E: EntityStore,
{
    let mut trace: Vec<String> = Vec::new();
    let method = parts.method.clone();
    let request_headers = header_map_to_ordered(&parts.headers);
    let is_safe = method == Method::GET || method == Method::HEAD;

    let force_pass = parts.extensions.get::<ForcePass>().copied().unwrap_or_default().0;
    let has_expect = request_headers.contains_key("Expect");

    let mut response = if !is_safe {
        trace.push("invalidate".to_string());
        let cache_key = derive_cache_key(&parts)?;
        log_decision(&core.options, "invalidate", &cache_key);
        if let Err(e) = store::invalidate(&core.meta, &cache_key, core.clock.as_ref()).await {
            log::warn!("cache invalidate failed for {cache_key}: {e}");
        }
        trace.push("pass".to_string());
        call_inner(inner, parts, body).await?
    } else if force_pass {
        trace.push("pass".to_string());
        log_decision(&core.options, "pass (force_pass)", "-");
        call_inner(inner, parts, body).await?
    } else if has_expect {
        trace.push("pass".to_string());
        log_decision(&core.options, "pass (expect)", "-");
        call_inner(inner, parts, body).await?
    } else {
        let request_cc = CacheControl::parse(header_str(&parts.headers, "cache-control"));
        let pragma_no_cache = header_str(&parts.headers, "pragma")
            .map(|v| v.eq_ignore_ascii_case("no-cache"))
            .unwrap_or(false);
        let cache_key = derive_cache_key(&parts)?;

        if request_cc.no_cache() || pragma_no_cache {
            trace.push("reload".to_string());
            log_decision(&core.options, "reload", &cache_key);
            fetch(&core, inner, parts, body, &cache_key, &request_headers).await?
        } else {
            let hit = store::lookup(&core.meta, &core.entities, &cache_key, &request_headers)
                .await
                .unwrap_or_else(|e| {
                    log::warn!("cache lookup failed for {cache_key}: {e}");
                    None
                });
            match hit {
                None => {
                    trace.push("miss".to_string());
                    log_decision(&core.options, "miss", &cache_key);
                    fetch(&core, inner, parts, body, &cache_key, &request_headers).await?
                }
                Some(hit) if fresh_enough(&hit, &request_cc, &core.options, core.clock.as_ref())? => {
                    trace.push("fresh".to_string());
                    log_decision(&core.options, "fresh", &cache_key);
                    serve_fresh(hit, core.clock.as_ref())?
                }
                Some(hit) => {
                    trace.push("stale".to_string());
                    log_decision(&core.options, "stale", &cache_key);
                    let (response, extra_label) =
                        validate(&core, inner, parts, body, &cache_key, hit).await?;
                    if let Some(label) = extra_label {
                        trace.push(label);
                    }
                    response
                }
            }
        }
    };

    finalize::finalize(method.as_str(), &request_headers, &trace, &mut response);
    Ok(response)
}

/// Logs one classification decision. `verbose` (spec.md §6) has no semantic
/// effect; it only decides whether this surfaces at `debug!` or is folded
/// into the ambient `trace!` noise.
fn log_decision(options: &CacheOptions, label: &str, cache_key: &str) {
    if options.verbose {
        log::debug!("cache {label} key={cache_key}");
    } else {
        log::trace!("cache {label} key={cache_key}");
    }
}

fn derive_cache_key(parts: &Parts) -> Result<String, PipelineError> {
    if let Some(over) = parts.extensions.get::<CacheKeyOverride>() {
        return Ok((over.0)(parts));
    }
    let (scheme, host, port) = key::request_origin(parts)?;
    Ok(key::derive_key(&KeyParts {
        scheme: &scheme,
        host: &host,
        port,
        script_name: "",
        path: parts.uri.path(),
        query: parts.uri.query(),
    }))
}

/// `fresh_enough?(E, req, opts)` (spec §4.5). Per RFC 2616 §14.9.3, a
/// request's own `max-age` only ever *shortens* the acceptable age; its
/// absence imposes no extra constraint, so `fresh?(E)` alone is sufficient
/// when the request sends no `max-age` — this is the interpretation
/// scenario 6 in spec §8 requires (a repeat GET with no request-side
/// `Cache-Control` must still be served `fresh`, not forced to revalidate).
fn fresh_enough(
    hit: &CachedResponse,
    request_cc: &CacheControl,
    options: &CacheOptions,
    clock: &dyn Clock,
) -> Result<bool, PipelineError> {
    if !freshness::is_fresh(hit, clock)? {
        return Ok(false);
    }
    if !options.allow_revalidate {
        return Ok(true);
    }
    match request_cc.max_age() {
        Some(m) => Ok(m > freshness::age(hit, clock)?),
        None => Ok(true),
    }
}

/// `ServeFresh(E)`: stamps `Age` and returns the hit as-is.
fn serve_fresh(mut hit: CachedResponse, clock: &dyn Clock) -> Result<CachedResponse, PipelineError> {
    let age = freshness::age(&hit, clock)?;
    hit.set_header("Age", age.to_string());
    Ok(hit)
}

/// `Fetch`: forces the method to `GET`, dispatches downstream, runs
/// `CleanCacheControl`, and stores the result if it is cacheable.
async fn fetch<S, M, E, ResBody>(
    core: &Arc<Core<M, E>>,
    inner: S,
    mut parts: Parts,
    body: Bytes,
    cache_key: &str,
    request_headers: &IndexMap<String, String>,
) -> Result<CachedResponse, PipelineError>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Send + 'static,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    S::Future: Send + 'static,
    ResBody: http_body::Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    M: MetaStore,
    E: EntityStore,
{
    parts.method = Method::GET;
    let mut response = call_inner(inner, parts, body).await?;
    clean_cache_control(&mut response, &core.options, core.clock.as_ref())?;
    if freshness::is_cacheable(&response, core.clock.as_ref())? {
        response = store(core, cache_key, request_headers.clone(), response).await?;
    }
    Ok(response)
}

/// `Store(response)`: strips `opts.ignored_headers`, writes through the
/// store, then stamps `Age` on the persisted copy.
///
/// Per spec.md §7 (`StoreBackendError`), a failing write must not abort the
/// request: the response is neither served from cache nor stored, but is
/// still passed through, the same way `invalidate`'s and `lookup`'s backend
/// errors are logged and swallowed rather than propagated.
async fn store<M: MetaStore, E: EntityStore>(
    core: &Arc<Core<M, E>>,
    cache_key: &str,
    stored_request_headers: IndexMap<String, String>,
    mut response: CachedResponse,
) -> Result<CachedResponse, PipelineError> {
    for name in &core.options.ignored_headers {
        response.remove_header(name);
    }
    let passthrough = response.clone();
    match store::store_response(&core.meta, &core.entities, cache_key, stored_request_headers, response)
        .await
    {
        Ok(mut stored) => {
            let age = freshness::age(&stored, core.clock.as_ref())?;
            stored.set_header("Age", age.to_string());
            Ok(stored)
        }
        Err(e) => {
            log::warn!("cache store failed for {cache_key}: {e}");
            Ok(passthrough)
        }
    }
}

/// `CleanCacheControl` (spec §4.5). Per Open Question (c) in spec §9, the
/// forced-private branch is expressed by simply setting `private` — there
/// is no boolean-false directive value in [`CacheControl`]'s model, so
/// "Public => false" just means `public` stays unset.
fn clean_cache_control(
    response: &mut CachedResponse,
    options: &CacheOptions,
    clock: &dyn Clock,
) -> Result<(), PipelineError> {
    let mut cc = CacheControl::parse(response.header("Cache-Control"));
    let forces_private =
        options.private_header_keys.iter().any(|h| response.header(h).is_some()) && !cc.public();
    if forces_private {
        cc.set_bool("private");
    } else if options.default_ttl > 0
        && freshness::ttl(response, clock)?.is_none()
        && !cc.must_revalidate()
    {
        let age = freshness::age(response, clock)?;
        cc.set_value("s-maxage", (age + options.default_ttl).to_string());
    }
    response.set_header("Cache-Control", cc.to_string());
    Ok(())
}

/// `Validate(E)` (spec §4.5 step 6). Builds the conditional request,
/// dispatches it, then disambiguates a `304` between validating our stored
/// variant and validating an etag the *client* already held that we never
/// stored — in which case the 304 is passed through untouched instead of
/// being merged into our variant.
async fn validate<S, M, E, ResBody>(
    core: &Arc<Core<M, E>>,
    inner: S,
    mut parts: Parts,
    body: Bytes,
    cache_key: &str,
    cached: CachedResponse,
) -> Result<(CachedResponse, Option<String>), PipelineError>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Send + 'static,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    S::Future: Send + 'static,
    ResBody: http_body::Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    M: MetaStore,
    E: EntityStore,
{
    let cached_etags = split_etags(cached.header("ETag"));
    let request_etags = split_etags(header_str(&parts.headers, "if-none-match"));

    let mut union_etags = cached_etags.clone();
    for etag in &request_etags {
        if !union_etags.contains(etag) {
            union_etags.push(etag.clone());
        }
    }
    if union_etags.is_empty() {
        parts.headers.remove("if-none-match");
    } else {
        set_request_header(&mut parts.headers, "if-none-match", &union_etags.join(", "))?;
    }
    if let Some(last_modified) = cached.header("Last-Modified") {
        set_request_header(&mut parts.headers, "if-modified-since", last_modified)?;
    }
    parts.method = Method::GET;
    let stored_request_headers = header_map_to_ordered(&parts.headers);

    let origin = call_inner(inner, parts, body).await?;

    if origin.status == 304 {
        let origin_etag = origin.header("ETag").map(str::to_string);
        let validated_clients_own = match &origin_etag {
            Some(etag) => request_etags.contains(etag) && !cached_etags.contains(etag),
            None => false,
        };
        if validated_clients_own {
            return Ok((origin, Some("valid".to_string())));
        }

        // spec.md §4.5 step 6 only licenses overwriting a field "from the
        // 304" when the 304 actually supplies it; a 304 that omits one of
        // these headers means the cached value stands, not that it's gone
        // (kornelski-rusty-http-cache-semantics's update-after-304 rule
        // keeps `old_value` the same way).
        let mut merged = cached;
        for name in ["Date", "Expires", "Cache-Control", "ETag", "Last-Modified"] {
            if let Some(v) = origin.header(name) {
                merged.set_header(name, v.to_string());
            }
        }
        let stored = store(core, cache_key, stored_request_headers, merged).await?;
        Ok((stored, Some("valid".to_string())))
    } else {
        let mut response = origin;
        clean_cache_control(&mut response, &core.options, core.clock.as_ref())?;
        let response = if freshness::is_cacheable(&response, core.clock.as_ref())? {
            store(core, cache_key, stored_request_headers, response).await?
        } else {
            response
        };
        Ok((response, None))
    }
}

fn split_etags(value: Option<&str>) -> Vec<String> {
    match value {
        Some(v) => v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect(),
        None => Vec::new(),
    }
}

async fn call_inner<S, ResBody>(
    inner: S,
    parts: Parts,
    body: Bytes,
) -> Result<CachedResponse, PipelineError>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Send + 'static,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    S::Future: Send + 'static,
    ResBody: http_body::Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let req = Request::from_parts(parts, Full::new(body));
    let response = ServiceExt::<Request<Full<Bytes>>>::oneshot(inner, req)
        .await
        .map_err(|e| PipelineError::Inner(e.into()))?;
    let (parts, body) = response.into_parts();
    let body = body.collect().await.map_err(|e| PipelineError::Body(e.into()))?.to_bytes();
    Ok(CachedResponse {
        status: parts.status.as_u16(),
        headers: header_map_to_ordered(&parts.headers),
        body: body.to_vec(),
    })
}

fn header_map_to_ordered(headers: &HeaderMap) -> IndexMap<String, String> {
    let mut map = IndexMap::new();
    for (name, value) in headers.iter() {
        if let Ok(v) = value.to_str() {
            map.insert(canonical_header_name(name.as_str()), v.to_string());
        }
    }
    map
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn set_request_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), PipelineError> {
    let name = HeaderName::from_bytes(name.as_bytes()).map_err(CacheError::from)?;
    let value = HeaderValue::from_str(value).map_err(CacheError::from)?;
    headers.insert(name, value);
    Ok(())
}

fn to_http_response(response: CachedResponse) -> Result<Response<Full<Bytes>>, PipelineError> {
    let mut builder = Response::builder().status(response.status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Full::new(Bytes::from(response.body)))
        .map_err(|e| PipelineError::Cache(CacheError::from(e)))
}
