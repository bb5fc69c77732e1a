//! The two-tier content-addressed store (spec.md §4.4): a metastore mapping
//! each cache key to an ordered list of request/response-header variants,
//! and an entitystore mapping body digests to bodies.
//!
//! `MetaStore`/`EntityStore` are async traits in the teacher's
//! `CacheManager` idiom (`#[async_trait]`, `Send + Sync + 'static`,
//! fallible `Result<T>` returns) so a backend can be swapped without
//! touching `lookup`/`store_response`/`invalidate`.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use sha1::{Digest, Sha1};

use crate::error::Result;
use crate::freshness::{self, Clock};
use crate::response::CachedResponse;

/// One stored variant for a cache key: the request headers the origin saw
/// when this variant was produced, and the response headers persisted for
/// it (always carrying `X-Status` and `X-Content-Digest`, never `Age`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    /// Request headers recorded at store time, in insertion order.
    pub request_headers: IndexMap<String, String>,
    /// Response headers, plus `X-Status`/`X-Content-Digest`, minus `Age`.
    pub response_headers: IndexMap<String, String>,
}

/// Backing store for a cache key's ordered variant list.
///
/// Implementations must be atomic at the granularity of one cache key: per
/// spec.md §5, concurrent writers to the same key must observe serial
/// order, with dedupe evaluated against the observed pre-state.
#[async_trait]
pub trait MetaStore: Send + Sync + 'static {
    /// Returns the variant list for `key` (empty if absent).
    async fn variants(&self, key: &str) -> Result<Vec<Variant>>;
    /// Atomically replaces the variant list for `key`.
    async fn write_variants(&self, key: &str, variants: Vec<Variant>) -> Result<()>;

    /// Reads, transforms, and writes back the variant list for `key` as one
    /// per-key critical section — the read-modify-write pair spec.md §5
    /// requires for `store_response`'s dedupe and `invalidate`'s rewrite.
    ///
    /// The default implementation just chains [`Self::variants`] and
    /// [`Self::write_variants`], which only serializes each call
    /// individually, not the pair; a backend that can't hold a lock across
    /// both (most real key/value stores can't without a transaction) should
    /// override this with a true compare-and-swap or transactional retry
    /// loop instead of inheriting the default. [`crate::store::memory::MemoryStore`]
    /// overrides it via `DashMap::entry`, which holds the shard lock for the
    /// whole closure.
    async fn update_variants(
        &self,
        key: &str,
        update: Box<dyn FnOnce(Vec<Variant>) -> Vec<Variant> + Send>,
    ) -> Result<()> {
        let variants = self.variants(key).await?;
        self.write_variants(key, update(variants)).await
    }
}

/// Backing store for response bodies, content-addressed by digest.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    /// Reads the body stored under `digest`, if any.
    async fn get(&self, digest: &str) -> Result<Option<Bytes>>;
    /// Insert-or-replace for `digest`. Concurrent writers of the same
    /// digest write the same bytes, so no ordering guarantee is needed.
    async fn put(&self, digest: &str, body: Bytes) -> Result<()>;
}

/// `upper(hex(SHA1(body)))` (spec.md §6, "Entity digest").
pub fn digest_of(body: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(body);
    hex::encode_upper(hasher.finalize())
}

/// Vary match (spec.md §4.4): `vary` absent/empty matches trivially;
/// otherwise every header name it lists must agree (value-for-value,
/// including both-absent) between `saved` and `current`.
fn vary_matches(
    vary: Option<&str>,
    saved: &IndexMap<String, String>,
    current: &IndexMap<String, String>,
) -> bool {
    let Some(vary) = vary else { return true };
    let names: Vec<&str> =
        vary.split(|c: char| c.is_whitespace() || c == ',').filter(|s| !s.is_empty()).collect();
    if names.is_empty() {
        return true;
    }
    names.iter().all(|name| saved.get(*name) == current.get(*name))
}

/// `lookup(request, opts)` (spec.md §4.4).
///
/// Finds the first variant at `key` whose `Vary` matches
/// `current_request_headers`, then resolves its body from `entities`. A
/// missing variant, a non-matching `Vary`, or an orphaned digest (the
/// metastore entry's entity has vanished — spec.md §3, invariant 1) all
/// resolve as a plain miss (`Ok(None)`), never an error.
pub async fn lookup<M: MetaStore, E: EntityStore>(
    meta: &M,
    entities: &E,
    key: &str,
    current_request_headers: &IndexMap<String, String>,
) -> Result<Option<CachedResponse>> {
    let variants = meta.variants(key).await?;
    let Some(variant) = variants.iter().find(|v| {
        vary_matches(v.response_headers.get("Vary").map(String::as_str), &v.request_headers, current_request_headers)
    }) else {
        return Ok(None);
    };

    let Some(digest) = variant.response_headers.get("X-Content-Digest") else {
        return Ok(None);
    };
    let Some(body) = entities.get(digest).await? else {
        // TODO(orphan-eviction): purge this metastore entry once the
        // backend supports targeted deletes; spec.md §3 invariant 1 only
        // requires treating it as a miss.
        return Ok(None);
    };

    let mut headers = variant.response_headers.clone();
    let status = headers.shift_remove("X-Status").and_then(|s| s.parse().ok()).unwrap_or(200);
    Ok(Some(CachedResponse { status, headers, body: body.to_vec() }))
}

/// `store_response(request, response, opts)` (spec.md §4.4).
///
/// Assigns a content digest to the body the first time it is stored, then
/// de-dupes any existing variant sharing this response's `Vary` and
/// vary-selected request headers and prepends the new variant in one
/// [`MetaStore::update_variants`] critical section, so a concurrent writer
/// to the same key can't observe (or clobber) a half-applied update
/// (spec.md §5).
pub async fn store_response<M: MetaStore, E: EntityStore>(
    meta: &M,
    entities: &E,
    key: &str,
    stored_request_headers: IndexMap<String, String>,
    mut response: CachedResponse,
) -> Result<CachedResponse> {
    if response.header("X-Content-Digest").is_none() {
        let digest = digest_of(&response.body);
        let size = response.body.len();
        entities.put(&digest, Bytes::from(response.body.clone())).await?;
        response.set_header("X-Content-Digest", digest);
        if response.header("Transfer-Encoding").is_none() {
            response.set_header("Content-Length", size.to_string());
        }
    }

    let vary = response.header("Vary").map(str::to_string);
    let mut persisted_response = response.headers.clone();
    persisted_response.shift_remove("Age");
    persisted_response.insert("X-Status".to_string(), response.status.to_string());
    let new_variant =
        Variant { request_headers: stored_request_headers.clone(), response_headers: persisted_response };

    meta.update_variants(
        key,
        Box::new(move |mut variants| {
            variants.retain(|v| {
                let same_vary = v.response_headers.get("Vary").map(String::as_str) == vary.as_deref();
                !(same_vary && vary_matches(vary.as_deref(), &v.request_headers, &stored_request_headers))
            });
            variants.insert(0, new_variant);
            variants
        }),
    )
    .await?;

    Ok(response)
}

/// `invalidate(request, opts)` (spec.md §4.4): rewrites every fresh variant
/// at `key` so it reads as stale (`Age := max_age`); stale variants are
/// left untouched. Never touches the entitystore. Runs inside one
/// [`MetaStore::update_variants`] critical section for the same reason
/// `store_response` does (spec.md §5).
pub async fn invalidate<M: MetaStore>(meta: &M, key: &str, clock: &dyn Clock) -> Result<()> {
    let now = crate::freshness::FixedClock(clock.now());
    meta.update_variants(
        key,
        Box::new(move |mut variants| {
            for variant in &mut variants {
                let status = variant
                    .response_headers
                    .get("X-Status")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(200);
                let mut transient = CachedResponse {
                    status,
                    headers: variant.response_headers.clone(),
                    body: Vec::new(),
                };
                // A malformed Date/Expires leaves the variant untouched
                // rather than failing the whole critical section, now that
                // this runs as an infallible transform.
                if matches!(freshness::is_fresh(&transient, &now), Ok(true)) {
                    let _ = freshness::expire(&mut transient, &now);
                    if let Some(age) = transient.header("Age") {
                        variant.response_headers.insert("Age".to_string(), age.to_string());
                    }
                }
            }
            variants
        }),
    )
    .await
}
