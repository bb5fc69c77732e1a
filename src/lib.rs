//! A `tower::Layer`/`tower::Service` pair implementing RFC 2616 §13 HTTP
//! caching semantics: freshness-based reuse, validator-based revalidation,
//! invalidation on unsafe methods, and conditional-GET short-circuiting.
//!
//! ## Basic usage
//!
//! ```rust,no_run
//! use http_cache_pipeline::{CacheLayer, store::memory::MemoryStore};
//! use tower::{ServiceBuilder, service_fn};
//!
//! # async fn handler(_: http::Request<http_body_util::Full<bytes::Bytes>>)
//! #     -> Result<http::Response<http_body_util::Full<bytes::Bytes>>, std::convert::Infallible> {
//! #     Ok(http::Response::new(http_body_util::Full::new(bytes::Bytes::new())))
//! # }
//! # #[tokio::main]
//! # async fn main() {
//! let store = MemoryStore::default();
//! let layer = CacheLayer::new(store.clone(), store);
//! let _service = ServiceBuilder::new().layer(layer).service(service_fn(handler));
//! # }
//! ```
//!
//! ## Configuration
//!
//! [`CacheOptions`] carries the tunables documented in the crate's design
//! notes (`allow_revalidate`, `default_ttl`, `private_header_keys`,
//! `ignored_headers`, `verbose`); [`CacheLayer::with_options`] takes one.
//! Per-request opt-outs (`ForcePass`, a `CacheKeyOverride`) are read from the
//! request's [`http::Extensions`] rather than a bespoke private-state map.
//!
//! ## Storage
//!
//! The cache is backed by two traits, [`store::MetaStore`] and
//! [`store::EntityStore`], so a backend can be swapped without touching the
//! pipeline. [`store::memory::MemoryStore`] is the bundled in-process
//! reference implementation; production deployments are expected to supply
//! their own, the way the wider ecosystem pairs this kind of pipeline with a
//! disk- or database-backed manager.
#![forbid(unsafe_code)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]

pub mod cache_control;
pub mod error;
pub mod finalize;
pub mod freshness;
pub mod key;
pub mod options;
pub mod pipeline;
pub mod response;
pub mod store;

pub use cache_control::{CacheControl, Directive};
pub use error::{CacheError, Result, StoreError};
pub use freshness::{Clock, FixedClock, SystemClock};
pub use options::{CacheKeyFn, CacheKeyOverride, CacheOptions, ForcePass};
pub use pipeline::{CacheLayer, CacheService, PipelineError};
pub use response::CachedResponse;
pub use store::{EntityStore, MetaStore, Variant};
