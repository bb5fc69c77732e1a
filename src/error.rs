//! Error types for the cache pipeline.

use thiserror::Error;

/// A `Result` typedef to use with the [`CacheError`] type.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors raised while classifying a request, reading/writing the stores, or
/// assembling an outbound response.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Error building an `http` request or response.
    #[error(transparent)]
    Http(#[from] http::Error),
    /// A header value could not be parsed as a string.
    #[error(transparent)]
    HeaderToStr(#[from] http::header::ToStrError),
    /// A header value failed to construct from a string.
    #[error(transparent)]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    /// A header name failed to construct from a string.
    #[error(transparent)]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),
    /// The metastore or entitystore backend failed. Per spec.md §7
    /// (`StoreBackendError`), the request still passes through to the
    /// origin; it is neither served from cache nor stored.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A `Date`, `Expires`, or `Last-Modified` header could not be parsed as
    /// an HTTP date (spec.md §7, `MalformedDate`).
    #[error("malformed HTTP date: {0}")]
    MalformedDate(#[from] httpdate::Error),
}

/// Errors specific to the metastore/entitystore abstraction.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend (lock, connection, serialization, ...) failed.
    #[error("cache store backend error: {0}")]
    Backend(String),
}
