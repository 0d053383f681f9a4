#![forbid(unsafe_code, future_incompatible)]
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
//! A client-side HTTP caching interceptor following RFC 9111, with the
//! RFC 5861 `stale-while-revalidate` and `stale-if-error` extensions.
//!
//! The cache sits between a caller and a lower transport: identical
//! requests are answered from storage when the cached response is fresh,
//! revalidated cheaply with conditional requests when it is not, and
//! coalesced so that one origin call serves every concurrent miss for the
//! same key. Response bodies live in a content-addressed store (SHA-256,
//! optionally gzip-compressed) separate from their metadata records, both
//! kept in a generic two-tier backing store.
//!
//! ## Basic usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hybrid_http_cache::{
//!     Body, CacheConfig, HttpCache, MokaStore, Result, Transport,
//! };
//!
//! struct Origin;
//!
//! #[async_trait::async_trait]
//! impl Transport for Origin {
//!     async fn send(
//!         &self,
//!         _req: http::Request<Body>,
//!     ) -> Result<http::Response<Body>> {
//!         Ok(http::Response::builder()
//!             .status(200)
//!             .header("cache-control", "max-age=3600")
//!             .body(Body::full("hello"))?)
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let cache = HttpCache::new(
//!     Arc::new(Origin),
//!     Arc::new(MokaStore::new(10_000)),
//!     CacheConfig::default(),
//! );
//!
//! let request = http::Request::get("https://example.com/data")
//!     .body(Body::empty())?;
//! let response = cache.send(request).await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```
//!
//! ## Composition
//!
//! [`HttpCache`] itself implements [`Transport`], so caches and other
//! request decorators nest without any inheritance:
//! an outer interceptor simply wraps `Arc<HttpCache>` as its transport.

mod body;
mod content;
mod directives;
mod error;
pub mod freshness;
pub mod keys;
mod metadata;
mod pipeline;
mod policy;
mod store;

use std::fmt::{self, Debug};
use std::time::{Duration, SystemTime};

pub use body::{Body, ChunkStream};
pub use content::{ContentStore, Ingested, INGEST_CHUNK_SIZE};
pub use directives::{CacheControl, Vary};
pub use error::{BoxError, Error, Result};
pub use keys::KeyGenerator;
pub use metadata::{CachedRecord, DIGEST_LEN};
pub use pipeline::{HttpCache, TaskRunner};
pub use store::{CacheStore, Coalesced, EntryFactory, MokaStore};

/// `x-cache-diagnostic` header: the decision token for the response
pub const XCACHE_DIAGNOSTIC: &str = "x-cache-diagnostic";
/// `x-cache-age` header: seconds since the entry was stored (hits only)
pub const XCACHE_AGE: &str = "x-cache-age";
/// `x-cache-maxage` header: recorded freshness lifetime in seconds (hits only)
pub const XCACHE_MAX_AGE: &str = "x-cache-maxage";
/// `x-cache-compressed` header: `true` when a hit was decompressed on read
pub const XCACHE_COMPRESSED: &str = "x-cache-compressed";

/// Counter incremented for every `HIT-*` decision
pub const CACHE_HITS: &str = "cache.hits";
/// Counter incremented for every miss-class decision
pub const CACHE_MISSES: &str = "cache.misses";

/// Private (client) versus Shared (proxy) storability rules.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Single-user cache: `private` responses are storable, `s-maxage` is
    /// ignored.
    #[default]
    Private,
    /// Multi-user cache: `private` responses are rejected, `s-maxage`
    /// takes precedence, and authenticated responses need an explicit
    /// opt-in.
    Shared,
}

/// The stable decision token attached to responses and counted by the
/// metrics sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Diagnostic {
    HitFresh,
    HitRevalidated,
    HitStaleWhileRevalidate,
    HitStaleIfError,
    HitOnlyIfCached,
    Miss,
    MissRevalidated,
    MissCacheError,
    MissOnlyIfCached,
    BypassMethod,
    BypassNoStore,
    BypassPragmaNoCache,
}

impl Diagnostic {
    /// The stable token emitted in `x-cache-diagnostic`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HitFresh => "HIT-FRESH",
            Self::HitRevalidated => "HIT-REVALIDATED",
            Self::HitStaleWhileRevalidate => "HIT-STALE-WHILE-REVALIDATE",
            Self::HitStaleIfError => "HIT-STALE-IF-ERROR",
            Self::HitOnlyIfCached => "HIT-ONLY-IF-CACHED",
            Self::Miss => "MISS",
            Self::MissRevalidated => "MISS-REVALIDATED",
            Self::MissCacheError => "MISS-CACHE-ERROR",
            Self::MissOnlyIfCached => "MISS-ONLY-IF-CACHED",
            Self::BypassMethod => "BYPASS-METHOD",
            Self::BypassNoStore => "BYPASS-NO-STORE",
            Self::BypassPragmaNoCache => "BYPASS-PRAGMA-NO-CACHE",
        }
    }

    /// Whether this decision counts toward `cache.hits`.
    #[must_use]
    pub fn is_hit(self) -> bool {
        matches!(
            self,
            Self::HitFresh
                | Self::HitRevalidated
                | Self::HitStaleWhileRevalidate
                | Self::HitStaleIfError
                | Self::HitOnlyIfCached
        )
    }

    /// Whether this decision counts toward `cache.misses`.
    #[must_use]
    pub fn is_miss(self) -> bool {
        matches!(
            self,
            Self::Miss
                | Self::MissRevalidated
                | Self::MissCacheError
                | Self::MissOnlyIfCached
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source of the current instant, injected so freshness arithmetic is
/// deterministic under test.
pub trait Clock: Debug + Send + Sync {
    /// The current instant.
    fn now(&self) -> SystemTime;
}

/// The default wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// An injected sink for the two cache counters.
///
/// Implementations bridge to whatever metrics system the application runs;
/// the cache only ever increments [`CACHE_HITS`] and [`CACHE_MISSES`].
pub trait MetricsSink: Debug + Send + Sync {
    /// Increments `counter` by one.
    fn increment(&self, counter: &'static str);
}

/// A sink that drops every increment.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _counter: &'static str) {}
}

/// The lower transport: anything that can turn a request into a response.
///
/// Implementations must deliver bodies already decoded of transport-level
/// content encodings and surface caching headers unmodified. Dropping the
/// returned future cancels the request.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends `request` and resolves to the origin's response.
    async fn send(
        &self,
        request: http::Request<Body>,
    ) -> Result<http::Response<Body>>;
}

/// Configuration for the caching pipeline.
///
/// Every option has a workable default; construct with struct-update
/// syntax:
///
/// ```rust
/// use hybrid_http_cache::{CacheConfig, CacheMode};
///
/// let config = CacheConfig {
///     mode: CacheMode::Shared,
///     include_diagnostic_headers: true,
///     ..Default::default()
/// };
/// ```
#[derive(Clone)]
pub struct CacheConfig {
    /// Private versus Shared storability rules.
    pub mode: CacheMode,
    /// Upper bound on stored body size; `None` disables the cap.
    pub max_cacheable_content_size: Option<u64>,
    /// Fallback freshness for responses that omit every freshness signal.
    pub default_cache_duration: Option<Duration>,
    /// Multiplier applied to `cached_at - last_modified` when the
    /// heuristic lifetime applies.
    pub heuristic_freshness_percent: f32,
    /// Minimum body size that triggers storage compression; `None`
    /// disables compression.
    pub compression_threshold: Option<u64>,
    /// Media types eligible for storage compression.
    pub compressible_content_types: Vec<String>,
    /// Media types eligible for caching at all; `None` allows every type.
    pub cacheable_content_types: Option<Vec<String>>,
    /// Header names folded into the cache key when no custom generator is
    /// set.
    pub vary_headers: Vec<String>,
    /// Replaces the default key construction entirely.
    pub cache_key_generator: Option<KeyGenerator>,
    /// Emit the `x-cache-*` diagnostic headers.
    pub include_diagnostic_headers: bool,
    /// Prefix for content-entry keys in the backing store.
    pub content_key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::Private,
            max_cacheable_content_size: Some(10 * 1024 * 1024),
            default_cache_duration: None,
            heuristic_freshness_percent: 0.1,
            compression_threshold: Some(1024),
            compressible_content_types: vec![
                "text/*".into(),
                "application/json".into(),
                "application/xml".into(),
                "application/javascript".into(),
                "application/xhtml+xml".into(),
            ],
            cacheable_content_types: None,
            vary_headers: vec![
                "accept".into(),
                "accept-encoding".into(),
                "accept-language".into(),
                "user-agent".into(),
            ],
            cache_key_generator: None,
            include_diagnostic_headers: false,
            content_key_prefix: "content:".into(),
        }
    }
}

impl Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("mode", &self.mode)
            .field(
                "max_cacheable_content_size",
                &self.max_cacheable_content_size,
            )
            .field("default_cache_duration", &self.default_cache_duration)
            .field(
                "heuristic_freshness_percent",
                &self.heuristic_freshness_percent,
            )
            .field("compression_threshold", &self.compression_threshold)
            .field(
                "compressible_content_types",
                &self.compressible_content_types,
            )
            .field("cacheable_content_types", &self.cacheable_content_types)
            .field("vary_headers", &self.vary_headers)
            .field(
                "cache_key_generator",
                &self
                    .cache_key_generator
                    .as_ref()
                    .map(|_| "Fn(&request::Parts) -> String"),
            )
            .field(
                "include_diagnostic_headers",
                &self.include_diagnostic_headers,
            )
            .field("content_key_prefix", &self.content_key_prefix)
            .finish()
    }
}

#[cfg(test)]
mod test;
