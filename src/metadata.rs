//! Cached response metadata records and their persistence.
//!
//! A record carries everything needed to reconstruct and re-evaluate a
//! cached response except the body bytes, which live in the content store
//! and are referenced by digest only.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::CacheStore;

/// Width of a SHA-256 content digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// One cached response, minus its body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    /// Response status code.
    pub status: u16,
    /// Response headers, insertion-ordered, lowercased names.
    pub response_headers: Vec<(String, String)>,
    /// Content headers (`content-*`), kept apart so they can be reattached
    /// verbatim to reconstructed bodies.
    pub content_headers: Vec<(String, String)>,
    /// SHA-256 over the stored (possibly compressed) body bytes.
    pub content_digest: [u8; DIGEST_LEN],
    /// Stored body size after optional compression.
    pub content_length_stored: u64,
    /// Whether the stored bytes are gzip-compressed.
    pub is_compressed: bool,
    /// Instant the record was written, from the injected clock.
    pub cached_at: SystemTime,
    /// The response `Date` header, when parseable.
    pub origin_date: Option<SystemTime>,
    /// The response `Expires` header, when parseable.
    pub expires: Option<SystemTime>,
    /// The response `Age` header observed at arrival.
    pub age_on_arrival: Option<Duration>,
    /// Mode-selected freshness lifetime (`s-maxage` or `max-age`, or the
    /// configured default when the response carried no freshness signal).
    pub max_age: Option<Duration>,
    /// The response `ETag`, verbatim.
    pub etag: Option<String>,
    /// The response `Last-Modified` header, when parseable.
    pub last_modified: Option<SystemTime>,
    /// Header names declared by the response `Vary` (never `*`).
    pub vary_header_names: Vec<String>,
    /// Normalized values of those headers captured from the storing request.
    pub vary_header_values: Vec<(String, String)>,
    /// `stale-while-revalidate` allowance (RFC 5861).
    pub swr: Option<Duration>,
    /// `stale-if-error` allowance (RFC 5861).
    pub sie: Option<Duration>,
    /// The response carried `must-revalidate`.
    pub must_revalidate: bool,
    /// The response carried `no-cache` (stored with a validator; every use
    /// requires revalidation).
    pub no_cache_in_response: bool,
}

impl CachedRecord {
    /// Serializes the record for persistence.
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(postcard::to_allocvec(self)?.into())
    }

    /// Deserializes a persisted record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }

    /// The stored vary value for `name`, if the record declares it.
    #[must_use]
    pub fn vary_value(&self, name: &str) -> Option<&str> {
        self.vary_header_values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Record persistence over the backing store, keyed by Vary-aware keys.
#[derive(Clone)]
pub(crate) struct MetadataStore {
    store: Arc<dyn CacheStore>,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore").finish_non_exhaustive()
    }
}

impl MetadataStore {
    pub(crate) fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Reads and decodes the record under `key`.
    ///
    /// A record that fails to decode is dropped and reported absent; the
    /// store error path is surfaced so the pipeline can record it.
    pub(crate) async fn get(&self, key: &str) -> Result<Option<CachedRecord>> {
        match self.store.get(key).await? {
            Some(bytes) => match CachedRecord::from_bytes(&bytes) {
                Ok(record) => Ok(Some(record)),
                Err(err) => {
                    log::warn!(
                        "dropping undecodable cache record for {key}: {err}"
                    );
                    self.store.remove(key).await.ok();
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub(crate) async fn set(
        &self,
        key: &str,
        record: &CachedRecord,
    ) -> Result<()> {
        self.store.set(key, record.to_bytes()?).await
    }

    pub(crate) async fn remove(&self, key: &str) -> Result<()> {
        self.store.remove(key).await
    }
}
