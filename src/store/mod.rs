//! The backing cache contract and the in-process implementation.
//!
//! The pipeline treats the backing cache as a generic key/value store with
//! one extra capability: single-flight `get_or_create`, which guarantees
//! that concurrent callers for the same key share a single factory
//! invocation. The store decides tiering (a fast in-process L1 and an
//! optional cross-process L2); the pipeline only assumes L1 is cheaper.

mod moka;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::Result;

pub use self::moka::MokaStore;

/// A factory run at most once per key per process for concurrent callers.
pub type EntryFactory = BoxFuture<'static, Result<Coalesced>>;

/// Outcome of a single-flight `get_or_create`, shared by every waiter.
#[derive(Debug, Clone)]
pub enum Coalesced {
    /// A serialized metadata record, persisted under the key.
    Record(Bytes),
    /// A non-storable response envelope: shared with the coalesced waiters
    /// but never retained by the store.
    Passthrough(Bytes),
}

/// A generic key/value store with value-coalescing semantics.
///
/// All operations may fail; the pipeline treats failures as cache absence
/// and keeps serving from the origin.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Reads the value under `key`.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Writes `value` under `key`, replacing any existing value.
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Removes the value under `key`; absent keys are not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Returns the value under `key`, or runs `factory` to create it.
    ///
    /// Concurrent callers for the same key must share one factory
    /// invocation: a single origin call per key per process. A
    /// [`Coalesced::Record`] outcome is persisted under the key; a
    /// [`Coalesced::Passthrough`] outcome is handed to every waiter and
    /// then discarded. A factory error is delivered to every waiter.
    async fn get_or_create(
        &self,
        key: &str,
        factory: EntryFactory,
    ) -> Result<Coalesced>;
}
