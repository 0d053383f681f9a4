//! In-process backing store built on [`moka`](https://github.com/moka-rs/moka).
//!
//! Single-flight coalescing is delegated to moka's entry API: concurrent
//! `or_try_insert_with` calls for one key share a single init future. An
//! optional second tier extends the store across processes; reads promote
//! into the in-process tier, writes and removals pass through.

use std::sync::Arc;

use bytes::Bytes;
use moka::future::Cache;

use super::{CacheStore, Coalesced, EntryFactory};
use crate::error::{Error, Result};

/// A hybrid two-tier cache store: moka in-process L1, optional L2 delegate.
#[derive(Clone)]
pub struct MokaStore {
    cache: Cache<String, Coalesced>,
    second_tier: Option<Arc<dyn CacheStore>>,
}

impl std::fmt::Debug for MokaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaStore")
            .field("entry_count", &self.cache.entry_count())
            .field("second_tier", &self.second_tier.is_some())
            .finish()
    }
}

impl MokaStore {
    /// Creates a store holding up to `max_capacity` entries in-process.
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self { cache: Cache::new(max_capacity), second_tier: None }
    }

    /// Wraps a pre-configured moka cache.
    #[must_use]
    pub fn from_cache(cache: Cache<String, Coalesced>) -> Self {
        Self { cache, second_tier: None }
    }

    /// Attaches a cross-process second tier.
    #[must_use]
    pub fn with_second_tier(mut self, tier: Arc<dyn CacheStore>) -> Self {
        self.second_tier = Some(tier);
        self
    }

    /// Drops every in-process entry.
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait::async_trait]
impl CacheStore for MokaStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        if let Some(Coalesced::Record(bytes)) = self.cache.get(key).await {
            return Ok(Some(bytes));
        }
        if let Some(tier) = &self.second_tier {
            if let Some(bytes) = tier.get(key).await? {
                self.cache
                    .insert(key.to_string(), Coalesced::Record(bytes.clone()))
                    .await;
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.cache
            .insert(key.to_string(), Coalesced::Record(value.clone()))
            .await;
        if let Some(tier) = &self.second_tier {
            tier.set(key, value).await?;
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key).await;
        if let Some(tier) = &self.second_tier {
            tier.remove(key).await?;
        }
        Ok(())
    }

    async fn get_or_create(
        &self,
        key: &str,
        factory: EntryFactory,
    ) -> Result<Coalesced> {
        let entry = self
            .cache
            .entry_by_ref(key)
            .or_try_insert_with(factory)
            .await
            .map_err(|err: Arc<Error>| Error::from(err))?;
        let outcome = entry.value().clone();
        if entry.is_fresh() {
            match &outcome {
                // Transient outcomes are shared with the waiters only.
                Coalesced::Passthrough(_) => {
                    self.cache.invalidate(key).await;
                }
                Coalesced::Record(bytes) => {
                    if let Some(tier) = &self.second_tier {
                        if let Err(err) = tier.set(key, bytes.clone()).await {
                            log::debug!(
                                "second-tier write failed for {key}: {err}"
                            );
                        }
                    }
                }
            }
        }
        Ok(outcome)
    }
}
