//! The request pipeline: orchestrates the policy engine, the stores, and
//! the lower transport around each request.
//!
//! One request flows through exactly one policy decision. Misses are
//! coalesced through the backing store so a single origin call feeds every
//! concurrent caller for the same key; stale-while-revalidate hits return
//! immediately and refresh on a detached background task.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use bytes::Bytes;
use http::header::{HeaderName, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use http::request::Parts;
use http::{response, HeaderValue, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::body::Body;
use crate::content::{self, ContentStore, Ingested};
use crate::directives::{has_pragma_no_cache, CacheControl};
use crate::error::{Error, Result};
use crate::freshness;
use crate::keys::vary_aware_key;
use crate::metadata::{CachedRecord, MetadataStore};
use crate::policy::{self, Bypass, Decision, StoreEval};
use crate::store::{CacheStore, Coalesced, EntryFactory};
use crate::{
    CacheConfig, Clock, Diagnostic, MetricsSink, NoopMetrics, SystemClock,
    Transport, CACHE_HITS, CACHE_MISSES, XCACHE_AGE, XCACHE_COMPRESSED,
    XCACHE_DIAGNOSTIC, XCACHE_MAX_AGE,
};

/// Owns the detached background revalidation tasks.
///
/// Tasks spawned here outlive the request that scheduled them but not the
/// runner: [`TaskRunner::shutdown`] aborts whatever is still running.
#[derive(Debug, Default)]
pub struct TaskRunner {
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl TaskRunner {
    fn spawn(
        &self,
        future: impl std::future::Future<Output = ()> + Send + 'static,
    ) {
        let handle = tokio::spawn(future);
        let mut handles =
            self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.retain(|task| !task.is_finished());
        handles.push(handle);
    }

    /// Aborts every outstanding background task.
    pub fn shutdown(&self) {
        let mut handles =
            self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for task in handles.drain(..) {
            task.abort();
        }
    }

    /// Waits for every outstanding background task to finish.
    pub async fn drain(&self) {
        let handles: Vec<_> = {
            let mut handles =
                self.handles.lock().unwrap_or_else(|e| e.into_inner());
            handles.drain(..).collect()
        };
        for task in handles {
            let _ = task.await;
        }
    }
}

/// A buffered response shared between coalesced waiters when the origin's
/// answer was not storable. Each waiter materializes its own [`Response`]
/// from the envelope.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Envelope {
    async fn collect(parts: response::Parts, body: Body) -> Result<Self> {
        let body = body.collect().await.map_err(Error::Transport)?;
        Ok(Self::from_buffered(&parts, body))
    }

    fn from_buffered(parts: &response::Parts, body: Bytes) -> Self {
        let headers = parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        Self { status: parts.status.as_u16(), headers, body: body.to_vec() }
    }

    fn to_bytes(&self) -> Result<Bytes> {
        Ok(postcard::to_allocvec(self)?.into())
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }

    fn into_response(self) -> Result<Response<Body>> {
        let mut response = Response::builder()
            .status(self.status)
            .body(Body::full(self.body))?;
        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        Ok(response)
    }
}

/// Caches requests according to RFC 9111, delegating to a lower transport.
#[derive(Clone)]
pub struct HttpCache {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CacheStore>,
    metadata: MetadataStore,
    content: ContentStore,
    config: Arc<CacheConfig>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    tasks: Arc<TaskRunner>,
}

impl std::fmt::Debug for HttpCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCache")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl HttpCache {
    /// Builds a cache over `transport` and the backing `store`.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CacheStore>,
        config: CacheConfig,
    ) -> Self {
        let metadata = MetadataStore::new(Arc::clone(&store));
        let content = ContentStore::new(
            Arc::clone(&store),
            config.content_key_prefix.clone(),
        );
        Self {
            transport,
            store,
            metadata,
            content,
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(NoopMetrics),
            tasks: Arc::new(TaskRunner::default()),
        }
    }

    /// Replaces the wall clock, mainly for tests.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attaches a metrics sink for the hit and miss counters.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sends a request through the cache.
    pub async fn send(
        &self,
        request: Request<Body>,
    ) -> Result<Response<Body>> {
        self.execute(request).await
    }

    /// Aborts outstanding background revalidations. Call at shutdown.
    pub fn shutdown(&self) {
        self.tasks.shutdown();
    }

    /// Waits for outstanding background revalidations to settle.
    pub async fn drain_background(&self) {
        self.tasks.drain().await;
    }

    async fn execute(
        &self,
        request: Request<Body>,
    ) -> Result<Response<Body>> {
        let (parts, body) = request.into_parts();
        let now = self.clock.now();
        let request_cc = CacheControl::parse(&parts.headers);

        let is_get_head = parts.method == http::Method::GET
            || parts.method == http::Method::HEAD;
        let needs_record = is_get_head
            && !has_pragma_no_cache(&parts.headers)
            && (request_cc.only_if_cached || !request_cc.no_store);

        let key = vary_aware_key(
            &parts,
            &self.config.vary_headers,
            self.config.cache_key_generator.as_ref(),
            None,
        );
        let mut cache_read_failed = false;
        let record = if needs_record {
            match self.metadata.get(&key).await {
                Ok(record) => record,
                Err(err) => {
                    log::warn!("cache read failed for {key}: {err}");
                    cache_read_failed = true;
                    None
                }
            }
        } else {
            None
        };

        match policy::decide(&parts, record.as_ref(), &self.config, now) {
            Decision::Bypass(reason) => {
                self.forward_bypass(parts, body, reason).await
            }
            Decision::OnlyIfCachedMiss => {
                Ok(self.gateway_timeout(Diagnostic::MissOnlyIfCached)?)
            }
            Decision::OnlyIfCachedHit => {
                let record = record.expect("decision implies record");
                match self.read_cached_body(&record).await? {
                    Some(mut response) => {
                        self.decorate(
                            &mut response,
                            Diagnostic::HitOnlyIfCached,
                            Some((&record, now)),
                        );
                        Ok(response)
                    }
                    None => {
                        self.drop_orphaned(&key).await;
                        Ok(self
                            .gateway_timeout(Diagnostic::MissOnlyIfCached)?)
                    }
                }
            }
            Decision::ServeFresh => {
                let record = record.expect("decision implies record");
                match self.read_cached_body(&record).await? {
                    Some(mut response) => {
                        self.decorate(
                            &mut response,
                            Diagnostic::HitFresh,
                            Some((&record, now)),
                        );
                        Ok(response)
                    }
                    None => {
                        self.drop_orphaned(&key).await;
                        self.coalesced_fetch(parts, key, Diagnostic::Miss)
                            .await
                    }
                }
            }
            Decision::ServeStaleRevalidate => {
                let record = record.expect("decision implies record");
                match self.read_cached_body(&record).await? {
                    Some(mut response) => {
                        self.decorate(
                            &mut response,
                            Diagnostic::HitStaleWhileRevalidate,
                            Some((&record, now)),
                        );
                        self.spawn_background_revalidation(
                            key,
                            record,
                            parts,
                        );
                        Ok(response)
                    }
                    None => {
                        self.drop_orphaned(&key).await;
                        self.coalesced_fetch(parts, key, Diagnostic::Miss)
                            .await
                    }
                }
            }
            Decision::Revalidate => {
                let record = record.expect("decision implies record");
                self.revalidate(&key, record, parts, now, false).await
            }
            Decision::Miss => {
                let token = if cache_read_failed {
                    Diagnostic::MissCacheError
                } else {
                    Diagnostic::Miss
                };
                self.coalesced_fetch(parts, key, token).await
            }
        }
    }

    /// Forwards a request the cache must not answer or store.
    ///
    /// A non-error response to an unsafe method additionally invalidates
    /// the GET entry for the same resource.
    async fn forward_bypass(
        &self,
        parts: Parts,
        body: Body,
        reason: Bypass,
    ) -> Result<Response<Body>> {
        let invalidate_key = (reason == Bypass::Method).then(|| {
            vary_aware_key(
                &parts,
                &self.config.vary_headers,
                self.config.cache_key_generator.as_ref(),
                Some("GET"),
            )
        });
        let request = Request::from_parts(parts, body);
        let mut response = self.transport.send(request).await?;
        if let Some(key) = invalidate_key {
            if response.status().as_u16() < 400 {
                if let Err(err) = self.metadata.remove(&key).await {
                    log::debug!("invalidation failed for {key}: {err}");
                }
            }
        }
        let token = match reason {
            Bypass::Method => Diagnostic::BypassMethod,
            Bypass::NoStore => Diagnostic::BypassNoStore,
            Bypass::PragmaNoCache => Diagnostic::BypassPragmaNoCache,
        };
        self.decorate(&mut response, token, None);
        Ok(response)
    }

    /// The only synthesized failure: `only-if-cached` with nothing to serve.
    fn gateway_timeout(&self, token: Diagnostic) -> Result<Response<Body>> {
        let mut response = Response::builder()
            .status(StatusCode::GATEWAY_TIMEOUT)
            .body(Body::empty())?;
        self.decorate(&mut response, token, None);
        Ok(response)
    }

    /// Reconstructs the outbound response for a record, or `None` when the
    /// content entry has gone missing.
    async fn read_cached_body(
        &self,
        record: &CachedRecord,
    ) -> Result<Option<Response<Body>>> {
        let raw = match self.content.get(&record.content_digest).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(err) => {
                log::warn!("content read failed: {err}");
                return Ok(None);
            }
        };
        let bytes = if record.is_compressed {
            content::decompress(&raw)?
        } else {
            raw
        };
        let mut response = Response::builder()
            .status(record.status)
            .body(Body::Full(bytes))?;
        let headers = response.headers_mut();
        for (name, value) in
            record.response_headers.iter().chain(&record.content_headers)
        {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        Ok(Some(response))
    }

    /// Removes a metadata record whose content entry has vanished.
    async fn drop_orphaned(&self, key: &str) {
        log::warn!("cached content missing for {key}; dropping record");
        if let Err(err) = self.metadata.remove(key).await {
            log::debug!("removal of orphaned record {key} failed: {err}");
        }
    }

    /// Runs the coalesced origin fetch for a miss.
    ///
    /// The factory performs the origin call and the storability decision;
    /// the backing store guarantees at most one runs per key per process,
    /// and every waiter builds its own response from the shared outcome.
    async fn coalesced_fetch(
        &self,
        parts: Parts,
        key: String,
        token: Diagnostic,
    ) -> Result<Response<Body>> {
        let factory = self.miss_factory(parts.clone(), key.clone());
        let outcome = match self.store.get_or_create(&key, factory).await {
            Ok(outcome) => outcome,
            Err(Error::Store(err)) => {
                // The store itself failed, not the origin; the caller can
                // still be served directly.
                log::warn!("coalesced fetch failed for {key}: {err}");
                let request = Request::from_parts(parts, Body::empty());
                let mut response = self.transport.send(request).await?;
                self.decorate(
                    &mut response,
                    Diagnostic::MissCacheError,
                    None,
                );
                return Ok(response);
            }
            Err(err) => return Err(err),
        };
        match outcome {
            Coalesced::Record(bytes) => {
                let record = CachedRecord::from_bytes(&bytes)?;
                match self.read_cached_body(&record).await? {
                    Some(mut response) => {
                        self.decorate(&mut response, token, None);
                        Ok(response)
                    }
                    None => {
                        // The entry vanished between the write and this
                        // read; answer from the origin directly.
                        self.drop_orphaned(&key).await;
                        let request =
                            Request::from_parts(parts, Body::empty());
                        let mut response =
                            self.transport.send(request).await?;
                        self.decorate(&mut response, token, None);
                        Ok(response)
                    }
                }
            }
            Coalesced::Passthrough(bytes) => {
                let mut response =
                    Envelope::from_bytes(&bytes)?.into_response()?;
                self.decorate(&mut response, token, None);
                Ok(response)
            }
        }
    }

    /// Builds the single-flight factory for a miss on `key`.
    fn miss_factory(&self, parts: Parts, key: String) -> EntryFactory {
        let transport = Arc::clone(&self.transport);
        let metadata = self.metadata.clone();
        let content = self.content.clone();
        let config = Arc::clone(&self.config);
        let clock = Arc::clone(&self.clock);
        Box::pin(async move {
            let request = Request::from_parts(parts.clone(), Body::empty());
            let response = transport.send(request).await?;
            let (resp_parts, resp_body) = response.into_parts();
            let eval = policy::evaluate_storability(
                &parts,
                resp_parts.status,
                &resp_parts.headers,
                resp_body.len_hint().map(|len| len as u64),
                &config,
            );
            let plan = match eval {
                StoreEval::NotStorable { invalidate } => {
                    if invalidate {
                        if let Err(err) = metadata.remove(&key).await {
                            log::debug!(
                                "invalidation failed for {key}: {err}"
                            );
                        }
                    }
                    let envelope =
                        Envelope::collect(resp_parts, resp_body).await?;
                    return Ok(Coalesced::Passthrough(envelope.to_bytes()?));
                }
                StoreEval::Storable(plan) => plan,
            };
            let bytes = match content::ingest(
                resp_body,
                config.max_cacheable_content_size,
            )
            .await?
            {
                Ingested::TooLarge(body) => {
                    let envelope =
                        Envelope::collect(resp_parts, body).await?;
                    return Ok(Coalesced::Passthrough(envelope.to_bytes()?));
                }
                Ingested::Complete(bytes) => bytes,
            };
            let (stored, is_compressed) =
                maybe_compress(&config, &resp_parts.headers, &bytes);
            match content.put(stored.clone()).await {
                Ok(digest) => {
                    let record = policy::build_record(
                        plan,
                        &parts.headers,
                        resp_parts.status,
                        &resp_parts.headers,
                        digest,
                        stored.len() as u64,
                        is_compressed,
                        clock.now(),
                    );
                    Ok(Coalesced::Record(record.to_bytes()?))
                }
                Err(err) => {
                    log::debug!(
                        "content write failed for {key}; serving uncached: {err}"
                    );
                    let envelope = Envelope::from_buffered(&resp_parts, bytes);
                    Ok(Coalesced::Passthrough(envelope.to_bytes()?))
                }
            }
        })
    }

    /// Conditional revalidation against the origin.
    ///
    /// `quiet` suppresses diagnostics and counters for the background
    /// variant, whose response is discarded.
    async fn revalidate(
        &self,
        key: &str,
        mut record: CachedRecord,
        parts: Parts,
        now: SystemTime,
        quiet: bool,
    ) -> Result<Response<Body>> {
        let mut reval_parts = parts.clone();
        if let Some(etag) = &record.etag {
            if let Ok(value) = HeaderValue::from_str(etag) {
                reval_parts.headers.insert(IF_NONE_MATCH, value);
            }
        } else if let Some(last_modified) = record.last_modified {
            let date = httpdate::fmt_http_date(last_modified);
            if let Ok(value) = HeaderValue::from_str(&date) {
                reval_parts.headers.insert(IF_MODIFIED_SINCE, value);
            }
        }
        let request = Request::from_parts(reval_parts, Body::empty());
        let pct = self.config.heuristic_freshness_percent;

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(err) => {
                if freshness::within_sie(&record, pct, now) {
                    if let Some(mut response) =
                        self.read_cached_body(&record).await?
                    {
                        if !quiet {
                            self.decorate(
                                &mut response,
                                Diagnostic::HitStaleIfError,
                                Some((&record, now)),
                            );
                        }
                        return Ok(response);
                    }
                    self.drop_orphaned(key).await;
                }
                return Err(err);
            }
        };

        if response.status() == StatusCode::NOT_MODIFIED {
            policy::refresh_from_304(
                &mut record,
                response.headers(),
                self.config.mode,
            );
            if let Err(err) = self.metadata.set(key, &record).await {
                log::debug!("refresh write failed for {key}: {err}");
            }
            return match self.read_cached_body(&record).await? {
                Some(mut served) => {
                    if !quiet {
                        self.decorate(
                            &mut served,
                            Diagnostic::HitRevalidated,
                            Some((&record, now)),
                        );
                    }
                    Ok(served)
                }
                None => {
                    // The validated body is gone; hand the 304 through and
                    // forget the record.
                    self.drop_orphaned(key).await;
                    let mut response = response;
                    if !quiet {
                        self.decorate(
                            &mut response,
                            Diagnostic::MissRevalidated,
                            None,
                        );
                    }
                    Ok(response)
                }
            };
        }

        if response.status().is_server_error()
            && freshness::within_sie(&record, pct, now)
        {
            if let Some(mut served) = self.read_cached_body(&record).await? {
                if !quiet {
                    self.decorate(
                        &mut served,
                        Diagnostic::HitStaleIfError,
                        Some((&record, now)),
                    );
                }
                return Ok(served);
            }
            self.drop_orphaned(key).await;
        }

        let (resp_parts, resp_body) = response.into_parts();
        let eval = policy::evaluate_storability(
            &parts,
            resp_parts.status,
            &resp_parts.headers,
            resp_body.len_hint().map(|len| len as u64),
            &self.config,
        );
        let mut response = match eval {
            StoreEval::Storable(plan) => {
                match content::ingest(
                    resp_body,
                    self.config.max_cacheable_content_size,
                )
                .await?
                {
                    Ingested::TooLarge(body) => {
                        Response::from_parts(resp_parts, body)
                    }
                    Ingested::Complete(bytes) => {
                        self.store_replacing(
                            key,
                            &parts,
                            &resp_parts,
                            plan,
                            bytes.clone(),
                        )
                        .await;
                        Response::from_parts(resp_parts, Body::Full(bytes))
                    }
                }
            }
            StoreEval::NotStorable { invalidate } => {
                if invalidate {
                    if let Err(err) = self.metadata.remove(key).await {
                        log::debug!("invalidation failed for {key}: {err}");
                    }
                }
                Response::from_parts(resp_parts, resp_body)
            }
        };
        if !quiet {
            self.decorate(&mut response, Diagnostic::MissRevalidated, None);
        }
        Ok(response)
    }

    /// Stores a revalidation's full response, replacing the prior record.
    /// Write failures leave the caller's response untouched.
    async fn store_replacing(
        &self,
        key: &str,
        parts: &Parts,
        resp_parts: &response::Parts,
        plan: policy::StorePlan,
        bytes: Bytes,
    ) {
        let (stored, is_compressed) =
            maybe_compress(&self.config, &resp_parts.headers, &bytes);
        let digest = match self.content.put(stored.clone()).await {
            Ok(digest) => digest,
            Err(err) => {
                log::debug!("content write failed for {key}: {err}");
                return;
            }
        };
        let record = policy::build_record(
            plan,
            &parts.headers,
            resp_parts.status,
            &resp_parts.headers,
            digest,
            stored.len() as u64,
            is_compressed,
            self.clock.now(),
        );
        if let Err(err) = self.metadata.set(key, &record).await {
            log::debug!("metadata write failed for {key}: {err}");
        }
    }

    /// Launches the fire-and-forget refresh behind a
    /// stale-while-revalidate hit. Errors are absorbed; the stale entry
    /// stays valid until overwritten or evicted.
    fn spawn_background_revalidation(
        &self,
        key: String,
        record: CachedRecord,
        parts: Parts,
    ) {
        let cache = self.clone();
        self.tasks.spawn(async move {
            let now = cache.clock.now();
            if let Err(err) =
                cache.revalidate(&key, record, parts, now, true).await
            {
                log::debug!(
                    "background revalidation for {key} failed: {err}"
                );
            }
        });
    }

    /// Counts the decision and attaches the diagnostic headers.
    fn decorate(
        &self,
        response: &mut Response<Body>,
        token: Diagnostic,
        hit: Option<(&CachedRecord, SystemTime)>,
    ) {
        if token.is_hit() {
            self.metrics.increment(CACHE_HITS);
        } else if token.is_miss() {
            self.metrics.increment(CACHE_MISSES);
        }
        if !self.config.include_diagnostic_headers {
            return;
        }
        let headers = response.headers_mut();
        headers.insert(
            XCACHE_DIAGNOSTIC,
            HeaderValue::from_static(token.as_str()),
        );
        if let Some((record, now)) = hit {
            let age = now
                .duration_since(record.cached_at)
                .unwrap_or_default()
                .as_secs();
            if let Ok(value) = HeaderValue::from_str(&age.to_string()) {
                headers.insert(XCACHE_AGE, value);
            }
            if let Some(lifetime) = freshness::freshness_lifetime(
                record,
                self.config.heuristic_freshness_percent,
            ) {
                if let Ok(value) =
                    HeaderValue::from_str(&lifetime.as_secs().to_string())
                {
                    headers.insert(XCACHE_MAX_AGE, value);
                }
            }
            if record.is_compressed {
                headers.insert(
                    XCACHE_COMPRESSED,
                    HeaderValue::from_static("true"),
                );
            }
        }
    }
}

/// Compresses `bytes` when the configuration and media type allow it and
/// compression actually shrinks the payload.
fn maybe_compress(
    config: &CacheConfig,
    headers: &http::HeaderMap,
    bytes: &Bytes,
) -> (Bytes, bool) {
    let Some(threshold) = config.compression_threshold else {
        return (bytes.clone(), false);
    };
    if (bytes.len() as u64) < threshold {
        return (bytes.clone(), false);
    }
    let compressible = policy::content_type(headers).is_some_and(|ct| {
        policy::media_type_matches(&config.compressible_content_types, ct)
    });
    if !compressible {
        return (bytes.clone(), false);
    }
    match content::compress(bytes) {
        Ok(packed) if packed.len() < bytes.len() => (packed, true),
        Ok(_) => (bytes.clone(), false),
        Err(err) => {
            log::debug!("compression failed; storing raw bytes: {err}");
            (bytes.clone(), false)
        }
    }
}

#[async_trait::async_trait]
impl Transport for HttpCache {
    async fn send(
        &self,
        request: Request<Body>,
    ) -> Result<Response<Body>> {
        self.execute(request).await
    }
}
