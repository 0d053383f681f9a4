use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use futures::stream;
use http::request::Parts;
use http::{Request, Response};

use crate::{
    Body, CacheConfig, Clock, Diagnostic, Error, HttpCache, MetricsSink,
    MokaStore, Result, Transport, CACHE_HITS, CACHE_MISSES, XCACHE_AGE,
    XCACHE_COMPRESSED, XCACHE_DIAGNOSTIC, XCACHE_MAX_AGE,
};

/// A clock the tests advance by hand.
#[derive(Debug)]
struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(
                SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000),
            ),
        })
    }

    fn advance(&self, delta: Duration) {
        *self.now.lock().unwrap() += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }
}

#[derive(Debug)]
enum ScriptStep {
    Respond {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: Vec<u8>,
        stream: bool,
    },
    Fail(&'static str),
}

/// A scripted origin that records every request it receives.
#[derive(Debug)]
struct MockTransport {
    script: Mutex<VecDeque<ScriptStep>>,
    requests: Mutex<Vec<Parts>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: None,
        })
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        })
    }

    fn push_ok(
        &self,
        status: u16,
        headers: &[(&'static str, &'static str)],
        body: &[u8],
    ) {
        self.script.lock().unwrap().push_back(ScriptStep::Respond {
            status,
            headers: headers.to_vec(),
            body: body.to_vec(),
            stream: false,
        });
    }

    fn push_streamed(
        &self,
        status: u16,
        headers: &[(&'static str, &'static str)],
        body: &[u8],
    ) {
        self.script.lock().unwrap().push_back(ScriptStep::Respond {
            status,
            headers: headers.to_vec(),
            body: body.to_vec(),
            stream: true,
        });
    }

    fn push_error(&self, message: &'static str) {
        self.script.lock().unwrap().push_back(ScriptStep::Fail(message));
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn request_header(&self, index: usize, name: &str) -> Option<String> {
        self.requests.lock().unwrap().get(index).and_then(|parts| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: Request<Body>,
    ) -> Result<Response<Body>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (parts, _) = request.into_parts();
        self.requests.lock().unwrap().push(parts);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("origin script exhausted");
        match step {
            ScriptStep::Fail(message) => Err(Error::transport(
                std::io::Error::new(std::io::ErrorKind::Other, message),
            )),
            ScriptStep::Respond { status, headers, body, stream } => {
                let mut builder = Response::builder().status(status);
                for (name, value) in headers {
                    builder = builder.header(name, value);
                }
                let body = if stream {
                    let chunks: Vec<_> = body
                        .chunks(4)
                        .map(|c| Ok(Bytes::copy_from_slice(c)))
                        .collect();
                    Body::from_stream(stream::iter(chunks))
                } else {
                    Body::full(body)
                };
                Ok(builder.body(body)?)
            }
        }
    }
}

#[derive(Debug, Default)]
struct CountingMetrics {
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl MetricsSink for CountingMetrics {
    fn increment(&self, counter: &'static str) {
        match counter {
            CACHE_HITS => self.hits.fetch_add(1, Ordering::SeqCst),
            CACHE_MISSES => self.misses.fetch_add(1, Ordering::SeqCst),
            _ => 0,
        };
    }
}

fn build_cache(
    transport: &Arc<MockTransport>,
    clock: &Arc<ManualClock>,
    config: CacheConfig,
) -> HttpCache {
    let config =
        CacheConfig { include_diagnostic_headers: true, ..config };
    let transport: Arc<dyn Transport> = transport.clone();
    let clock: Arc<dyn Clock> = clock.clone();
    HttpCache::new(transport, Arc::new(MokaStore::new(4096)), config)
        .with_clock(clock)
}

fn get(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::get(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

fn diag(response: &Response<Body>) -> String {
    response
        .headers()
        .get(XCACHE_DIAGNOSTIC)
        .expect("diagnostic header")
        .to_str()
        .unwrap()
        .to_string()
}

async fn body_of(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap()
}

#[tokio::test]
async fn cacheable_hit_is_served_without_origin_contact() {
    let origin = MockTransport::new();
    origin.push_ok(200, &[("cache-control", "max-age=3600")], b"A");
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    let first = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(diag(&first), Diagnostic::Miss.as_str());
    assert_eq!(body_of(first).await, Bytes::from("A"));

    clock.advance(Duration::from_secs(30));
    let second = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(diag(&second), Diagnostic::HitFresh.as_str());
    assert_eq!(second.status(), 200);
    assert_eq!(body_of(second).await, Bytes::from("A"));
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn revalidation_304_refreshes_and_keeps_the_body() {
    let origin = MockTransport::new();
    origin.push_ok(
        200,
        &[("cache-control", "max-age=1"), ("etag", "\"v1\"")],
        b"old",
    );
    origin.push_ok(304, &[("cache-control", "max-age=3600")], b"");
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    cache.send(get("https://h/x", &[])).await.unwrap();
    clock.advance(Duration::from_secs(2));

    let revalidated = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(
        origin.request_header(1, "if-none-match").as_deref(),
        Some("\"v1\"")
    );
    assert_eq!(revalidated.status(), 200);
    assert_eq!(diag(&revalidated), Diagnostic::HitRevalidated.as_str());
    assert_eq!(body_of(revalidated).await, Bytes::from("old"));

    // Half an hour later the refreshed lifetime still covers the entry.
    clock.advance(Duration::from_secs(1800));
    let third = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(diag(&third), Diagnostic::HitFresh.as_str());
    assert_eq!(body_of(third).await, Bytes::from("old"));
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn stale_while_revalidate_serves_then_refreshes() {
    let origin = MockTransport::new();
    origin.push_ok(
        200,
        &[
            ("cache-control", "max-age=1, stale-while-revalidate=5"),
            ("etag", "\"v1\""),
        ],
        b"1",
    );
    origin.push_ok(200, &[("cache-control", "max-age=60")], b"2");
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    cache.send(get("https://h/x", &[])).await.unwrap();
    clock.advance(Duration::from_secs(2));

    let stale = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(
        diag(&stale),
        Diagnostic::HitStaleWhileRevalidate.as_str()
    );
    assert_eq!(body_of(stale).await, Bytes::from("1"));

    cache.drain_background().await;
    assert_eq!(origin.calls(), 2);
    assert_eq!(
        origin.request_header(1, "if-none-match").as_deref(),
        Some("\"v1\"")
    );

    let refreshed = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(diag(&refreshed), Diagnostic::HitFresh.as_str());
    assert_eq!(body_of(refreshed).await, Bytes::from("2"));
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn stale_if_error_masks_5xx_within_its_window() {
    let origin = MockTransport::new();
    origin.push_ok(
        200,
        &[("cache-control", "max-age=1, stale-if-error=10")],
        b"ok",
    );
    origin.push_ok(500, &[], b"boom");
    origin.push_ok(500, &[], b"boom");
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    cache.send(get("https://h/x", &[])).await.unwrap();
    clock.advance(Duration::from_secs(2));

    let masked = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(masked.status(), 200);
    assert_eq!(diag(&masked), Diagnostic::HitStaleIfError.as_str());
    assert_eq!(body_of(masked).await, Bytes::from("ok"));

    // Past the stale-if-error window the failure surfaces.
    clock.advance(Duration::from_secs(12));
    let surfaced = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(surfaced.status(), 500);
    assert_eq!(diag(&surfaced), Diagnostic::MissRevalidated.as_str());
    assert_eq!(origin.calls(), 3);
}

#[tokio::test]
async fn transport_errors_also_fall_back_to_stale_if_error() {
    let origin = MockTransport::new();
    origin.push_ok(
        200,
        &[("cache-control", "max-age=1, stale-if-error=10")],
        b"ok",
    );
    origin.push_error("connection refused");
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    cache.send(get("https://h/x", &[])).await.unwrap();
    clock.advance(Duration::from_secs(2));

    let masked = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(diag(&masked), Diagnostic::HitStaleIfError.as_str());
    assert_eq!(body_of(masked).await, Bytes::from("ok"));
}

#[tokio::test]
async fn transport_errors_surface_without_a_stale_fallback() {
    let origin = MockTransport::new();
    origin.push_error("connection refused");
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    let err = cache.send(get("https://h/x", &[])).await.unwrap_err();
    assert!(err.to_string().contains("connection refused"));
}

#[tokio::test]
async fn only_if_cached_never_contacts_the_origin() {
    let origin = MockTransport::new();
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    let response = cache
        .send(get("https://h/x", &[("cache-control", "only-if-cached")]))
        .await
        .unwrap();
    assert_eq!(response.status(), 504);
    assert_eq!(diag(&response), Diagnostic::MissOnlyIfCached.as_str());
    assert_eq!(origin.calls(), 0);
}

#[tokio::test]
async fn only_if_cached_serves_a_fresh_entry() {
    let origin = MockTransport::new();
    origin.push_ok(200, &[("cache-control", "max-age=60")], b"A");
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    cache.send(get("https://h/x", &[])).await.unwrap();
    let response = cache
        .send(get("https://h/x", &[("cache-control", "only-if-cached")]))
        .await
        .unwrap();
    assert_eq!(diag(&response), Diagnostic::HitOnlyIfCached.as_str());
    assert_eq!(body_of(response).await, Bytes::from("A"));
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn vary_partitions_entries_by_negotiated_value() {
    let origin = MockTransport::new();
    origin.push_ok(
        200,
        &[("cache-control", "max-age=60"), ("vary", "Accept")],
        b"json",
    );
    origin.push_ok(
        200,
        &[("cache-control", "max-age=60"), ("vary", "Accept")],
        b"xml",
    );
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    let json = &[("accept", "application/json")];
    let xml = &[("accept", "application/xml")];

    let first = cache.send(get("https://h/x", json)).await.unwrap();
    assert_eq!(diag(&first), Diagnostic::Miss.as_str());

    let second = cache.send(get("https://h/x", json)).await.unwrap();
    assert_eq!(diag(&second), Diagnostic::HitFresh.as_str());
    assert_eq!(body_of(second).await, Bytes::from("json"));

    let third = cache.send(get("https://h/x", xml)).await.unwrap();
    assert_eq!(diag(&third), Diagnostic::Miss.as_str());
    assert_eq!(body_of(third).await, Bytes::from("xml"));
    assert_eq!(origin.calls(), 2);

    let fourth = cache.send(get("https://h/x", json)).await.unwrap();
    assert_eq!(body_of(fourth).await, Bytes::from("json"));
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn min_fresh_rejects_a_nearly_stale_entry() {
    let origin = MockTransport::new();
    origin.push_ok(200, &[("cache-control", "max-age=30")], b"A");
    origin.push_ok(200, &[("cache-control", "max-age=30")], b"A");
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    cache.send(get("https://h/x", &[])).await.unwrap();
    clock.advance(Duration::from_secs(10));

    // 20s of freshness remain, less than the requested 30s.
    let response = cache
        .send(get("https://h/x", &[("cache-control", "min-fresh=30")]))
        .await
        .unwrap();
    assert_eq!(diag(&response), Diagnostic::MissRevalidated.as_str());
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn unsafe_methods_bypass_and_invalidate() {
    let origin = MockTransport::new();
    origin.push_ok(200, &[("cache-control", "max-age=3600")], b"A");
    origin.push_ok(200, &[], b"done");
    origin.push_ok(200, &[("cache-control", "max-age=3600")], b"B");
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    cache.send(get("https://h/x", &[])).await.unwrap();

    let post = Request::post("https://h/x").body(Body::empty()).unwrap();
    let response = cache.send(post).await.unwrap();
    assert_eq!(diag(&response), Diagnostic::BypassMethod.as_str());
    assert_eq!(body_of(response).await, Bytes::from("done"));

    // The stored GET entry is gone, so the next read goes to the origin.
    let after = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(diag(&after), Diagnostic::Miss.as_str());
    assert_eq!(body_of(after).await, Bytes::from("B"));
    assert_eq!(origin.calls(), 3);
}

#[tokio::test]
async fn pragma_no_cache_bypasses_the_cache() {
    let origin = MockTransport::new();
    origin.push_ok(200, &[("cache-control", "max-age=3600")], b"A");
    origin.push_ok(200, &[("cache-control", "max-age=3600")], b"B");
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    cache.send(get("https://h/x", &[])).await.unwrap();
    let response = cache
        .send(get("https://h/x", &[("pragma", "no-cache")]))
        .await
        .unwrap();
    assert_eq!(diag(&response), Diagnostic::BypassPragmaNoCache.as_str());
    assert_eq!(body_of(response).await, Bytes::from("B"));
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn no_store_response_evicts_the_prior_entry() {
    let origin = MockTransport::new();
    origin.push_ok(200, &[("cache-control", "max-age=3600")], b"A");
    origin.push_ok(200, &[("cache-control", "no-store")], b"B");
    origin.push_ok(200, &[("cache-control", "max-age=3600")], b"C");
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    cache.send(get("https://h/x", &[])).await.unwrap();

    // Force a revalidation; the origin answers with no-store.
    let evicting = cache
        .send(get("https://h/x", &[("cache-control", "no-cache")]))
        .await
        .unwrap();
    assert_eq!(body_of(evicting).await, Bytes::from("B"));

    let after = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(diag(&after), Diagnostic::Miss.as_str());
    assert_eq!(body_of(after).await, Bytes::from("C"));
    assert_eq!(origin.calls(), 3);
}

#[tokio::test]
async fn vary_wildcard_is_never_stored() {
    let origin = MockTransport::new();
    origin.push_ok(
        200,
        &[("cache-control", "max-age=60"), ("vary", "*")],
        b"A",
    );
    origin.push_ok(
        200,
        &[("cache-control", "max-age=60"), ("vary", "*")],
        b"A",
    );
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    let first = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(diag(&first), Diagnostic::Miss.as_str());
    assert_eq!(body_of(first).await, Bytes::from("A"));

    let second = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(diag(&second), Diagnostic::Miss.as_str());
    assert_eq!(origin.calls(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_misses_coalesce_into_one_origin_call() {
    let origin = MockTransport::with_delay(Duration::from_millis(40));
    origin.push_ok(200, &[("cache-control", "max-age=60")], b"A");
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        tasks.push(tokio::spawn(async move {
            cache.send(get("https://h/x", &[])).await
        }));
    }
    for task in tasks {
        let response = task.await.unwrap().unwrap();
        assert_eq!(diag(&response), Diagnostic::Miss.as_str());
        assert_eq!(body_of(response).await, Bytes::from("A"));
    }
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn oversized_bodies_reach_the_caller_but_are_not_stored() {
    let origin = MockTransport::new();
    origin.push_streamed(
        200,
        &[("cache-control", "max-age=60")],
        b"twelve bytes",
    );
    origin.push_ok(200, &[("cache-control", "max-age=60")], b"again");
    let clock = ManualClock::new();
    let config = CacheConfig {
        max_cacheable_content_size: Some(8),
        ..Default::default()
    };
    let cache = build_cache(&origin, &clock, config);

    let first = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(diag(&first), Diagnostic::Miss.as_str());
    assert_eq!(body_of(first).await, Bytes::from("twelve bytes"));

    let second = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(diag(&second), Diagnostic::Miss.as_str());
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn large_compressible_bodies_round_trip_through_compression() {
    let payload = vec![b'a'; 4096];
    let origin = MockTransport::new();
    origin.push_ok(
        200,
        &[
            ("cache-control", "max-age=60"),
            ("content-type", "application/json"),
        ],
        &payload,
    );
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    cache.send(get("https://h/x", &[])).await.unwrap();
    let hit = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(diag(&hit), Diagnostic::HitFresh.as_str());
    assert_eq!(
        hit.headers().get(XCACHE_COMPRESSED).unwrap(),
        "true"
    );
    assert_eq!(
        hit.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(body_of(hit).await, Bytes::from(payload));
}

#[tokio::test]
async fn default_cache_duration_covers_unbounded_responses() {
    let origin = MockTransport::new();
    origin.push_ok(200, &[], b"A");
    let clock = ManualClock::new();
    let config = CacheConfig {
        default_cache_duration: Some(Duration::from_secs(300)),
        ..Default::default()
    };
    let cache = build_cache(&origin, &clock, config);

    cache.send(get("https://h/x", &[])).await.unwrap();
    clock.advance(Duration::from_secs(200));
    let hit = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(diag(&hit), Diagnostic::HitFresh.as_str());
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn diagnostic_headers_report_age_and_lifetime() {
    let origin = MockTransport::new();
    origin.push_ok(200, &[("cache-control", "max-age=3600")], b"A");
    let clock = ManualClock::new();
    let cache = build_cache(&origin, &clock, CacheConfig::default());

    cache.send(get("https://h/x", &[])).await.unwrap();
    clock.advance(Duration::from_secs(30));
    let hit = cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(hit.headers().get(XCACHE_AGE).unwrap(), "30");
    assert_eq!(hit.headers().get(XCACHE_MAX_AGE).unwrap(), "3600");
}

#[tokio::test]
async fn diagnostic_headers_can_be_disabled() {
    let origin = MockTransport::new();
    origin.push_ok(200, &[("cache-control", "max-age=3600")], b"A");
    let clock = ManualClock::new();
    let origin_transport: Arc<dyn Transport> = origin.clone();
    let origin_clock: Arc<dyn Clock> = clock.clone();
    let cache = HttpCache::new(
        origin_transport,
        Arc::new(MokaStore::new(64)),
        CacheConfig::default(),
    )
    .with_clock(origin_clock);

    let response = cache.send(get("https://h/x", &[])).await.unwrap();
    assert!(response.headers().get(XCACHE_DIAGNOSTIC).is_none());
}

#[tokio::test]
async fn hit_and_miss_counters_track_final_decisions() {
    let origin = MockTransport::new();
    origin.push_ok(200, &[("cache-control", "max-age=3600")], b"A");
    let clock = ManualClock::new();
    let metrics = Arc::new(CountingMetrics::default());
    let metrics_sink: Arc<dyn MetricsSink> = metrics.clone();
    let cache = build_cache(&origin, &clock, CacheConfig::default())
        .with_metrics(metrics_sink);

    cache.send(get("https://h/x", &[])).await.unwrap();
    cache.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(metrics.misses.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn composes_as_a_transport_layer() {
    let origin = MockTransport::new();
    origin.push_ok(200, &[("cache-control", "max-age=3600")], b"A");
    let clock = ManualClock::new();
    let inner = build_cache(&origin, &clock, CacheConfig::default());

    // A second cache stacked on the first, as any decorator would be.
    let outer_clock: Arc<dyn Clock> = clock.clone();
    let outer = HttpCache::new(
        Arc::new(inner),
        Arc::new(MokaStore::new(64)),
        CacheConfig::default(),
    )
    .with_clock(outer_clock);

    let response = outer.send(get("https://h/x", &[])).await.unwrap();
    assert_eq!(body_of(response).await, Bytes::from("A"));
    assert_eq!(origin.calls(), 1);
}
