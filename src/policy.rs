//! RFC 9111 decision procedures: per-request dispatch and storability.
//!
//! The policy engine is pure. It looks at the request, the cached record
//! (when one exists), the configuration, and the injected clock, and names
//! exactly one action for the pipeline to execute.

use std::time::{Duration, SystemTime};

use http::header::AUTHORIZATION;
use http::request::Parts;
use http::{HeaderMap, Method, StatusCode};

use crate::directives::{
    self, has_pragma_no_cache, CacheControl, Vary,
};
use crate::freshness::{self, is_fresh, within_swr};
use crate::keys::normalized_header_value;
use crate::metadata::CachedRecord;
use crate::{CacheConfig, CacheMode};

// rfc9111 s4.2.2 heuristically cacheable status codes
const CACHEABLE_STATUSES: &[u16] =
    &[200, 203, 204, 300, 301, 308, 404, 405, 410, 414, 501];

/// The single action the pipeline executes for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Forward to the origin untouched; never consult or update the cache.
    Bypass(Bypass),
    /// `only-if-cached` and the record is servable.
    OnlyIfCachedHit,
    /// `only-if-cached` with nothing servable: synthesize a 504.
    OnlyIfCachedMiss,
    /// No usable record: run the coalesced origin fetch.
    Miss,
    /// The record is fresh (or acceptably stale per the request).
    ServeFresh,
    /// Stale but inside the `stale-while-revalidate` window.
    ServeStaleRevalidate,
    /// Conditional revalidation against the origin.
    Revalidate,
}

/// Why a request bypasses the cache entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bypass {
    Method,
    NoStore,
    PragmaNoCache,
}

fn is_get_or_head(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

/// Runs the per-request decision procedure.
pub(crate) fn decide(
    parts: &Parts,
    record: Option<&CachedRecord>,
    config: &CacheConfig,
    now: SystemTime,
) -> Decision {
    if !is_get_or_head(&parts.method) {
        return Decision::Bypass(Bypass::Method);
    }
    if has_pragma_no_cache(&parts.headers) {
        return Decision::Bypass(Bypass::PragmaNoCache);
    }
    let request_cc = CacheControl::parse(&parts.headers);
    let pct = config.heuristic_freshness_percent;

    if request_cc.only_if_cached {
        return match record {
            Some(record)
                if vary_matches(record, &parts.headers)
                    && servable_without_origin(
                        record,
                        &request_cc,
                        pct,
                        now,
                    ) =>
            {
                Decision::OnlyIfCachedHit
            }
            _ => Decision::OnlyIfCachedMiss,
        };
    }
    if request_cc.no_store {
        return Decision::Bypass(Bypass::NoStore);
    }
    let force_revalidate = request_cc.no_cache
        || request_cc.max_age == Some(Duration::ZERO);

    let Some(record) = record else { return Decision::Miss };
    if !vary_matches(record, &parts.headers) {
        return Decision::Miss;
    }
    if force_revalidate || record.no_cache_in_response {
        return Decision::Revalidate;
    }
    if servable_without_origin(record, &request_cc, pct, now) {
        return Decision::ServeFresh;
    }
    if within_swr(record, pct, now) {
        return Decision::ServeStaleRevalidate;
    }
    Decision::Revalidate
}

/// Fresh, or stale but inside a request `max-stale` allowance.
fn servable_without_origin(
    record: &CachedRecord,
    request: &CacheControl,
    pct: f32,
    now: SystemTime,
) -> bool {
    if is_fresh(record, request, pct, now) {
        return true;
    }
    if record.must_revalidate {
        return false;
    }
    let Some(allowance) = request.max_stale else { return false };
    let Some(lifetime) = freshness::freshness_lifetime(record, pct) else {
        return false;
    };
    let staleness =
        freshness::current_age(record, now).saturating_sub(lifetime);
    allowance.map_or(true, |max| staleness <= max)
}

/// Validates the record's own `Vary` set against the request.
///
/// The key builder only partitions on the configured header set; a stored
/// response may select on headers outside it. A mismatch means the bucket
/// holds a response negotiated for someone else.
pub(crate) fn vary_matches(
    record: &CachedRecord,
    request_headers: &HeaderMap,
) -> bool {
    record.vary_header_names.iter().all(|name| {
        record.vary_value(name).unwrap_or_default()
            == normalized_header_value(request_headers, name)
    })
}

/// How a fresh-from-origin response may enter the cache.
#[derive(Debug)]
pub(crate) enum StoreEval {
    Storable(StorePlan),
    NotStorable {
        /// A `no-store` response also evicts any prior record at the key.
        invalidate: bool,
    },
}

/// Everything the storability evaluation decided that the record needs.
#[derive(Debug)]
pub(crate) struct StorePlan {
    /// Mode-selected freshness lifetime to persist as `max_age`.
    pub effective_max_age: Option<Duration>,
    pub no_cache_in_response: bool,
    pub must_revalidate: bool,
    pub swr: Option<Duration>,
    pub sie: Option<Duration>,
    pub vary_names: Vec<String>,
}

/// Applies the storability predicate to a fresh-from-origin response.
///
/// `body_len` is checked against the configured cap when already known;
/// streamed bodies are capped again during ingestion.
pub(crate) fn evaluate_storability(
    parts: &Parts,
    status: StatusCode,
    response_headers: &HeaderMap,
    body_len: Option<u64>,
    config: &CacheConfig,
) -> StoreEval {
    const NOT: StoreEval = StoreEval::NotStorable { invalidate: false };

    if !is_get_or_head(&parts.method) {
        return NOT;
    }
    let request_cc = CacheControl::parse(&parts.headers);
    if request_cc.no_store {
        return NOT;
    }
    let response_cc = CacheControl::parse(response_headers);
    if response_cc.no_store {
        return StoreEval::NotStorable { invalidate: true };
    }
    let vary_names = match Vary::parse(response_headers) {
        Vary::Wildcard => return NOT,
        Vary::Headers(names) => names.into_iter().collect::<Vec<_>>(),
    };
    if !CACHEABLE_STATUSES.contains(&status.as_u16()) {
        return NOT;
    }
    if let (Some(len), Some(cap)) =
        (body_len, config.max_cacheable_content_size)
    {
        if len > cap {
            return NOT;
        }
    }
    if let Some(allowed) = &config.cacheable_content_types {
        let matched = content_type(response_headers)
            .is_some_and(|ct| media_type_matches(allowed, ct));
        if !matched {
            return NOT;
        }
    }
    if parts.headers.contains_key(AUTHORIZATION) {
        let allowed = match config.mode {
            CacheMode::Shared => {
                response_cc.public || response_cc.shared_max_age.is_some()
            }
            CacheMode::Private => response_cc.public || response_cc.private,
        };
        if !allowed {
            return NOT;
        }
    }
    if response_cc.no_cache {
        let has_validator = directives::parse_etag(response_headers).is_some()
            || directives::parse_last_modified(response_headers).is_some();
        if !has_validator {
            return NOT;
        }
    }
    if config.mode == CacheMode::Shared && response_cc.private {
        return NOT;
    }

    let selected_max_age = match config.mode {
        CacheMode::Shared => {
            response_cc.shared_max_age.or(response_cc.max_age)
        }
        CacheMode::Private => response_cc.max_age,
    };
    let has_expires =
        directives::parse_expires(response_headers).is_some();
    let has_last_modified =
        directives::parse_last_modified(response_headers).is_some();

    let bounded = selected_max_age.is_some_and(|age| age > Duration::ZERO)
        || has_expires
        || has_last_modified
        || config.default_cache_duration.is_some();
    if !bounded {
        return NOT;
    }

    // A response with no freshness signal at all falls back to the
    // configured default lifetime.
    let effective_max_age = if selected_max_age.is_none()
        && !has_expires
        && !has_last_modified
    {
        config.default_cache_duration
    } else {
        selected_max_age
    };

    StoreEval::Storable(StorePlan {
        effective_max_age,
        no_cache_in_response: response_cc.no_cache,
        must_revalidate: response_cc.must_revalidate,
        swr: response_cc.stale_while_revalidate,
        sie: response_cc.stale_if_error,
        vary_names,
    })
}

/// Materializes the record for a storable response.
pub(crate) fn build_record(
    plan: StorePlan,
    request_headers: &HeaderMap,
    status: StatusCode,
    response_headers: &HeaderMap,
    content_digest: [u8; crate::metadata::DIGEST_LEN],
    content_length_stored: u64,
    is_compressed: bool,
    now: SystemTime,
) -> CachedRecord {
    let mut plain = Vec::new();
    let mut content = Vec::new();
    for (name, value) in response_headers {
        let Ok(value) = value.to_str() else { continue };
        let name = name.as_str().to_ascii_lowercase();
        let slot =
            if name.starts_with("content-") { &mut content } else { &mut plain };
        slot.push((name, value.to_string()));
    }
    let vary_header_values = plan
        .vary_names
        .iter()
        .map(|name| {
            (name.clone(), normalized_header_value(request_headers, name))
        })
        .collect();

    CachedRecord {
        status: status.as_u16(),
        response_headers: plain,
        content_headers: content,
        content_digest,
        content_length_stored,
        is_compressed,
        cached_at: now,
        origin_date: directives::parse_date(response_headers),
        expires: directives::parse_expires(response_headers),
        age_on_arrival: directives::parse_age(response_headers),
        max_age: plan.effective_max_age,
        etag: directives::parse_etag(response_headers),
        last_modified: directives::parse_last_modified(response_headers),
        vary_header_names: plan.vary_names,
        vary_header_values,
        swr: plan.swr,
        sie: plan.sie,
        must_revalidate: plan.must_revalidate,
        no_cache_in_response: plan.no_cache_in_response,
    }
}

/// Folds a `304 Not Modified` into an existing record.
///
/// Freshness fields present on the 304 replace the stored ones; the digest,
/// validators, and vary data stay untouched so the original content entry
/// remains valid.
pub(crate) fn refresh_from_304(
    record: &mut CachedRecord,
    response_headers: &HeaderMap,
    mode: CacheMode,
) {
    let response_cc = CacheControl::parse(response_headers);
    let selected = match mode {
        CacheMode::Shared => {
            response_cc.shared_max_age.or(response_cc.max_age)
        }
        CacheMode::Private => response_cc.max_age,
    };
    if selected.is_some() {
        record.max_age = selected;
    }
    if let Some(expires) = directives::parse_expires(response_headers) {
        record.expires = Some(expires);
    }
    if let Some(date) = directives::parse_date(response_headers) {
        record.origin_date = Some(date);
    }
    record.age_on_arrival = directives::parse_age(response_headers);
}

/// The media type of the response, parameters stripped.
pub(crate) fn content_type(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(http::header::CONTENT_TYPE)?.to_str().ok()?;
    Some(value.split(';').next().unwrap_or(value).trim())
}

/// Exact or `type/*` prefix match against a media-type allowlist.
pub(crate) fn media_type_matches(
    patterns: &[String],
    media_type: &str,
) -> bool {
    let media_type = media_type.trim().to_ascii_lowercase();
    patterns.iter().any(|pattern| {
        let pattern = pattern.trim().to_ascii_lowercase();
        match pattern.strip_suffix("/*") {
            Some(prefix) => {
                media_type.split('/').next() == Some(prefix)
            }
            None => media_type == pattern,
        }
    })
}
