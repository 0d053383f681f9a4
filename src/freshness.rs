//! Age and freshness arithmetic over cached records.
//!
//! Every function here is pure: the current instant comes from the injected
//! clock, never from the ambient system time, so the whole engine is
//! deterministic under test.

use std::time::{Duration, SystemTime};

use crate::directives::CacheControl;
use crate::metadata::CachedRecord;

/// Best-effort estimate of how long ago the origin produced the response.
///
/// `max(age_on_arrival, cached_at - origin_date)` plus resident time, with
/// each term floored at zero. Without an origin `Date` only the resident
/// time and the arrival `Age` apply.
#[must_use]
pub fn current_age(record: &CachedRecord, now: SystemTime) -> Duration {
    let apparent = record
        .origin_date
        .and_then(|date| record.cached_at.duration_since(date).ok())
        .unwrap_or_default();
    let corrected = record.age_on_arrival.unwrap_or_default().max(apparent);
    let resident =
        now.duration_since(record.cached_at).unwrap_or_default();
    corrected + resident
}

/// How long the response may be served without validation, when bounded.
///
/// The mode-selected `max-age` (resolved at store time) wins, then
/// `Expires`, then the `Last-Modified` heuristic scaled by
/// `heuristic_percent`. Responses with none of these have no engine-defined
/// lifetime.
#[must_use]
pub fn freshness_lifetime(
    record: &CachedRecord,
    heuristic_percent: f32,
) -> Option<Duration> {
    if let Some(max_age) = record.max_age {
        if max_age > Duration::ZERO {
            return Some(max_age);
        }
    }
    if let Some(expires) = record.expires {
        let base = record.origin_date.unwrap_or(record.cached_at);
        return Some(expires.duration_since(base).unwrap_or_default());
    }
    if let Some(last_modified) = record.last_modified {
        if let Ok(since_modified) =
            record.cached_at.duration_since(last_modified)
        {
            if since_modified > Duration::ZERO {
                let secs = since_modified.as_secs_f64()
                    * f64::from(heuristic_percent);
                return Some(Duration::from_secs(secs as u64));
            }
        }
    }
    None
}

/// Remaining freshness, saturating at zero.
#[must_use]
pub fn time_to_live(
    record: &CachedRecord,
    heuristic_percent: f32,
    now: SystemTime,
) -> Duration {
    freshness_lifetime(record, heuristic_percent)
        .unwrap_or_default()
        .saturating_sub(current_age(record, now))
}

/// Whether the record may be served without validation for this request.
///
/// Requires a defined lifetime, an age below it, and enough remaining
/// freshness to satisfy any request `min-fresh`.
#[must_use]
pub fn is_fresh(
    record: &CachedRecord,
    request: &CacheControl,
    heuristic_percent: f32,
    now: SystemTime,
) -> bool {
    let Some(lifetime) = freshness_lifetime(record, heuristic_percent) else {
        return false;
    };
    let age = current_age(record, now);
    if age >= lifetime {
        return false;
    }
    if let Some(min_fresh) = request.min_fresh {
        if lifetime - age < min_fresh {
            return false;
        }
    }
    true
}

/// Whether a stale record is inside its `stale-while-revalidate` window.
#[must_use]
pub fn within_swr(
    record: &CachedRecord,
    heuristic_percent: f32,
    now: SystemTime,
) -> bool {
    let Some(swr) = record.swr else { return false };
    let Some(lifetime) = freshness_lifetime(record, heuristic_percent) else {
        return false;
    };
    current_age(record, now).saturating_sub(lifetime) <= swr
}

/// Whether a stale record is inside its `stale-if-error` window.
///
/// `must-revalidate` in the stored response forbids serving stale entirely.
#[must_use]
pub fn within_sie(
    record: &CachedRecord,
    heuristic_percent: f32,
    now: SystemTime,
) -> bool {
    if record.must_revalidate {
        return false;
    }
    let Some(sie) = record.sie else { return false };
    let Some(lifetime) = freshness_lifetime(record, heuristic_percent) else {
        return false;
    };
    current_age(record, now).saturating_sub(lifetime) <= sie
}
