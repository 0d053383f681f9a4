//! Typed views over raw caching headers.
//!
//! Parsing never fails: malformed directives, dates, and ages degrade to
//! absent values, matching how deployed caches treat junk input.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

use http::header::{AGE, CACHE_CONTROL, DATE, ETAG, EXPIRES, LAST_MODIFIED, PRAGMA, VARY};
use http::HeaderMap;

// Directive seconds overflowing a 63-bit signed count saturate.
const MAX_DIRECTIVE_SECS: u64 = i64::MAX as u64;

/// Parsed `Cache-Control` directives from a request or response.
///
/// Unrecognized directives are ignored; duplicate occurrences keep the
/// first parsed value.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheControl {
    /// `no-store`
    pub no_store: bool,
    /// `no-cache`
    pub no_cache: bool,
    /// `private`
    pub private: bool,
    /// `public`
    pub public: bool,
    /// `must-revalidate`
    pub must_revalidate: bool,
    /// `only-if-cached`
    pub only_if_cached: bool,
    /// `max-age` in seconds
    pub max_age: Option<Duration>,
    /// `min-fresh` in seconds
    pub min_fresh: Option<Duration>,
    /// `max-stale`; the outer option is presence, the inner the optional
    /// allowance (absent = any staleness accepted)
    pub max_stale: Option<Option<Duration>>,
    /// `s-maxage` in seconds
    pub shared_max_age: Option<Duration>,
    /// `stale-while-revalidate` in seconds (RFC 5861)
    pub stale_while_revalidate: Option<Duration>,
    /// `stale-if-error` in seconds (RFC 5861)
    pub stale_if_error: Option<Duration>,
}

impl CacheControl {
    /// Parses every `Cache-Control` header value in `headers`.
    #[must_use]
    pub fn parse(headers: &HeaderMap) -> Self {
        let mut cc = Self::default();
        for value in headers.get_all(CACHE_CONTROL) {
            let Ok(value) = value.to_str() else { continue };
            for part in value.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let mut kv = part.splitn(2, '=');
                let name = kv.next().unwrap_or_default().trim();
                let arg = kv.next().map(|v| v.trim().trim_matches('"'));
                cc.apply(&name.to_ascii_lowercase(), arg);
            }
        }
        cc
    }

    fn apply(&mut self, name: &str, arg: Option<&str>) {
        match name {
            "no-store" => self.no_store = true,
            "no-cache" => self.no_cache = true,
            "private" => self.private = true,
            "public" => self.public = true,
            "must-revalidate" => self.must_revalidate = true,
            "only-if-cached" => self.only_if_cached = true,
            "max-age" => set_first(&mut self.max_age, parse_secs(arg)),
            "min-fresh" => set_first(&mut self.min_fresh, parse_secs(arg)),
            "max-stale" => {
                if self.max_stale.is_none() {
                    self.max_stale = Some(parse_secs(arg));
                }
            }
            "s-maxage" => {
                set_first(&mut self.shared_max_age, parse_secs(arg));
            }
            "stale-while-revalidate" => {
                set_first(&mut self.stale_while_revalidate, parse_secs(arg));
            }
            "stale-if-error" => {
                set_first(&mut self.stale_if_error, parse_secs(arg));
            }
            _ => {}
        }
    }
}

fn set_first(slot: &mut Option<Duration>, value: Option<Duration>) {
    if slot.is_none() {
        *slot = value;
    }
}

fn parse_secs(arg: Option<&str>) -> Option<Duration> {
    let secs: u64 = arg?.parse().ok()?;
    Some(Duration::from_secs(secs.min(MAX_DIRECTIVE_SECS)))
}

/// The `Vary` header of a response, reduced to a set of header names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vary {
    /// Selecting header names, trimmed and case-folded.
    Headers(BTreeSet<String>),
    /// Any element was `*`; the response never matches a request.
    Wildcard,
}

impl Vary {
    /// Parses every `Vary` header value; absent headers yield an empty set.
    #[must_use]
    pub fn parse(headers: &HeaderMap) -> Self {
        let mut names = BTreeSet::new();
        for value in headers.get_all(VARY) {
            let Ok(value) = value.to_str() else { continue };
            for name in value.split(',') {
                let name = name.trim();
                if name == "*" {
                    return Self::Wildcard;
                }
                if !name.is_empty() {
                    names.insert(name.to_ascii_lowercase());
                }
            }
        }
        Self::Headers(names)
    }

    /// Whether the response declared no selecting headers at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Headers(names) if names.is_empty())
    }
}

/// Parses the `Age` header as whole seconds; unparseable values are absent.
#[must_use]
pub fn parse_age(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(AGE)?.to_str().ok()?;
    let secs: u64 = value.trim().parse().ok()?;
    Some(Duration::from_secs(secs.min(MAX_DIRECTIVE_SECS)))
}

/// Parses the `Date` header as an absolute instant.
#[must_use]
pub fn parse_date(headers: &HeaderMap) -> Option<SystemTime> {
    parse_http_date(headers, DATE.as_str())
}

/// Parses the `Expires` header as an absolute instant.
#[must_use]
pub fn parse_expires(headers: &HeaderMap) -> Option<SystemTime> {
    parse_http_date(headers, EXPIRES.as_str())
}

/// Parses the `Last-Modified` header as an absolute instant.
#[must_use]
pub fn parse_last_modified(headers: &HeaderMap) -> Option<SystemTime> {
    parse_http_date(headers, LAST_MODIFIED.as_str())
}

fn parse_http_date(headers: &HeaderMap, name: &str) -> Option<SystemTime> {
    let value = headers.get(name)?.to_str().ok()?;
    httpdate::parse_http_date(value.trim()).ok()
}

/// The `ETag` header, preserved verbatim including any weakness prefix.
#[must_use]
pub fn parse_etag(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(ETAG)?.to_str().ok()?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Whether the request carries `Pragma: no-cache` (HTTP/1.0 compat).
#[must_use]
pub fn has_pragma_no_cache(headers: &HeaderMap) -> bool {
    headers.get_all(PRAGMA).iter().any(|value| {
        value
            .to_str()
            .map(|v| v.to_ascii_lowercase().contains("no-cache"))
            .unwrap_or(false)
    })
}
