//! Cache key construction.
//!
//! Keys partition the metadata namespace into buckets that are likely to
//! match; the stored response's own `Vary` set is still validated against
//! the request at read time by the policy engine.

use std::sync::Arc;

use http::request::Parts;
use http::{HeaderMap, Method, Uri};

/// A closure that replaces the default key construction entirely.
///
/// By default the key is the request method and URI joined by a colon,
/// extended with the configured vary headers.
pub type KeyGenerator = Arc<dyn Fn(&Parts) -> String + Send + Sync>;

/// The primary, Vary-unaware key: `method:uri`.
#[must_use]
pub fn primary_key(method: &Method, uri: &Uri) -> String {
    format!("{method}:{uri}")
}

/// Builds the Vary-aware key for a request.
///
/// For each configured header name, in configured order, the normalized
/// request value is appended as `name:value`; missing headers contribute an
/// empty value. `method_override` substitutes the request method, used when
/// invalidating the GET entry after an unsafe method.
#[must_use]
pub fn vary_aware_key(
    parts: &Parts,
    vary_headers: &[String],
    generator: Option<&KeyGenerator>,
    method_override: Option<&str>,
) -> String {
    if let Some(generator) = generator {
        return generator(parts);
    }
    let mut key = format!(
        "{}:{}",
        method_override.unwrap_or_else(|| parts.method.as_str()),
        parts.uri
    );
    key.push_str("|vary");
    for name in vary_headers {
        let name = name.to_ascii_lowercase();
        key.push('|');
        key.push_str(&name);
        key.push(':');
        key.push_str(&normalized_header_value(&parts.headers, &name));
    }
    key
}

/// Normalizes a header's values for keying and vary comparison: each value
/// is trimmed and stripped of internal whitespace, multiple values joined
/// with a comma. A missing header normalizes to the empty string.
#[must_use]
pub fn normalized_header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(|value| value.split_whitespace().collect::<String>())
        .collect::<Vec<_>>()
        .join(",")
}
