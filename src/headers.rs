//! Case-insensitive header lookup plus the response-header parser that
//! turns a caller's raw header map into typed rate-limit metadata.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A borrowed, case-insensitive view over a caller's header map.
///
/// Key extractors and [`parse_headers`] both need ASCII-case-insensitive
/// `&str -> &str` lookup; this is the one place that comparison lives.
#[derive(Debug, Clone, Copy)]
pub struct HeaderMap<'a> {
    entries: &'a [(&'a str, &'a str)],
}

impl<'a> HeaderMap<'a> {
    pub fn new(entries: &'a [(&'a str, &'a str)]) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }
}

/// Build the `(&str, &str)` pairs [`HeaderMap::new`] expects, for
/// callers that store headers as `HashMap<String, String>`.
pub fn owned_pairs(map: &HashMap<String, String>) -> Vec<(&str, &str)> {
    map.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

/// Parsed response-side rate-limit headers.
///
/// Every field is `None` when its source header is absent or fails to
/// parse under the rules below; a malformed header never panics or
/// raises an error, it is simply treated as missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedHeaders {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset: Option<Duration>,
    pub retry_after: Option<Duration>,
    /// Verbatim `X-RateLimit-Policy` value, any format.
    pub policy: Option<String>,
}

impl ParsedHeaders {
    /// `true` if any of the four fields parsed successfully.
    pub fn any_present(&self) -> bool {
        self.limit.is_some() || self.remaining.is_some() || self.reset.is_some() || self.retry_after.is_some()
    }

    /// `true` when `remaining` parsed and is exactly zero.
    pub fn exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Parse the five standard rate-limit response headers out of `headers`
/// relative to the current wall-clock instant.
pub fn parse_headers(headers: HeaderMap<'_>) -> ParsedHeaders {
    let now = SystemTime::now();
    parse_headers_at(headers, now)
}

/// As [`parse_headers`], but with an explicit `now` for deterministic
/// testing of the `reset` field's epoch-relative conversion.
pub fn parse_headers_at(headers: HeaderMap<'_>, now: SystemTime) -> ParsedHeaders {
    ParsedHeaders {
        limit: headers.get("x-ratelimit-limit").and_then(parse_u64),
        remaining: headers.get("x-ratelimit-remaining").and_then(parse_u64),
        reset: headers.get("x-ratelimit-reset").and_then(|v| parse_reset(v, now)),
        retry_after: headers.get("retry-after").and_then(parse_retry_after),
        policy: headers.get("x-ratelimit-policy").map(str::to_string),
    }
}

fn parse_u64(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok()
}

/// Non-negative integer seconds only; HTTP-date form is out of scope
/// and yields `None`.
fn parse_retry_after(raw: &str) -> Option<Duration> {
    let secs: i64 = raw.trim().parse().ok()?;
    if secs < 0 {
        return None;
    }
    Some(Duration::from_secs(secs as u64))
}

/// `raw` is a Unix epoch-seconds timestamp. Future relative to `now`
/// yields `epoch - now`; past or equal yields zero.
fn parse_reset(raw: &str, now: SystemTime) -> Option<Duration> {
    let epoch_secs: i64 = raw.trim().parse().ok()?;
    if epoch_secs < 0 {
        return None;
    }
    let target = UNIX_EPOCH + Duration::from_secs(epoch_secs as u64);
    Some(target.duration_since(now).unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_five_fields_from_canonical_headers() {
        let entries = [
            ("X-RateLimit-Limit", "100"),
            ("X-RateLimit-Remaining", "37"),
            ("X-RateLimit-Reset", "1700000100"),
            ("X-RateLimit-Policy", "100;w=60"),
            ("Retry-After", "5"),
        ];
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let parsed = parse_headers_at(HeaderMap::new(&entries), now);
        assert_eq!(parsed.limit, Some(100));
        assert_eq!(parsed.remaining, Some(37));
        assert_eq!(parsed.reset, Some(Duration::from_secs(100)));
        assert_eq!(parsed.retry_after, Some(Duration::from_secs(5)));
        assert_eq!(parsed.policy.as_deref(), Some("100;w=60"));
        assert!(parsed.any_present());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let entries = [("x-ratelimit-limit", "10")];
        let parsed = parse_headers(HeaderMap::new(&entries));
        assert_eq!(parsed.limit, Some(10));
    }

    #[test]
    fn reset_in_the_past_is_zero_not_negative() {
        let entries = [("X-RateLimit-Reset", "1699999900")];
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let parsed = parse_headers_at(HeaderMap::new(&entries), now);
        assert_eq!(parsed.reset, Some(Duration::ZERO));
    }

    #[test]
    fn negative_retry_after_is_none() {
        let entries = [("Retry-After", "-1")];
        let parsed = parse_headers(HeaderMap::new(&entries));
        assert_eq!(parsed.retry_after, None);
    }

    #[test]
    fn unparseable_values_are_none_not_errors() {
        let entries = [
            ("X-RateLimit-Limit", "not-a-number"),
            ("X-RateLimit-Remaining", ""),
        ];
        let parsed = parse_headers(HeaderMap::new(&entries));
        assert_eq!(parsed.limit, None);
        assert_eq!(parsed.remaining, None);
        assert!(!parsed.any_present());
    }

    #[test]
    fn exhausted_reports_true_only_when_remaining_is_exactly_zero() {
        let entries = [("X-RateLimit-Remaining", "0")];
        let parsed = parse_headers(HeaderMap::new(&entries));
        assert!(parsed.exhausted());

        let entries = [("X-RateLimit-Remaining", "1")];
        let parsed = parse_headers(HeaderMap::new(&entries));
        assert!(!parsed.exhausted());
    }

    #[test]
    fn http_date_retry_after_is_out_of_scope_and_yields_none() {
        let entries = [("Retry-After", "Wed, 21 Oct 2026 07:28:00 GMT")];
        let parsed = parse_headers(HeaderMap::new(&entries));
        assert_eq!(parsed.retry_after, None);
    }

    #[test]
    fn missing_retry_after_yields_none() {
        let entries: [(&str, &str); 0] = [];
        let parsed = parse_headers(HeaderMap::new(&entries));
        assert_eq!(parsed.retry_after, None);
        assert!(!parsed.any_present());
    }
}
