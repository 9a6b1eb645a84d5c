//! Strategies for deriving a pool key from request metadata.
//!
//! Every extractor is stable and deterministic: the same `(headers,
//! path)` pair always yields the same key, so the pool's `DashMap`
//! lookup lands on the same limiter for the same logical caller.

use crate::headers::HeaderMap;

const DEFAULT_FALLBACK: &str = "unknown";
const DEFAULT_USER_FALLBACK: &str = "anonymous";
const DEFAULT_SEPARATOR: &str = ":";

/// Request metadata an extractor reads from. `path` mirrors the
/// teacher's own use of the request URI's path component for routing.
#[derive(Debug, Clone, Copy)]
pub struct RequestMeta<'a> {
    pub headers: HeaderMap<'a>,
    pub path: &'a str,
}

/// A function from request metadata to a pool key.
///
/// Built-ins are data-carrying variants rather than `dyn Fn` trait
/// objects so that [`Custom`](KeyExtractor::Custom) is the only variant
/// that pays for indirection; the rest extract directly.
pub enum KeyExtractor {
    /// Always `"__global__"` — every request shares one limiter.
    Global,
    /// `x-forwarded-for` (first comma-separated element, trimmed),
    /// falling back to `x-real-ip`, then to a configured literal.
    Ip {
        forwarded_for_header: String,
        real_ip_header: String,
        fallback_key: String,
    },
    /// A configured header (default `x-user-id`), falling back to a
    /// configured literal.
    User { header: String, fallback_key: String },
    /// The request's URI path, verbatim.
    Route,
    /// Delegates to a caller-supplied function.
    Custom(Box<dyn Fn(RequestMeta<'_>) -> String + Send + Sync>),
    /// Joins ≥ 2 sub-extractors' outputs with a separator, in order.
    Composite {
        extractors: Vec<KeyExtractor>,
        separator: String,
    },
}

impl KeyExtractor {
    pub fn ip() -> Self {
        KeyExtractor::Ip {
            forwarded_for_header: "x-forwarded-for".to_string(),
            real_ip_header: "x-real-ip".to_string(),
            fallback_key: DEFAULT_FALLBACK.to_string(),
        }
    }

    pub fn user() -> Self {
        KeyExtractor::User {
            header: "x-user-id".to_string(),
            fallback_key: DEFAULT_USER_FALLBACK.to_string(),
        }
    }

    /// Build a composite extractor. Panics if fewer than two
    /// sub-extractors are given — a single-extractor composite has no
    /// meaning distinct from using that extractor directly.
    pub fn composite(extractors: Vec<KeyExtractor>) -> Self {
        assert!(
            extractors.len() >= 2,
            "composite key extractor requires at least 2 sub-extractors"
        );
        KeyExtractor::Composite {
            extractors,
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }

    pub fn composite_with_separator(extractors: Vec<KeyExtractor>, separator: impl Into<String>) -> Self {
        assert!(
            extractors.len() >= 2,
            "composite key extractor requires at least 2 sub-extractors"
        );
        KeyExtractor::Composite {
            extractors,
            separator: separator.into(),
        }
    }

    pub fn extract(&self, meta: RequestMeta<'_>) -> String {
        match self {
            KeyExtractor::Global => "__global__".to_string(),
            KeyExtractor::Ip {
                forwarded_for_header,
                real_ip_header,
                fallback_key,
            } => meta
                .headers
                .get(forwarded_for_header)
                .and_then(first_comma_element)
                .or_else(|| meta.headers.get(real_ip_header).map(str::trim).filter(|s| !s.is_empty()))
                .map(str::to_string)
                .unwrap_or_else(|| fallback_key.clone()),
            KeyExtractor::User { header, fallback_key } => meta
                .headers
                .get(header)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| fallback_key.clone()),
            KeyExtractor::Route => meta.path.to_string(),
            KeyExtractor::Custom(f) => f(meta),
            KeyExtractor::Composite { extractors, separator } => extractors
                .iter()
                .map(|e| e.extract(meta))
                .collect::<Vec<_>>()
                .join(separator),
        }
    }
}

fn first_comma_element(raw: &str) -> Option<&str> {
    let first = raw.split(',').next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta<'a>(entries: &'a [(&'a str, &'a str)], path: &'a str) -> RequestMeta<'a> {
        RequestMeta {
            headers: HeaderMap::new(entries),
            path,
        }
    }

    #[test]
    fn global_is_constant_regardless_of_input() {
        let e = KeyExtractor::Global;
        assert_eq!(e.extract(meta(&[], "/a")), "__global__");
        assert_eq!(e.extract(meta(&[("x-user-id", "u1")], "/b")), "__global__");
    }

    #[test]
    fn ip_prefers_forwarded_for_first_element_then_real_ip_then_fallback() {
        let e = KeyExtractor::ip();
        assert_eq!(
            e.extract(meta(&[("x-forwarded-for", " 10.0.0.1 , 10.0.0.2")], "/")),
            "10.0.0.1"
        );
        assert_eq!(e.extract(meta(&[("x-real-ip", "10.0.0.9")], "/")), "10.0.0.9");
        assert_eq!(e.extract(meta(&[], "/")), "unknown");
    }

    #[test]
    fn ip_header_lookup_is_case_insensitive() {
        let e = KeyExtractor::ip();
        assert_eq!(e.extract(meta(&[("X-Forwarded-For", "1.2.3.4")], "/")), "1.2.3.4");
    }

    #[test]
    fn user_falls_back_to_anonymous() {
        let e = KeyExtractor::user();
        assert_eq!(e.extract(meta(&[("x-user-id", "bob")], "/")), "bob");
        assert_eq!(e.extract(meta(&[], "/")), "anonymous");
    }

    #[test]
    fn route_returns_uri_path() {
        assert_eq!(KeyExtractor::Route.extract(meta(&[], "/v1/widgets")), "/v1/widgets");
    }

    #[test]
    fn custom_delegates_to_the_supplied_function() {
        let e = KeyExtractor::Custom(Box::new(|m: RequestMeta<'_>| format!("custom:{}", m.path)));
        assert_eq!(e.extract(meta(&[], "/x")), "custom:/x");
    }

    #[test]
    fn composite_joins_in_order_with_the_default_separator() {
        let e = KeyExtractor::composite(vec![KeyExtractor::user(), KeyExtractor::Route]);
        assert_eq!(
            e.extract(meta(&[("x-user-id", "bob")], "/v1/widgets")),
            "bob:/v1/widgets"
        );
    }

    #[test]
    fn composite_honors_a_custom_separator() {
        let e = KeyExtractor::composite_with_separator(vec![KeyExtractor::Route, KeyExtractor::user()], "|");
        assert_eq!(e.extract(meta(&[], "/r")), "/r|anonymous");
    }

    #[test]
    #[should_panic(expected = "at least 2")]
    fn composite_rejects_fewer_than_two_sub_extractors() {
        KeyExtractor::composite(vec![KeyExtractor::Global]);
    }

    #[test]
    fn same_input_always_yields_the_same_key() {
        let e = KeyExtractor::ip();
        let m = meta(&[("x-forwarded-for", "1.1.1.1")], "/");
        assert_eq!(e.extract(m), e.extract(m));
    }
}
