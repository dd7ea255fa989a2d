//! Mapping of HTTP outcomes onto connector error categories.

use pagesync_types::error::{ConnectorError, ErrorScope};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;

/// Longest response body excerpt carried in an error message.
const BODY_EXCERPT_CHARS: usize = 200;

/// Classify a non-success response.
#[must_use]
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> ConnectorError {
    let excerpt = excerpt(body);
    match status.as_u16() {
        429 => ConnectorError::rate_limit(
            "RATE_LIMITED",
            format!("upstream returned 429 Too Many Requests{excerpt}"),
            retry_after_ms(headers),
        ),
        401 => ConnectorError::auth("UNAUTHORIZED", format!("upstream rejected credentials (401){excerpt}")),
        403 => ConnectorError::auth("FORBIDDEN", format!("upstream denied access (403){excerpt}")),
        404 => ConnectorError::config("ENDPOINT_NOT_FOUND", format!("upstream endpoint not found (404){excerpt}"))
            .with_scope(ErrorScope::Resource),
        408 => ConnectorError::transient_network("REQUEST_TIMEOUT", format!("upstream timed out (408){excerpt}")),
        code @ 500..=599 => ConnectorError::upstream_unavailable(
            format!("HTTP_{code}"),
            format!("upstream returned {status}{excerpt}"),
        ),
        code => ConnectorError::config(format!("HTTP_{code}"), format!("upstream returned {status}{excerpt}"))
            .with_scope(ErrorScope::Resource),
    }
}

/// Classify a failure to obtain any response.
#[must_use]
pub fn classify_transport(err: &reqwest::Error) -> ConnectorError {
    if err.is_timeout() {
        ConnectorError::transient_network("TIMEOUT", format!("request timed out: {err}"))
    } else if err.is_connect() {
        ConnectorError::transient_network("CONNECT_FAILED", format!("connection failed: {err}"))
    } else if err.is_decode() {
        ConnectorError::schema("INVALID_RESPONSE_BODY", format!("response body unreadable: {err}"))
    } else if err.is_builder() {
        ConnectorError::config("INVALID_REQUEST", format!("request could not be built: {err}"))
    } else {
        ConnectorError::transient_network("REQUEST_FAILED", format!("request failed: {err}"))
    }
}

/// Wait hint in milliseconds: `Retry-After` (delta seconds), falling back
/// to `x-ratelimit-reset`.
#[must_use]
pub fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    ["retry-after", "x-ratelimit-reset"].iter().find_map(|name| {
        let value = headers.get(*name)?.to_str().ok()?.trim();
        let secs: f64 = value.parse().ok()?;
        (secs.is_finite() && secs >= 0.0).then(|| (secs * 1000.0).ceil() as u64)
    })
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return String::new();
    }
    let mut cut: String = body.chars().take(BODY_EXCERPT_CHARS).collect();
    if cut.len() < body.len() {
        cut.push_str("...");
    }
    format!(": {cut}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagesync_types::error::ErrorCategory;
    use reqwest::header::HeaderValue;
    use rstest::rstest;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[rstest]
    #[case(429, ErrorCategory::RateLimit, true)]
    #[case(401, ErrorCategory::Auth, false)]
    #[case(403, ErrorCategory::Auth, false)]
    #[case(404, ErrorCategory::Config, false)]
    #[case(408, ErrorCategory::TransientNetwork, true)]
    #[case(500, ErrorCategory::UpstreamUnavailable, true)]
    #[case(503, ErrorCategory::UpstreamUnavailable, true)]
    #[case(400, ErrorCategory::Config, false)]
    fn status_classification(#[case] code: u16, #[case] category: ErrorCategory, #[case] retryable: bool) {
        let err = classify_status(StatusCode::from_u16(code).unwrap(), &HeaderMap::new(), "");
        assert_eq!(err.category, category);
        assert_eq!(err.retryable, retryable);
    }

    #[test]
    fn auth_aborts_request_but_other_client_errors_stay_in_resource() {
        let empty = HeaderMap::new();
        assert!(classify_status(StatusCode::UNAUTHORIZED, &empty, "").is_request_fatal());
        assert!(!classify_status(StatusCode::NOT_FOUND, &empty, "").is_request_fatal());
        assert!(!classify_status(StatusCode::BAD_REQUEST, &empty, "").is_request_fatal());
    }

    #[test]
    fn retry_after_seconds_become_milliseconds() {
        let err = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            &headers(&[("retry-after", "5")]),
            "",
        );
        assert_eq!(err.retry_after_ms, Some(5_000));
    }

    #[test]
    fn ratelimit_reset_is_a_fallback() {
        assert_eq!(retry_after_ms(&headers(&[("x-ratelimit-reset", "1.5")])), Some(1_500));
        assert_eq!(
            retry_after_ms(&headers(&[("retry-after", "2"), ("x-ratelimit-reset", "30")])),
            Some(2_000)
        );
        assert_eq!(retry_after_ms(&headers(&[("retry-after", "soon")])), None);
        assert_eq!(retry_after_ms(&HeaderMap::new()), None);
    }

    #[test]
    fn body_excerpt_is_bounded() {
        let body = "x".repeat(1_000);
        let err = classify_status(StatusCode::BAD_GATEWAY, &HeaderMap::new(), &body);
        assert!(err.message.ends_with("..."));
        assert!(err.message.len() < 300);
    }
}
