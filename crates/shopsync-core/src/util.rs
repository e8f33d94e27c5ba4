//! Small helpers shared by the transport, the listener and config.

const ERROR_EXCERPT_CHARS: usize = 180;

/// `Some` only for a value with non-whitespace content, trimmed.
pub fn non_blank(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Trim an API base URL and drop trailing slashes; `None` unless http(s).
pub fn normalize_base_url(value: &str) -> Option<String> {
    let value = value.trim().trim_end_matches('/');
    is_http_url(value).then(|| value.to_string())
}

/// Absolute URLs pass through; anything else is a path under `base`.
pub fn join_url(base: &str, url: &str) -> String {
    if is_http_url(url) {
        url.to_string()
    } else {
        format!("{base}/{}", url.trim_start_matches('/'))
    }
}

/// Single-line, length-capped excerpt of an error body, fit for an action's
/// stored `error` field.
pub fn error_excerpt(body: &str) -> String {
    body.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(ERROR_EXCERPT_CHARS)
        .collect()
}

/// Wall clock in Unix milliseconds; every stored timestamp uses this unit.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_blank_trims_and_rejects_whitespace() {
        assert_eq!(non_blank(None), None);
        assert_eq!(non_blank(Some(" \t ".to_string())), None);
        assert_eq!(non_blank(Some(" token ".to_string())), Some("token".to_string()));
    }

    #[test]
    fn base_url_requires_http_scheme() {
        assert_eq!(
            normalize_base_url(" https://shop.example.com// "),
            Some("https://shop.example.com".to_string())
        );
        assert_eq!(normalize_base_url("shop.example.com"), None);
        assert_eq!(normalize_base_url("ftp://shop.example.com"), None);
    }

    #[test]
    fn join_url_keeps_absolute_urls() {
        let base = "https://shop.example.com";
        assert_eq!(join_url(base, "/v1/sales"), "https://shop.example.com/v1/sales");
        assert_eq!(join_url(base, "v1/sales"), "https://shop.example.com/v1/sales");
        assert_eq!(
            join_url(base, "http://other.example.com/hook"),
            "http://other.example.com/hook"
        );
    }

    #[test]
    fn error_excerpt_collapses_and_caps_bodies() {
        assert_eq!(error_excerpt("  upstream\n  timed   out \n"), "upstream timed out");
        assert_eq!(error_excerpt(&"x".repeat(500)).len(), ERROR_EXCERPT_CHARS);
    }
}
