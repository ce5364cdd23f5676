//! Optional Bearer-token authentication (spec §4.2 responsibility 2).

use axum::http::HeaderMap;

/// `true` if `config.bearer_token` is unset (auth disabled) or the
/// request's `Authorization: Bearer <token>` header matches it.
pub fn check_bearer(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let expected = match expected {
        Some(t) => t,
        None => return true,
    };

    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    provided == Some(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_token_configured_allows_all() {
        let headers = HeaderMap::new();
        assert!(check_bearer(&headers, None));
    }

    #[test]
    fn matching_token_is_allowed() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        assert!(check_bearer(&headers, Some("secret")));
    }

    #[test]
    fn mismatched_token_is_denied() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer wrong".parse().unwrap());
        assert!(!check_bearer(&headers, Some("secret")));
    }

    #[test]
    fn missing_header_is_denied_when_required() {
        let headers = HeaderMap::new();
        assert!(!check_bearer(&headers, Some("secret")));
    }
}
