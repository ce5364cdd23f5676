//! Body size cap and streaming rejection (spec §4.2 responsibilities 3, 4).

/// 1 MiB request body cap, applied via `tower_http::limit::RequestBodyLimitLayer`.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// The reply path is single-shot; adapters reject any request that asks
/// for a streamed response.
pub fn rejects_streaming(requested_stream: bool) -> bool {
    requested_stream
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_request_is_rejected() {
        assert!(rejects_streaming(true));
    }

    #[test]
    fn non_streaming_request_is_allowed() {
        assert!(!rejects_streaming(false));
    }
}
