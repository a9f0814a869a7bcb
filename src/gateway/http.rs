//! HTTP helpers shared by the provider adapters.

use std::time::Duration;

use reqwest::header::HeaderMap;

use super::error::ProviderError;
use super::types::ChatRequest;

/// Maximum allowed response content length (1MB).
pub(crate) const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed prompt characters.
pub(crate) const MAX_INPUT_CHARS: usize = 500_000;

/// Default HTTP timeout for a single attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Extract request ID from response headers.
pub(crate) fn extract_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn extract_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Read the body while enforcing `MAX_RESPONSE_LEN`.
pub(crate) async fn read_limited_body(
    provider: &'static str,
    response: &mut reqwest::Response,
) -> Result<String, ProviderError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let new_len = bytes.len() + chunk.len();
        if new_len > MAX_RESPONSE_LEN {
            return Err(ProviderError::provider(
                provider,
                format!("Response too large: {new_len} bytes"),
                false,
            ));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

pub(crate) fn check_input_size(req: &ChatRequest) -> Result<(), ProviderError> {
    let total_chars = req.text_chars();
    if total_chars > MAX_INPUT_CHARS {
        return Err(ProviderError::invalid_request(format!(
            "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
        )));
    }
    Ok(())
}
