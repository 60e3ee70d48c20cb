use reqwest::{Response, StatusCode, header};
use std::time::{Duration, SystemTime};

/// Parse a Retry-After header value: either delta-seconds or an HTTP-date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    if let Ok(date) = httpdate::parse_http_date(value) {
        return date.duration_since(SystemTime::now()).ok();
    }
    None
}

/// For a 429 response, the duration to wait before the next attempt,
/// falling back to `default_duration` when the header is missing or
/// unparsable.
pub fn retry_after_from_response(
    response: &Response,
    default_duration: Duration,
) -> Option<Duration> {
    if response.status() == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after)
            .unwrap_or(default_duration);
        return Some(retry_after);
    }
    None
}
