//! HTTP retry helper for transient errors.
//!
//! The occurrence API is unauthenticated and occasionally rate-limits or
//! times out under load. [`send_json`] wraps every request with a bounded
//! exponential-backoff retry for transient failures only; a request that
//! ultimately fails is fatal to the whole fetch — retry never changes the
//! pagination termination semantics, it only papers over flaky transport.

use std::time::Duration;

use crate::FetchError;

/// Maximum number of retry attempts for transient HTTP errors.
///
/// With exponential backoff (2s, 4s, 8s) the total wait before giving up
/// is 14 seconds.
const MAX_RETRIES: u32 = 3;

/// Sends an HTTP request and parses the response body as JSON.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`], since builders are consumed by
/// `.send()`.
///
/// Retries connection errors, timeouts, HTTP 429, and HTTP 5xx. Other 4xx
/// statuses are permanent and fail immediately.
///
/// # Errors
///
/// Returns [`FetchError`] if the request still fails after all retries or
/// the body cannot be parsed as JSON.
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(build_request: F) -> Result<serde_json::Value, FetchError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_error: Option<FetchError> = None;

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            let delay = Duration::from_secs(1u64 << attempt); // 2s, 4s, 8s
            log::warn!("  retry {attempt}/{MAX_RETRIES} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        let response = match build_request().send().await {
            Ok(response) => response,
            Err(e) => {
                if is_transient(&e) && attempt < MAX_RETRIES {
                    log::warn!("  transient error: {e}");
                    last_error = Some(FetchError::Http(e));
                    continue;
                }
                return Err(FetchError::Http(e));
            }
        };

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            if attempt < MAX_RETRIES {
                log::warn!("  HTTP {status}, retrying");
                last_error = Some(FetchError::Api {
                    message: format!("HTTP {status}"),
                });
                continue;
            }
            return Err(FetchError::Api {
                message: format!("HTTP {status} after {MAX_RETRIES} retries"),
            });
        }

        if status.is_client_error() {
            return Err(FetchError::Api {
                message: format!("HTTP {status}"),
            });
        }

        let value = response.json::<serde_json::Value>().await?;
        return Ok(value);
    }

    Err(last_error.unwrap_or_else(|| FetchError::Api {
        message: "request failed after all retries".to_owned(),
    }))
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}
