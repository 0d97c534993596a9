//! Timeout-bounded fetching.
//!
//! [`BoundedFetcher`] wraps each [`Transport`] call in `tokio::time::timeout`.
//! When the deadline passes the in-flight future is dropped, which releases
//! its connection, and the caller gets [`FetchError::Timeout`]. Non-2xx
//! statuses and undecodable bodies become the other [`FetchError`] variants,
//! so every call ends in a [`FetchOutcome`] and never blocks past its bound.

use super::transport::{HttpRequest, Transport};
use crate::error::{FetchError, FetchOutcome};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

#[derive(Debug)]
pub struct BoundedFetcher<T> {
    transport: T,
}

impl<T: Transport> BoundedFetcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `request`, returning its body if it completes with a 2xx status
    /// within `limit`.
    #[instrument(level = "debug", skip_all, fields(url = %request.url, ?limit))]
    pub async fn send(&self, request: &HttpRequest, limit: Duration) -> FetchOutcome<Vec<u8>> {
        let response = match timeout(limit, self.transport.send(request)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(url = %request.url, ?limit, "Request abandoned after timeout");
                return Err(FetchError::Timeout(limit));
            }
        };

        if !(200..300).contains(&response.status) {
            return Err(FetchError::HttpStatus(response.status));
        }
        debug!(bytes = response.body.len(), "Fetched");
        Ok(response.body)
    }

    /// GET `url` and decode the body as UTF-8 text.
    pub async fn fetch(&self, url: &str, limit: Duration) -> FetchOutcome<String> {
        let body = self.send(&HttpRequest::get(url), limit).await?;
        decode_text(body)
    }

    /// Send `request` and decode the body as JSON.
    pub async fn fetch_json<D: DeserializeOwned>(
        &self,
        request: &HttpRequest,
        limit: Duration,
    ) -> FetchOutcome<D> {
        let body = self.send(request, limit).await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// Interpret a response body as UTF-8 text.
pub fn decode_text(body: Vec<u8>) -> FetchOutcome<String> {
    String::from_utf8(body).map_err(|e| FetchError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use serde_json::Value;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_hanging_request_times_out_within_bound() {
        for secs in [0u64, 1, 5, 60] {
            let fetcher = BoundedFetcher::new(ScriptedTransport::new().hang("https://8kun.top/pnd/index.html"));
            let limit = Duration::from_secs(secs);
            let start = Instant::now();
            let outcome = fetcher.fetch("https://8kun.top/pnd/index.html", limit).await;
            assert_eq!(outcome, Err(FetchError::Timeout(limit)));
            assert!(start.elapsed() <= limit + Duration::from_millis(10));
        }
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let fetcher = BoundedFetcher::new(ScriptedTransport::new().ok("https://x.test/a", "hello"));
        let body = fetcher.fetch("https://x.test/a", Duration::from_secs(5)).await;
        assert_eq!(body.as_deref(), Ok("hello"));
    }

    #[tokio::test]
    async fn test_non_2xx_is_http_status_failure() {
        let fetcher =
            BoundedFetcher::new(ScriptedTransport::new().status("https://x.test/a", 503, ""));
        let outcome = fetcher.fetch("https://x.test/a", Duration::from_secs(5)).await;
        assert_eq!(outcome, Err(FetchError::HttpStatus(503)));
    }

    #[tokio::test]
    async fn test_connection_error_is_passed_through() {
        let fetcher =
            BoundedFetcher::new(ScriptedTransport::new().fail("https://x.test/a", "refused"));
        let outcome = fetcher.fetch("https://x.test/a", Duration::from_secs(5)).await;
        assert!(matches!(outcome, Err(FetchError::Connection(_))));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_decode_failure() {
        let transport = ScriptedTransport::new().bytes("https://x.test/a", 200, vec![0xff, 0xfe]);
        let fetcher = BoundedFetcher::new(transport);
        let outcome = fetcher.fetch("https://x.test/a", Duration::from_secs(5)).await;
        assert!(matches!(outcome, Err(FetchError::Decode(_))));
    }

    #[tokio::test]
    async fn test_fetch_json_rejects_malformed_body() {
        let fetcher = BoundedFetcher::new(ScriptedTransport::new().ok("https://x.test/j", "{\"a\":"));
        let outcome: FetchOutcome<Value> = fetcher
            .fetch_json(&HttpRequest::get("https://x.test/j"), Duration::from_secs(5))
            .await;
        assert!(matches!(outcome, Err(FetchError::Decode(_))));
    }
}
