//! Network access for the pipeline.
//!
//! - [`transport`]: the raw HTTP collaborator ([`Transport`]) and its
//!   `reqwest` implementation
//! - [`bounded`]: [`BoundedFetcher`], which puts a hard wall-clock bound on
//!   every request and classifies failures
//! - [`rate_limit`]: [`RateLimiter`], minimum spacing between requests to
//!   the same host

pub mod bounded;
pub mod rate_limit;
pub mod transport;

pub use bounded::BoundedFetcher;
pub use rate_limit::RateLimiter;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

use url::Url;

/// Rate-limit key for a URL: its host, or the whole string if it has none.
pub fn host_key(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}
