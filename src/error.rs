//! Error taxonomy for fetching and per-source runs.
//!
//! Two layers exist:
//!
//! - [`FetchError`]: the failure half of a [`FetchOutcome`], returned by
//!   every network operation. Per-page and per-item fetch failures are
//!   logged and skipped by the source runner; they never travel further.
//! - [`SourceError`]: a fatal failure for one source's run (mandatory
//!   listing unreachable, unparseable listing, output not writable). These
//!   propagate to the pipeline driver, which logs them and moves on.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why a single outbound request did not produce a usable body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The request did not complete within its wall-clock bound.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection refused, DNS failure, TLS failure and the like.
    #[error("transport error: {0}")]
    Connection(String),

    /// The server answered with a non-2xx status.
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// The body could not be read as text or JSON of the expected shape.
    #[error("could not decode response body: {0}")]
    Decode(String),
}

impl FetchError {
    /// Short stable label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => "timeout",
            FetchError::Connection(_) => "transport",
            FetchError::HttpStatus(_) => "http_status",
            FetchError::Decode(_) => "decode",
        }
    }
}

/// Tagged result of every network operation.
pub type FetchOutcome<T> = Result<T, FetchError>;

/// A failure that ends one source's run.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("listing unavailable: {0}")]
    Fetch(#[from] FetchError),

    #[error("unexpected response shape: {0}")]
    Parse(String),

    #[error("cannot write {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid source configuration: {0}")]
    Config(String),
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Fetch(e) => e.kind(),
            SourceError::Parse(_) => "parse",
            SourceError::Storage { .. } => "storage",
            SourceError::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_kinds_are_distinct() {
        let kinds = [
            FetchError::Timeout(Duration::from_secs(1)).kind(),
            FetchError::Connection("refused".into()).kind(),
            FetchError::HttpStatus(503).kind(),
            FetchError::Decode("bad utf-8".into()).kind(),
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_source_error_wraps_fetch_kind() {
        let err: SourceError = FetchError::HttpStatus(404).into();
        assert_eq!(err.kind(), "http_status");
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn test_storage_error_mentions_path() {
        let err = SourceError::Storage {
            path: PathBuf::from("/nope/out.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.kind(), "storage");
        assert!(err.to_string().contains("/nope/out.json"));
    }
}
