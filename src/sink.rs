//! Durable output of harvested payloads.
//!
//! All paths handed to [`Sink`] are relative to its root. Parent directories
//! are created on demand (`create_dir_all`, so an existing directory is fine).
//!
//! # Modes
//!
//! - [`OutputMode::Snapshot`]: the whole file is replaced. The payload goes to
//!   a `.partial` sibling first and is renamed into place, so an interrupted
//!   run never leaves a truncated snapshot behind.
//! - [`OutputMode::Append`]: the payload is appended as one line, so one file
//!   accumulates documents across runs (JSON Lines for JSON payloads).

use crate::error::SourceError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Append,
    Snapshot,
}

/// Timestamps used to name the files of one run, fixed when the run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStamp {
    /// `YYYY-MM-DD_HH-MM-SS`
    pub datetime: String,
    /// `YYYY-MM`
    pub month: String,
}

impl RunStamp {
    pub fn at(time: DateTime<Local>) -> Self {
        Self {
            datetime: time.format("%Y-%m-%d_%H-%M-%S").to_string(),
            month: time.format("%Y-%m").to_string(),
        }
    }

    pub fn now() -> Self {
        Self::at(Local::now())
    }
}

#[derive(Debug, Clone)]
pub struct Sink {
    root: PathBuf,
}

impl Sink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute location of `relative` under the root.
    ///
    /// No I/O happens here; the path may not exist yet.
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Make sure the root exists and accepts writes by creating and removing
    /// a marker file.
    #[instrument(level = "info", skip_all, fields(root = %self.root.display()))]
    pub async fn ensure_writable(&self) -> Result<(), SourceError> {
        let storage = |source| SourceError::Storage {
            path: self.root.clone(),
            source,
        };
        fs::create_dir_all(&self.root).await.map_err(storage)?;
        let marker = self.root.join(".__harvest_write_check__");
        fs::write(&marker, b"").await.map_err(storage)?;
        let _ = fs::remove_file(&marker).await;
        info!("Output directory is writable");
        Ok(())
    }

    /// Write `payload` to `relative` under the root using `mode`.
    ///
    /// Returns the absolute path written.
    #[instrument(level = "debug", skip_all, fields(path = %relative.display(), ?mode))]
    pub async fn write(
        &self,
        relative: &Path,
        payload: &[u8],
        mode: OutputMode,
    ) -> Result<PathBuf, SourceError> {
        let path = self.resolve(relative);
        let storage = |source| SourceError::Storage {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(storage)?;
        }

        match mode {
            OutputMode::Snapshot => {
                let mut partial = path.clone().into_os_string();
                partial.push(".partial");
                let partial = PathBuf::from(partial);
                let written = match fs::write(&partial, payload).await {
                    Ok(()) => fs::rename(&partial, &path).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    match fs::remove_file(&partial).await {
                        Ok(()) => debug!(partial = %partial.display(), "Removed partial file"),
                        Err(cleanup) if cleanup.kind() == ErrorKind::NotFound => {}
                        Err(cleanup) => {
                            warn!(partial = %partial.display(), error = %cleanup, "Could not remove partial file")
                        }
                    }
                    return Err(storage(e));
                }
            }
            OutputMode::Append => {
                let mut file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
                    .map_err(storage)?;
                let mut line = payload.to_vec();
                if !line.ends_with(b"\n") {
                    line.push(b'\n');
                }
                file.write_all(&line).await.map_err(storage)?;
                file.flush().await.map_err(storage)?;
            }
        }

        debug!(bytes = payload.len(), "Wrote payload");
        Ok(path)
    }

    /// Serialize `value` as compact JSON and write it.
    pub async fn write_json<S: Serialize + ?Sized>(
        &self,
        relative: &Path,
        value: &S,
        mode: OutputMode,
    ) -> Result<PathBuf, SourceError> {
        let json = serde_json::to_vec(value)
            .map_err(|e| SourceError::Parse(format!("cannot serialize output: {e}")))?;
        self.write(relative, &json, mode).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_run_stamp_format() {
        let time = Local.with_ymd_and_hms(2020, 5, 26, 9, 5, 3).unwrap();
        let stamp = RunStamp::at(time);
        assert_eq!(stamp.datetime, "2020-05-26_09-05-03");
        assert_eq!(stamp.month, "2020-05");
    }

    #[tokio::test]
    async fn test_snapshot_creates_nested_dirs_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Sink::new(dir.path());
        let rel = Path::new("4chan-data/2020-05/snap.json");

        sink.write(rel, b"[1]", OutputMode::Snapshot).await.unwrap();
        let path = sink.write(rel, b"[2]", OutputMode::Snapshot).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[2]");
        assert!(!dir.path().join("4chan-data/2020-05/snap.json.partial").exists());
    }

    #[tokio::test]
    async fn test_append_accumulates_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Sink::new(dir.path());
        let rel = Path::new("data/worldnews.json");

        sink.write_json(rel, &json!({"id": "a"}), OutputMode::Append).await.unwrap();
        let path = sink.write_json(rel, &json!({"id": "b"}), OutputMode::Append).await.unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines, vec![r#"{"id":"a"}"#, r#"{"id":"b"}"#]);
    }

    #[tokio::test]
    async fn test_existing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("8kun-data")).unwrap();
        let sink = Sink::new(dir.path());
        let result = sink.write(Path::new("8kun-data/x.html"), b"<html/>", OutputMode::Snapshot).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unwritable_destination_is_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where a directory is needed.
        std::fs::write(dir.path().join("blocked"), b"").unwrap();
        let sink = Sink::new(dir.path());
        let err = sink
            .write(Path::new("blocked/out.json"), b"{}", OutputMode::Snapshot)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "storage");
    }

    #[tokio::test]
    async fn test_failed_rename_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory sits where the snapshot should land.
        std::fs::create_dir_all(dir.path().join("out.json/keep")).unwrap();
        let sink = Sink::new(dir.path());

        let err = sink
            .write(Path::new("out.json"), b"[]", OutputMode::Snapshot)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "storage");
        assert!(!dir.path().join("out.json.partial").exists());
        assert!(dir.path().join("out.json/keep").is_dir());
    }

    #[tokio::test]
    async fn test_ensure_writable_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Sink::new(dir.path().join("nested/root"));
        sink.ensure_writable().await.unwrap();
        assert!(dir.path().join("nested/root").is_dir());
    }
}
