//! Board catalog archiving (4chan API style).
//!
//! The catalog endpoint returns every live thread of a board in one JSON
//! document, `[{"page": 1, "threads": [...]}, ...]`, so no per-item requests
//! are needed. Threads are reduced to the allow-list and the rebuilt catalog
//! is written once; with `filter: false` the body is stored as served.

use crate::config::CatalogSource;
use crate::error::SourceError;
use crate::fetch::{HttpRequest, Transport};
use crate::models::NormalizedRecord;
use crate::normalize::{AllowList, normalize};
use crate::runner::{Phase, SourceRunner};
use crate::sink::{OutputMode, RunStamp};
use crate::utils::truncate_for_log;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

/// One catalog page after filtering.
#[derive(Debug, Serialize, PartialEq)]
pub struct CatalogPage {
    pub page: Value,
    pub threads: Vec<NormalizedRecord>,
}

/// Where a catalog is written: a timestamped file per run for snapshots,
/// one file per board for appends.
///
/// # Returns
///
/// A path relative to the sink root:
/// - Snapshot: `{directory}/{YYYY-MM}/{datetime}_{board}.json`
/// - Append: `{directory}/{board}.json`
pub fn output_path(cfg: &CatalogSource, stamp: &RunStamp, mode: OutputMode) -> PathBuf {
    match mode {
        OutputMode::Snapshot => PathBuf::from(&cfg.directory)
            .join(&stamp.month)
            .join(format!("{}_{}.json", stamp.datetime, cfg.board)),
        OutputMode::Append => PathBuf::from(&cfg.directory).join(format!("{}.json", cfg.board)),
    }
}

#[instrument(level = "info", skip_all, fields(board = %cfg.board))]
pub async fn run<T: Transport>(
    runner: &mut SourceRunner<'_, T>,
    cfg: &CatalogSource,
) -> Result<(), SourceError> {
    let ctx = runner.ctx();
    let mode = runner.source().output_mode();
    let path = output_path(cfg, &ctx.stamp, mode);

    runner.enter(Phase::Enumerating);
    let body = runner
        .fetch_listing(&HttpRequest::get(cfg.catalog_url()))
        .await?;

    runner.enter(Phase::FetchingItems);
    let catalog: Vec<Value> = serde_json::from_slice(&body).map_err(|e| {
        SourceError::Parse(format!(
            "catalog is not a JSON array of pages ({e}): {}",
            truncate_for_log(&String::from_utf8_lossy(&body), 200)
        ))
    })?;

    if !cfg.filter {
        runner.begin_item();
        runner.enter(Phase::Done);
        ctx.sink.write(&path, &body, mode).await?;
        runner.item_succeeded();
        info!(path = %path.display(), pages = catalog.len(), "Stored unfiltered catalog");
        return Ok(());
    }

    let allow = cfg.allow_list();
    info!(fields = allow.len(), "Filtering catalog response");
    let pages = filter_catalog(runner, catalog, &allow);
    let threads: usize = pages.iter().map(|p| p.threads.len()).sum();

    runner.enter(Phase::Done);
    ctx.sink.write_json(&path, &pages, mode).await?;
    info!(path = %path.display(), pages = pages.len(), threads, "Wrote filtered catalog");
    Ok(())
}

/// Rebuild the catalog keeping only allow-listed thread fields.
fn filter_catalog<T: Transport>(
    runner: &mut SourceRunner<'_, T>,
    catalog: Vec<Value>,
    allow: &AllowList,
) -> Vec<CatalogPage> {
    let mut pages = Vec::with_capacity(catalog.len());
    for (index, page) in catalog.into_iter().enumerate() {
        let Value::Object(mut page) = page else {
            warn!(index, "Catalog page is not an object; skipping");
            continue;
        };
        let number = page.remove("page").unwrap_or(Value::Null);
        let threads = match page.remove("threads") {
            Some(Value::Array(threads)) => threads,
            _ => {
                warn!(page = %number, "Catalog page has no thread list");
                Vec::new()
            }
        };

        let mut kept = Vec::with_capacity(threads.len());
        for thread in threads {
            runner.begin_item();
            match thread.as_object() {
                Some(raw) => {
                    kept.push(normalize(raw, allow));
                    runner.item_succeeded();
                }
                None => runner.skip_item(&thread_label(&thread), "parse", "thread is not an object"),
            }
        }
        pages.push(CatalogPage {
            page: number,
            threads: kept,
        });
    }
    pages
}

fn thread_label(thread: &Value) -> String {
    thread
        .get("no")
        .map(Value::to_string)
        .unwrap_or_else(|| truncate_for_log(&thread.to_string(), 40))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Source, SourceKind};
    use crate::pipeline::CancelFlag;
    use crate::runner::{RunContext, run_source};
    use crate::sink::Sink;
    use crate::testing::ScriptedTransport;
    use chrono::{Local, TimeZone};
    use serde_json::json;

    const CATALOG_URL: &str = "https://a.4cdn.org/pol/catalog.json";

    fn stamp() -> RunStamp {
        RunStamp::at(Local.with_ymd_and_hms(2020, 5, 26, 12, 0, 0).unwrap())
    }

    fn catalog_source() -> Source {
        Config::default().sources[0].clone()
    }

    fn catalog_body() -> String {
        json!([
            {"page": 1, "threads": [
                {"no": 1, "com": "hello", "tim": 999, "filename": "a", "ext": ".png"},
                {"no": 2, "sub": "subject", "replies": 4, "w": 200}
            ]},
            {"page": 2, "threads": [{"no": 3, "sticky": 1}, "garbage"]},
            {"page": 3}
        ])
        .to_string()
    }

    #[test]
    fn test_output_paths() {
        let SourceKind::Catalog(cfg) = catalog_source().kind else { unreachable!() };
        assert_eq!(
            output_path(&cfg, &stamp(), OutputMode::Snapshot),
            PathBuf::from("4chan-data/2020-05/2020-05-26_12-00-00_pol.json")
        );
        assert_eq!(
            output_path(&cfg, &stamp(), OutputMode::Append),
            PathBuf::from("4chan-data/pol.json")
        );
    }

    #[tokio::test]
    async fn test_filtered_catalog_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(
            ScriptedTransport::new().ok(CATALOG_URL, &catalog_body()),
            Sink::new(dir.path()),
            stamp(),
            CancelFlag::new(),
        );

        let report = run_source(&ctx, &catalog_source()).await.unwrap();
        assert_eq!(report.pages_succeeded, 1);
        assert_eq!(report.items_attempted, 4);
        assert_eq!(report.items_succeeded, 3);

        let written = std::fs::read_to_string(
            dir.path().join("4chan-data/2020-05/2020-05-26_12-00-00_pol.json"),
        )
        .unwrap();
        let value: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(
            value,
            json!([
                {"page": 1, "threads": [
                    {"no": 1, "com": "hello", "tim": 999},
                    {"no": 2, "sub": "subject", "replies": 4}
                ]},
                {"page": 2, "threads": [{"no": 3, "sticky": 1}]},
                {"page": 3, "threads": []}
            ])
        );
    }

    #[tokio::test]
    async fn test_unfiltered_catalog_is_appended_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let body = catalog_body();
        let ctx = RunContext::new(
            ScriptedTransport::new().ok(CATALOG_URL, &body),
            Sink::new(dir.path()),
            stamp(),
            CancelFlag::new(),
        );
        let mut source = catalog_source();
        if let SourceKind::Catalog(cfg) = &mut source.kind {
            cfg.filter = false;
        }

        run_source(&ctx, &source).await.unwrap();
        run_source(&ctx, &source).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("4chan-data/pol.json")).unwrap();
        assert_eq!(written.lines().count(), 2);
        assert_eq!(written.lines().next().unwrap(), body);
    }

    #[tokio::test]
    async fn test_unreachable_catalog_aborts_source() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(
            ScriptedTransport::new().fail(CATALOG_URL, "dns failure"),
            Sink::new(dir.path()),
            stamp(),
            CancelFlag::new(),
        );
        let err = run_source(&ctx, &catalog_source()).await.unwrap_err();
        assert_eq!(err.kind(), "transport");
        assert!(!dir.path().join("4chan-data").exists());
    }

    #[tokio::test]
    async fn test_wrong_shape_is_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(
            ScriptedTransport::new().ok(CATALOG_URL, r#"{"error": "not found"}"#),
            Sink::new(dir.path()),
            stamp(),
            CancelFlag::new(),
        );
        let err = run_source(&ctx, &catalog_source()).await.unwrap_err();
        assert_eq!(err.kind(), "parse");
    }
}
