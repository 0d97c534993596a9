//! HTML imageboard archiving (vichan/8kun style).
//!
//! Thread identifiers only appear in the index pages' markup, so this flow
//! walks the paginated index, collects the thread ids, then downloads each
//! thread page and stores it verbatim. Index pages and threads are both
//! best effort: a failure is logged and the run moves on.
//!
//! # Output
//!
//! ```text
//! 8kun-data/
//! ├── 2020-05-26_12-00-00_pnd_121497.html   # one file per thread
//! ├── 2020-05-26_12-00-00_pnd_121502.html
//! └── 2020-05-26_12-00-00_pnd_index.json    # ids found and saved this run
//! ```

use crate::collect::collect;
use crate::config::ImageboardSource;
use crate::error::SourceError;
use crate::fetch::Transport;
use crate::runner::{Phase, SourceRunner};
use crate::sink::{OutputMode, RunStamp};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

/// Per-run record of what the index scan found and what was stored.
#[derive(Debug, Serialize)]
pub struct RunManifest<'a> {
    pub board: &'a str,
    pub started: &'a str,
    pub pages_attempted: usize,
    pub pages_succeeded: usize,
    pub identifiers: Vec<&'a str>,
    pub saved: Vec<&'a str>,
    pub cancelled: bool,
}

/// Relative path of one saved thread page: `{datetime}_{board}_{id}.html`
/// in the board's directory.
pub fn item_path(cfg: &ImageboardSource, stamp: &RunStamp, id: &str) -> PathBuf {
    PathBuf::from(&cfg.directory).join(format!("{}_{}_{}.html", stamp.datetime, cfg.board, id))
}

/// Relative path of the run manifest.
///
/// # Returns
///
/// `{directory}/{datetime}_{board}_index.json`, one per run. The manifest is
/// always written as a snapshot, whatever the source's output mode.
pub fn manifest_path(cfg: &ImageboardSource, stamp: &RunStamp) -> PathBuf {
    PathBuf::from(&cfg.directory).join(format!("{}_{}_index.json", stamp.datetime, cfg.board))
}

#[instrument(level = "info", skip_all, fields(board = %cfg.board))]
pub async fn run<T: Transport>(
    runner: &mut SourceRunner<'_, T>,
    cfg: &ImageboardSource,
) -> Result<(), SourceError> {
    let ctx = runner.ctx();
    let mode = runner.source().output_mode();
    let pattern = cfg.id_pattern().map_err(SourceError::Config)?;

    runner.enter(Phase::Enumerating);
    let mut pages = Vec::new();
    for url in cfg.page_urls() {
        if runner.cancelled() {
            break;
        }
        if let Some(body) = runner.fetch_page(&url).await {
            pages.push(body);
        }
    }

    runner.enter(Phase::Collecting);
    let ids = collect(&pages, &pattern);
    info!(
        pages = pages.len(),
        unique = ids.len(),
        "Collected thread identifiers"
    );
    if ids.is_empty() {
        warn!(pages = pages.len(), "No thread identifiers found on any index page");
    }

    runner.enter(Phase::FetchingItems);
    let mut saved = Vec::new();
    for id in ids.iter() {
        if runner.cancelled() {
            break;
        }
        let url = cfg.item_url(id);
        let Some(body) = runner.fetch_item(id, &url).await else {
            continue;
        };
        let path = item_path(cfg, &ctx.stamp, id);
        ctx.sink.write(&path, body.as_bytes(), mode).await?;
        runner.item_succeeded();
        saved.push(id);
        info!(item = id, path = %path.display(), bytes = body.len(), "Saved thread page");
    }

    runner.enter(Phase::Done);
    let report = runner.report();
    let manifest = RunManifest {
        board: &cfg.board,
        started: &ctx.stamp.datetime,
        pages_attempted: report.pages_attempted,
        pages_succeeded: report.pages_succeeded,
        identifiers: ids.iter().collect(),
        saved,
        cancelled: report.cancelled,
    };
    ctx.sink
        .write_json(&manifest_path(cfg, &ctx.stamp), &manifest, OutputMode::Snapshot)
        .await?;
    Ok(())
}
