//! # board_harvest
//!
//! Periodically archives discussion-board content as timestamped files:
//! board catalogs (4chan API style), paginated HTML imageboards (8kun style)
//! and subreddit submissions with their comment trees.
//!
//! ## Usage
//!
//! ```sh
//! board_harvest -o ./archive
//! board_harvest -c harvest.yaml --sources 8kun-pnd --log-file harvest.log
//! ```
//!
//! ## Architecture
//!
//! A run is one pass over the configured sources, strictly one at a time:
//! 1. **Enumerating**: fetch the listing page(s) of the source
//! 2. **Collecting**: extract and deduplicate item identifiers
//! 3. **Fetching items**: fetch, normalize and store each item
//! 4. **Done**: write the run's outputs and log a per-source report
//!
//! Every request waits for its host's rate-limit slot and is bounded by a
//! hard timeout. Page and item failures are logged and skipped; a source
//! that cannot continue is reported as aborted and the run moves on.

use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod collect;
mod config;
mod error;
mod fetch;
mod models;
mod normalize;
mod pipeline;
mod runner;
mod sink;
mod sources;
#[cfg(test)]
mod testing;
mod utils;

use cli::Cli;
use config::{Config, RedditAuth};
use fetch::ReqwestTransport;
use models::SourceOutcome;
use pipeline::{CancelFlag, run_all};
use runner::RunContext;
use sink::{RunStamp, Sink};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    init_tracing(args.log_file.as_deref())?;

    let start_time = Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "board_harvest starting up");
    debug!(?args.config, ?args.output_dir, ?args.sources, "Parsed CLI arguments");

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => {
            info!("No configuration file given; using built-in sources");
            Config::default()
        }
    };
    if let Some(dir) = args.output_dir {
        config.output_root = dir;
    }
    if let Some(agent) = args.reddit_user_agent {
        config.user_agent = agent;
    }

    if args.list_sources {
        for source in &config.sources {
            println!(
                "{}\t{}\t{:?}",
                source.name,
                source.kind.label(),
                source.output_mode()
            );
        }
        return Ok(());
    }

    let sources = config.select(args.sources.as_deref())?;

    // Early check: a run that cannot write anything is not worth starting
    let sink = Sink::new(&config.output_root);
    if let Err(e) = sink.ensure_writable().await {
        error!(
            path = %config.output_root.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    let reddit_auth = match (args.reddit_client_id, args.reddit_client_secret) {
        (Some(client_id), Some(client_secret)) => Some(RedditAuth {
            client_id,
            client_secret,
        }),
        (None, None) => None,
        _ => {
            warn!("Reddit OAuth needs both client id and secret; using public endpoints");
            None
        }
    };

    let transport = ReqwestTransport::new(&config.user_agent)?;
    let cancel = CancelFlag::new();
    spawn_interrupt_handler(cancel.clone());

    let ctx = RunContext::new(transport, sink, RunStamp::now(), cancel)
        .with_reddit_auth(reddit_auth);
    info!(
        sources = sources.len(),
        stamp = %ctx.stamp.datetime,
        root = %config.output_root.display(),
        "Starting run"
    );

    let summary = run_all(&ctx, &sources).await;

    for report in summary.reports() {
        info!(
            source = %report.source,
            pages = report.pages_succeeded,
            pages_attempted = report.pages_attempted,
            items = report.items_succeeded,
            skipped = report.items_skipped(),
            cancelled = report.cancelled,
            "Source report"
        );
    }
    for outcome in summary.aborted() {
        if let SourceOutcome::Aborted {
            source,
            kind,
            reason,
        } = outcome
        {
            error!(source = %source, kind, reason = %reason, "Source report: aborted");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

/// Console logging plus an optional plain-text log file.
fn init_tracing(log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tfmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(UtcTime::rfc_3339());

    let file = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("cannot open log file {}: {e}", path.display()))?;
            Some(
                tfmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;
    Ok(())
}

/// First Ctrl-C requests a graceful stop, a second one exits immediately.
#[instrument(level = "debug", skip_all)]
fn spawn_interrupt_handler(cancel: CancelFlag) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for interrupts");
            return;
        }
        warn!("Interrupt received; stopping after the current request (Ctrl-C again to exit now)");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            error!("Second interrupt; exiting immediately");
            std::process::exit(130);
        }
    });
}
