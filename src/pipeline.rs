//! The top-level driver: every configured source, one after another.
//!
//! Sources run sequentially so one host is never hit by two flows at once.
//! A source that fails (or panics) is recorded as aborted and the run moves
//! on to the next one; nothing a single source does can stop the others.

use crate::config::Source;
use crate::fetch::Transport;
use crate::models::{RunSummary, SourceOutcome};
use crate::runner::{RunContext, run_source};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

/// Operator interrupt, shared between the signal handler and the run.
///
/// Checked between pages, items and sources; a request already in flight is
/// allowed to finish (or time out).
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[instrument(level = "info", skip_all, fields(sources = sources.len()))]
pub async fn run_all<T: Transport>(ctx: &RunContext<T>, sources: &[Source]) -> RunSummary {
    let started = Instant::now();
    let mut outcomes = Vec::with_capacity(sources.len());

    for (i, source) in sources.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            warn!(
                remaining = sources.len() - i,
                "Interrupt received; skipping remaining sources"
            );
            break;
        }

        let outcome = match AssertUnwindSafe(run_source(ctx, source))
            .catch_unwind()
            .await
        {
            Ok(Ok(report)) => SourceOutcome::Completed(report),
            Ok(Err(e)) => {
                error!(source = %source.name, kind = e.kind(), error = %e, "Source aborted");
                SourceOutcome::Aborted {
                    source: source.name.clone(),
                    kind: e.kind(),
                    reason: e.to_string(),
                }
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(source = %source.name, error = %reason, "Source panicked; continuing with the next one");
                SourceOutcome::Aborted {
                    source: source.name.clone(),
                    kind: "panic",
                    reason,
                }
            }
        };
        outcomes.push(outcome);
    }

    let summary = RunSummary {
        outcomes,
        elapsed: started.elapsed(),
    };
    info!(
        completed = summary.reports().count(),
        aborted = summary.aborted().count(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "Run finished"
    );
    summary
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
