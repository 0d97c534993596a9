//! One source's run.
//!
//! Every source moves through the same phases:
//!
//! ```text
//! Enumerating -> Collecting -> FetchingItems -> Done
//!      \______________ Aborted (fatal error) ___/
//! ```
//!
//! [`SourceRunner`] carries the state shared by all source kinds: the
//! current [`Phase`], the [`RunReport`] counters, and the rate-limited,
//! timeout-bounded request helpers. Page and item failures are logged and
//! counted here and never leave the runner; only [`SourceError`]s (mandatory
//! listing lost, output not writable, invalid settings) end a run early.
//! The kind-specific flows live in [`crate::sources`].

use crate::config::{RedditAuth, Source, SourceKind};
use crate::error::{FetchOutcome, SourceError};
use crate::fetch::{BoundedFetcher, HttpRequest, RateLimiter, Transport, host_key};
use crate::models::RunReport;
use crate::pipeline::CancelFlag;
use crate::sink::{RunStamp, Sink};
use crate::sources;
use crate::utils::truncate_for_log;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Everything a run shares across sources.
#[derive(Debug)]
pub struct RunContext<T> {
    pub fetcher: BoundedFetcher<T>,
    pub limiter: RateLimiter,
    pub sink: Sink,
    pub stamp: RunStamp,
    pub cancel: CancelFlag,
    pub reddit_auth: Option<RedditAuth>,
}

impl<T: Transport> RunContext<T> {
    /// Build the context for one run.
    ///
    /// # Arguments
    ///
    /// * `transport` - HTTP client every request goes through
    /// * `sink` - Output root for all sources
    /// * `stamp` - Timestamps naming this run's files
    /// * `cancel` - Flag raised by the interrupt handler
    ///
    /// Reddit OAuth is off until [`RunContext::with_reddit_auth`] is called.
    pub fn new(transport: T, sink: Sink, stamp: RunStamp, cancel: CancelFlag) -> Self {
        Self {
            fetcher: BoundedFetcher::new(transport),
            limiter: RateLimiter::new(),
            sink,
            stamp,
            cancel,
            reddit_auth: None,
        }
    }

    pub fn with_reddit_auth(mut self, auth: Option<RedditAuth>) -> Self {
        self.reddit_auth = auth;
        self
    }

    /// Wait for the request's host slot, then send it within the policy's
    /// timeout.
    pub async fn request(&self, request: &HttpRequest, policy: &RequestPolicy) -> FetchOutcome<Vec<u8>> {
        self.limiter
            .wait(&host_key(&request.url), policy.interval, policy.jitter)
            .await;
        self.fetcher.send(request, policy.timeout).await
    }

    /// [`request`](Self::request), decoding the body as JSON.
    pub async fn request_json<D: DeserializeOwned>(
        &self,
        request: &HttpRequest,
        policy: &RequestPolicy,
    ) -> FetchOutcome<D> {
        self.limiter
            .wait(&host_key(&request.url), policy.interval, policy.jitter)
            .await;
        self.fetcher.fetch_json(request, policy.timeout).await
    }

    /// GET `url` as UTF-8 text under `policy`.
    pub async fn fetch_text(&self, url: &str, policy: &RequestPolicy) -> FetchOutcome<String> {
        self.limiter
            .wait(&host_key(url), policy.interval, policy.jitter)
            .await;
        self.fetcher.fetch(url, policy.timeout).await
    }
}

/// Timing rules for one class of request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    pub timeout: Duration,
    pub interval: Duration,
    pub jitter: Duration,
}

impl RequestPolicy {
    pub fn listing(source: &Source) -> Self {
        Self {
            timeout: source.timeout(),
            interval: source.listing_interval(),
            jitter: source.jitter(),
        }
    }

    pub fn item(source: &Source) -> Self {
        Self {
            timeout: source.timeout(),
            interval: source.item_interval(),
            jitter: source.jitter(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Enumerating,
    Collecting,
    FetchingItems,
    Done,
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Enumerating => "enumerating",
            Phase::Collecting => "collecting",
            Phase::FetchingItems => "fetching_items",
            Phase::Done => "done",
            Phase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

pub struct SourceRunner<'a, T> {
    ctx: &'a RunContext<T>,
    source: &'a Source,
    phase: Phase,
    report: RunReport,
    started: Instant,
}

impl<'a, T: Transport> SourceRunner<'a, T> {
    /// Start a runner for `source`, in [`Phase::Enumerating`] with an empty
    /// report. The elapsed time counts from here.
    pub fn new(ctx: &'a RunContext<T>, source: &'a Source) -> Self {
        Self {
            ctx,
            source,
            phase: Phase::Enumerating,
            report: RunReport::new(&source.name),
            started: Instant::now(),
        }
    }

    pub fn ctx(&self) -> &'a RunContext<T> {
        self.ctx
    }

    pub fn source(&self) -> &'a Source {
        self.source
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn enter(&mut self, phase: Phase) {
        debug!(source = %self.source.name, from = %self.phase, to = %phase, "Phase change");
        self.phase = phase;
    }

    /// True once an interrupt was requested; marks the report as cancelled.
    pub fn cancelled(&mut self) -> bool {
        if self.ctx.cancel.is_cancelled() {
            if !self.report.cancelled {
                warn!(source = %self.source.name, phase = %self.phase, "Interrupt received; stopping source early");
            }
            self.report.cancelled = true;
        }
        self.report.cancelled
    }

    /// Fetch an optional listing page. Failures are logged and yield `None`.
    pub async fn fetch_page(&mut self, url: &str) -> Option<String> {
        self.report.pages_attempted += 1;
        let page = self.report.pages_attempted;
        info!(source = %self.source.name, page, %url, "Fetching listing page");
        let outcome = self
            .ctx
            .fetch_text(url, &RequestPolicy::listing(self.source))
            .await;
        match outcome {
            Ok(body) => {
                self.report.pages_succeeded += 1;
                Some(body)
            }
            Err(e) => {
                warn!(source = %self.source.name, page, %url, kind = e.kind(), error = %e, "Listing page failed; skipping");
                None
            }
        }
    }

    /// Fetch a listing the source cannot do without. Failure aborts the run.
    pub async fn fetch_listing(&mut self, request: &HttpRequest) -> Result<Vec<u8>, SourceError> {
        self.report.pages_attempted += 1;
        info!(source = %self.source.name, url = %request.url, "Fetching listing");
        let body = self
            .ctx
            .request(request, &RequestPolicy::listing(self.source))
            .await?;
        self.report.pages_succeeded += 1;
        Ok(body)
    }

    /// Count a listing fetched through a source's own client.
    pub fn record_listing(&mut self, succeeded: bool) {
        self.report.pages_attempted += 1;
        if succeeded {
            self.report.pages_succeeded += 1;
        }
    }

    /// Fetch one item page as text. Failures are logged, counted and yield `None`.
    pub async fn fetch_item(&mut self, id: &str, url: &str) -> Option<String> {
        self.begin_item();
        debug!(source = %self.source.name, item = id, %url, "Fetching item");
        let outcome = self
            .ctx
            .fetch_text(url, &RequestPolicy::item(self.source))
            .await;
        match outcome {
            Ok(body) => Some(body),
            Err(e) => {
                self.skip_item(id, e.kind(), &e.to_string());
                None
            }
        }
    }

    /// Count an item attempt. Pair with [`item_succeeded`](Self::item_succeeded)
    /// or [`skip_item`](Self::skip_item).
    pub fn begin_item(&mut self) {
        self.report.items_attempted += 1;
    }

    /// Count an item as stored.
    pub fn item_succeeded(&mut self) {
        self.report.items_succeeded += 1;
    }

    /// Log a failed item and move on; the run continues.
    ///
    /// # Arguments
    ///
    /// * `id` - Item identifier, for the log line
    /// * `kind` - Failure label such as `"timeout"` or `"parse"`
    /// * `reason` - Error text, truncated before logging
    pub fn skip_item(&mut self, id: &str, kind: &str, reason: &str) {
        warn!(
            source = %self.source.name,
            item = id,
            kind,
            error = %truncate_for_log(reason, 300),
            "Item failed; skipping"
        );
    }

    /// Close the run in [`Phase::Done`].
    ///
    /// # Returns
    ///
    /// The report with its elapsed time filled in.
    pub fn finish(mut self) -> RunReport {
        self.enter(Phase::Done);
        self.report.elapsed = self.started.elapsed();
        self.report
    }
}

/// Run one source to completion.
#[instrument(level = "info", skip_all, fields(source = %source.name, kind = source.kind.label()))]
pub async fn run_source<T: Transport>(
    ctx: &RunContext<T>,
    source: &Source,
) -> Result<RunReport, SourceError> {
    source.validate()?;
    let mut runner = SourceRunner::new(ctx, source);

    let result = match &source.kind {
        SourceKind::Catalog(catalog) => sources::catalog::run(&mut runner, catalog).await,
        SourceKind::Imageboard(board) => sources::imageboard::run(&mut runner, board).await,
        SourceKind::Subreddit(subreddit) => {
            match sources::reddit::RedditJsonApi::connect(ctx, source).await {
                Ok(api) => sources::reddit::run(&mut runner, subreddit, &api).await,
                Err(e) => Err(e.into()),
            }
        }
    };

    if let Err(e) = result {
        debug!(phase = %runner.phase(), kind = e.kind(), "Source stopped early");
        runner.enter(Phase::Aborted);
        return Err(e);
    }

    let report = runner.finish();
    info!(
        pages = report.pages_succeeded,
        pages_attempted = report.pages_attempted,
        items = report.items_succeeded,
        skipped = report.items_skipped(),
        cancelled = report.cancelled,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Source finished"
    );
    Ok(report)
}
