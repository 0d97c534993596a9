//! Subreddit archiving: newest submissions with their full comment trees.
//!
//! The flow only depends on [`SubmissionApi`], a narrow view of reddit:
//! list a subreddit's newest items, resolve an item's nested replies, look
//! up an author. [`RedditJsonApi`] implements it over reddit's public JSON
//! endpoints through the run's rate limiter and bounded fetcher; tests swap
//! in an in-memory implementation.
//!
//! Every submission becomes one document:
//!
//! ```json
//! {"id": "...", "title": "...", ..., "author": {...}, "comments": [{...}, ...]}
//! ```
//!
//! In append mode each document is written as soon as it is complete, so an
//! interrupted run loses at most the submission in progress.

use crate::config::{Source, SubredditSource};
use crate::error::{FetchError, FetchOutcome, SourceError};
use crate::fetch::{HttpRequest, Transport};
use crate::models::{NormalizedRecord, RawRecord};
use crate::normalize::{AllowList, normalize};
use crate::runner::{Phase, RequestPolicy, RunContext, SourceRunner};
use crate::sink::{OutputMode, RunStamp};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};
use urlencoding::encode;

const WWW_BASE: &str = "https://www.reddit.com";
const OAUTH_BASE: &str = "https://oauth.reddit.com";
const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
/// Most ids `/api/morechildren` accepts per call.
const MORE_CHILDREN_BATCH: usize = 100;
/// Most submissions a listing request returns.
const LISTING_PAGE_MAX: usize = 100;

/// The parts of reddit the archiver needs.
pub trait SubmissionApi {
    /// Newest submissions of `subreddit`, at most `limit`.
    async fn list_items(&self, subreddit: &str, limit: usize) -> FetchOutcome<Vec<RawRecord>>;

    /// Every comment under `item`, flattened, with collapsed branches expanded.
    async fn resolve_nested_replies(&self, item: &RawRecord) -> FetchOutcome<Vec<RawRecord>>;

    /// Profile of `name`, or `None` if the account no longer exists.
    async fn fetch_author(&self, name: &str) -> FetchOutcome<Option<RawRecord>>;
}

/// One archived submission.
#[derive(Debug, Serialize)]
pub struct SubmissionDocument {
    #[serde(flatten)]
    pub fields: NormalizedRecord,
    pub author: NormalizedRecord,
    pub comments: Vec<NormalizedRecord>,
}

pub fn output_path(cfg: &SubredditSource, stamp: &RunStamp, mode: OutputMode) -> PathBuf {
    match mode {
        OutputMode::Append => {
            PathBuf::from(&cfg.directory).join(format!("{}.json", cfg.subreddit))
        }
        OutputMode::Snapshot => PathBuf::from(&cfg.directory)
            .join(&stamp.month)
            .join(format!("{}_{}.json", stamp.datetime, cfg.subreddit)),
    }
}

#[instrument(level = "info", skip_all, fields(subreddit = %cfg.subreddit))]
pub async fn run<T: Transport, A: SubmissionApi>(
    runner: &mut SourceRunner<'_, T>,
    cfg: &SubredditSource,
    api: &A,
) -> Result<(), SourceError> {
    let ctx = runner.ctx();
    let mode = runner.source().output_mode();
    let path = output_path(cfg, &ctx.stamp, mode);

    runner.enter(Phase::Enumerating);
    let listed = api.list_items(&cfg.subreddit, cfg.limit).await;
    runner.record_listing(listed.is_ok());
    let submissions = listed?;
    info!(count = submissions.len(), limit = cfg.limit, "Fetched new submissions");

    runner.enter(Phase::FetchingItems);
    let submission_allow = cfg.submission_allow_list();
    let comment_allow = cfg.comment_allow_list();
    let author_allow = cfg.author_allow_list();
    let mut snapshot = Vec::new();

    for submission in &submissions {
        if runner.cancelled() {
            break;
        }
        runner.begin_item();
        let id = submission
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string();

        let comments = match api.resolve_nested_replies(submission).await {
            Ok(comments) => comments,
            Err(e) => {
                runner.skip_item(&id, e.kind(), &e.to_string());
                continue;
            }
        };
        let author = resolve_author(api, submission, cfg.include_authors, &author_allow).await;

        let document = SubmissionDocument {
            fields: normalize(submission, &submission_allow),
            author,
            comments: comments.iter().map(|c| normalize(c, &comment_allow)).collect(),
        };
        debug!(item = %id, comments = document.comments.len(), "Serialized submission");

        match mode {
            OutputMode::Append => {
                ctx.sink.write_json(&path, &document, mode).await?;
            }
            OutputMode::Snapshot => snapshot.push(document),
        }
        runner.item_succeeded();
    }

    runner.enter(Phase::Done);
    if mode == OutputMode::Snapshot {
        ctx.sink.write_json(&path, &snapshot, mode).await?;
    }
    info!(path = %path.display(), "Subreddit archived");
    Ok(())
}

async fn resolve_author<A: SubmissionApi>(
    api: &A,
    submission: &RawRecord,
    include_profile: bool,
    allow: &AllowList,
) -> NormalizedRecord {
    let name = submission
        .get("author")
        .and_then(Value::as_str)
        .filter(|name| *name != "[deleted]");
    let Some(name) = name else {
        return single_field("id", "deleted");
    };
    if !include_profile {
        return single_field("name", name);
    }
    match api.fetch_author(name).await {
        Ok(Some(profile)) => normalize(&profile, allow),
        Ok(None) => single_field("id", "deleted"),
        Err(e) => {
            warn!(author = name, kind = e.kind(), error = %e, "Author lookup failed; keeping name only");
            single_field("name", name)
        }
    }
}

fn single_field(key: &str, value: &str) -> NormalizedRecord {
    let mut map = Map::new();
    map.insert(key.to_string(), Value::from(value));
    NormalizedRecord(map)
}

/// `(kind, data)` for every child of a listing (`{"data": {"children": [...]}}`).
fn listing_children(listing: &Value) -> Vec<(&str, &RawRecord)> {
    listing
        .pointer("/data/children")
        .and_then(Value::as_array)
        .map(|children| things(children))
        .unwrap_or_default()
}

fn things(items: &[Value]) -> Vec<(&str, &RawRecord)> {
    items
        .iter()
        .filter_map(|thing| {
            let kind = thing.get("kind")?.as_str()?;
            let data = thing.get("data")?.as_object()?;
            Some((kind, data))
        })
        .collect()
}

/// Comments gathered for one submission, plus the stubs still to resolve.
///
/// reddit leaves two kinds of `more` stubs in a tree: collapsed siblings,
/// which list their ids in `children`, and "continue this thread" links,
/// which have no `children` and point at the comment (`parent_id`) whose
/// replies were cut off.
#[derive(Debug, Default)]
struct CommentWalk {
    comments: Vec<RawRecord>,
    seen: HashSet<String>,
    /// Ids from collapsed-sibling stubs, not yet requested.
    more: Vec<String>,
    /// Comment ids whose deeper replies need their own request.
    continuations: Vec<String>,
}

impl CommentWalk {
    /// Flatten `children` breadth-first into the walk.
    ///
    /// A comment already collected is not added twice, but its replies are
    /// still visited; a continued thread starts with the parent comment.
    fn absorb(&mut self, children: Vec<(&str, &RawRecord)>) {
        let mut queue: VecDeque<_> = children.into();

        while let Some((kind, data)) = queue.pop_front() {
            match kind {
                "t1" => {
                    let id = data.get("id").and_then(Value::as_str).unwrap_or_default();
                    if self.seen.insert(id.to_string()) {
                        self.comments.push(data.clone());
                    }
                    if let Some(replies) = data.get("replies").filter(|r| r.is_object()) {
                        queue.extend(listing_children(replies));
                    }
                }
                "more" => {
                    let ids: Vec<String> = data
                        .get("children")
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect();
                    if !ids.is_empty() {
                        self.more.extend(ids);
                        continue;
                    }
                    let parent = data.get("parent_id").and_then(Value::as_str);
                    match parent.and_then(|p| p.strip_prefix("t1_")) {
                        Some(comment) => self.continuations.push(comment.to_string()),
                        None => debug!(parent = ?parent, "Empty more stub without a parent comment"),
                    }
                }
                other => debug!(kind = other, "Ignoring non-comment thing"),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// [`SubmissionApi`] over reddit's JSON endpoints.
///
/// Without credentials it reads the public `www.reddit.com` JSON views. With
/// client credentials it obtains an application-only bearer token and uses
/// `oauth.reddit.com`, which has a higher request allowance.
pub struct RedditJsonApi<'a, T> {
    ctx: &'a RunContext<T>,
    policy: RequestPolicy,
    base: &'static str,
    token: Option<String>,
}

impl<'a, T: Transport> RedditJsonApi<'a, T> {
    /// Prepare the client for one source, authenticating first when
    /// credentials are configured.
    ///
    /// # Errors
    ///
    /// Returns the [`FetchError`] of the token request if authentication
    /// fails; the source is then aborted.
    #[instrument(level = "info", skip_all, fields(source = %source.name))]
    pub async fn connect(ctx: &'a RunContext<T>, source: &Source) -> FetchOutcome<Self> {
        let policy = RequestPolicy::item(source);
        let Some(auth) = &ctx.reddit_auth else {
            return Ok(Self {
                ctx,
                policy,
                base: WWW_BASE,
                token: None,
            });
        };

        let request = HttpRequest::post_form(
            TOKEN_URL,
            vec![("grant_type".to_string(), "client_credentials".to_string())],
        )
        .basic_auth(&auth.client_id, &auth.client_secret);
        let token: TokenResponse = ctx.request_json(&request, &policy).await?;
        info!("Authenticated with reddit (application-only)");

        Ok(Self {
            ctx,
            policy,
            base: OAUTH_BASE,
            token: Some(token.access_token),
        })
    }

    async fn get_json(&self, path_and_query: &str) -> FetchOutcome<Value> {
        let mut request = HttpRequest::get(format!("{}{}", self.base, path_and_query));
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("bearer {token}"));
        }
        self.ctx.request_json(&request, &self.policy).await
    }

    /// Request collapsed siblings in batches; a failed batch is logged and dropped.
    async fn expand_more(&self, link_id: &str, walk: &mut CommentWalk, requested: &mut HashSet<String>) {
        let mut pending = std::mem::take(&mut walk.more);

        while !pending.is_empty() {
            let take = pending.len().min(MORE_CHILDREN_BATCH);
            let batch: Vec<String> = pending
                .drain(..take)
                .filter(|id| requested.insert(id.clone()))
                .collect();
            if batch.is_empty() {
                continue;
            }

            let path = format!(
                "/api/morechildren.json?api_type=json&raw_json=1&link_id={}&children={}",
                encode(link_id),
                batch.iter().join(",")
            );
            match self.get_json(&path).await {
                Ok(value) => {
                    let found = value
                        .pointer("/json/data/things")
                        .and_then(Value::as_array)
                        .map(|items| things(items))
                        .unwrap_or_default();
                    walk.absorb(found);
                    pending.append(&mut walk.more);
                }
                Err(e) => {
                    warn!(link_id, batch = batch.len(), kind = e.kind(), error = %e, "Could not expand collapsed comments; skipping batch");
                }
            }
        }
    }

    /// Fetch the replies hidden behind a "continue this thread" link.
    async fn continue_thread(&self, submission: &str, comment: &str, walk: &mut CommentWalk) {
        let path = format!(
            "/comments/{}/_/{}.json?raw_json=1&limit=500",
            encode(submission),
            encode(comment)
        );
        match self.get_json(&path).await {
            Ok(thread) => match thread.get(1) {
                Some(listing) => walk.absorb(listing_children(listing)),
                None => warn!(item = submission, parent = comment, "Continued thread has no comment listing; skipping"),
            },
            Err(e) => {
                warn!(item = submission, parent = comment, kind = e.kind(), error = %e, "Could not continue comment thread; skipping");
            }
        }
    }
}

impl<T: Transport> SubmissionApi for RedditJsonApi<'_, T> {
    /// Pages through `new` with the `after` cursor, since reddit serves at
    /// most 100 items per request.
    async fn list_items(&self, subreddit: &str, limit: usize) -> FetchOutcome<Vec<RawRecord>> {
        let mut items = Vec::new();
        let mut after: Option<String> = None;

        while items.len() < limit {
            let page_size = (limit - items.len()).min(LISTING_PAGE_MAX);
            let mut path = format!("/r/{}/new.json?limit={page_size}&raw_json=1", encode(subreddit));
            if let Some(cursor) = &after {
                path.push_str(&format!("&after={}", encode(cursor)));
            }

            let listing = self.get_json(&path).await?;
            if listing.pointer("/data/children").is_none() {
                return Err(FetchError::Decode("listing has no children".into()));
            }
            let children = listing_children(&listing);
            let received = children.len();
            items.extend(
                children
                    .into_iter()
                    .filter(|(kind, _)| *kind == "t3")
                    .map(|(_, data)| data.clone()),
            );

            after = listing
                .pointer("/data/after")
                .and_then(Value::as_str)
                .map(str::to_string);
            if received == 0 || after.is_none() {
                break;
            }
        }
        items.truncate(limit);
        Ok(items)
    }

    async fn resolve_nested_replies(&self, item: &RawRecord) -> FetchOutcome<Vec<RawRecord>> {
        let id = item
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| FetchError::Decode("submission has no id".into()))?;
        let link_id = item
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("t3_{id}"));

        let thread = self
            .get_json(&format!("/comments/{}.json?raw_json=1&limit=500", encode(id)))
            .await?;
        let listing = thread
            .get(1)
            .ok_or_else(|| FetchError::Decode("comment page has no comment listing".into()))?;

        let mut walk = CommentWalk::default();
        walk.absorb(listing_children(listing));

        let mut requested = HashSet::new();
        let mut continued = HashSet::new();
        loop {
            if !walk.more.is_empty() {
                debug!(item = id, collapsed = walk.more.len(), "Expanding collapsed comments");
                self.expand_more(&link_id, &mut walk, &mut requested).await;
            } else if let Some(parent) = walk.continuations.pop() {
                if continued.insert(parent.clone()) {
                    debug!(item = id, parent = %parent, "Continuing comment thread");
                    self.continue_thread(id, &parent, &mut walk).await;
                }
            } else {
                break;
            }
        }
        Ok(walk.comments)
    }

    async fn fetch_author(&self, name: &str) -> FetchOutcome<Option<RawRecord>> {
        match self
            .get_json(&format!("/user/{}/about.json?raw_json=1", encode(name)))
            .await
        {
            Ok(value) => Ok(value.get("data").and_then(Value::as_object).cloned()),
            Err(FetchError::HttpStatus(404)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
