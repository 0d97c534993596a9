//! Static run configuration.
//!
//! A run is described by a YAML file (or the built-in defaults, which archive
//! 4chan `/pol/`, 8kun `/pnd/` and two subreddits):
//!
//! ```yaml
//! output_root: archive
//! user_agent: "board_harvest/0.1 (research archive)"
//! sources:
//!   - name: 4chan-pol
//!     kind: catalog
//!     board: pol
//!   - name: 8kun-pnd
//!     kind: imageboard
//!     board: pnd
//!     first_page_url: https://8kun.top/pnd/index.html
//!     page_url_template: https://8kun.top/pnd/{page}.html
//!     item_url_template: https://8kun.top/pnd/res/{id}.html#{id}
//!     listing_interval_secs: 3
//!     min_interval_secs: 1
//!   - name: reddit-worldnews
//!     kind: subreddit
//!     subreddit: worldnews
//!     min_interval_secs: 1
//! ```
//!
//! Sources are immutable once loaded. A source whose settings are invalid
//! fails [`Source::validate`] when its run starts, which aborts only that
//! source.

use crate::collect::{DEFAULT_ATTRIBUTE, DEFAULT_ID_REGEX, DEFAULT_SELECTOR, IdPattern};
use crate::error::SourceError;
use crate::normalize::{
    AllowList, CATALOG_THREAD_FIELDS, COMMENT_FIELDS, REDDITOR_FIELDS, SUBMISSION_FIELDS,
};
use crate::sink::OutputMode;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const DEFAULT_USER_AGENT: &str = concat!("board_harvest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory all output paths are relative to.
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    pub sources: Vec<Source>,
}

fn default_output_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Config {
    #[instrument(level = "info")]
    pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read config {}: {e}", path.display()))?;
        let config = Self::from_yaml(&text)?;
        info!(sources = config.sources.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, Box<dyn Error>> {
        let config: Config = serde_yaml::from_str(text)?;
        if let Some(name) = config.sources.iter().map(|s| &s.name).duplicates().next() {
            return Err(format!("duplicate source name {name:?}").into());
        }
        Ok(config)
    }

    /// The configured sources, optionally restricted to `names` (kept in
    /// configuration order). Unknown names are reported and ignored.
    pub fn select(&self, names: Option<&[String]>) -> Result<Vec<Source>, Box<dyn Error>> {
        let Some(names) = names else {
            return Ok(self.sources.clone());
        };

        for unknown in names
            .iter()
            .unique()
            .filter(|n| !self.sources.iter().any(|s| &s.name == *n))
        {
            warn!(source = %unknown, "Unknown source requested; ignoring");
        }

        let selected: Vec<Source> = self
            .sources
            .iter()
            .filter(|s| names.contains(&s.name))
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(format!(
                "none of the requested sources exist (available: {})",
                self.sources.iter().map(|s| &s.name).join(", ")
            )
            .into());
        }
        Ok(selected)
    }
}

impl Default for Config {
    fn default() -> Self {
        let catalog = Source::new(
            "4chan-pol",
            SourceKind::Catalog(CatalogSource {
                board: "pol".into(),
                url: None,
                filter: true,
                fields: None,
                directory: default_catalog_dir(),
            }),
        );

        let mut imageboard = Source::new(
            "8kun-pnd",
            SourceKind::Imageboard(ImageboardSource {
                board: "pnd".into(),
                first_page_url: "https://8kun.top/pnd/index.html".into(),
                page_url_template: "https://8kun.top/pnd/{page}.html".into(),
                pages: default_pages(),
                item_url_template: "https://8kun.top/pnd/res/{id}.html#{id}".into(),
                selector: default_selector(),
                attribute: default_attribute(),
                id_regex: default_id_regex(),
                directory: default_imageboard_dir(),
            }),
        );
        imageboard.listing_interval_secs = Some(3.0);
        imageboard.min_interval_secs = 1.0;

        let subreddits = ["worldnews", "politics"].into_iter().map(|sub| {
            let mut source = Source::new(
                format!("reddit-{sub}"),
                SourceKind::Subreddit(SubredditSource {
                    subreddit: sub.into(),
                    limit: default_limit(),
                    include_authors: true,
                    fields: None,
                    comment_fields: None,
                    author_fields: None,
                    directory: default_reddit_dir(),
                }),
            );
            source.min_interval_secs = 1.0;
            source
        });

        Self {
            output_root: default_output_root(),
            user_agent: default_user_agent(),
            sources: [catalog, imageboard].into_iter().chain(subreddits).collect(),
        }
    }
}

/// One configured remote origin and its extraction rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    #[serde(flatten)]
    pub kind: SourceKind,
    /// Hard wall-clock bound per request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    /// Minimum spacing between item requests to the source's host.
    #[serde(default = "default_interval_secs")]
    pub min_interval_secs: f64,
    /// Spacing between listing page requests; defaults to `min_interval_secs`.
    #[serde(default)]
    pub listing_interval_secs: Option<f64>,
    /// Random extra delay added on top of the interval.
    #[serde(default)]
    pub jitter_ms: u64,
    /// Overrides the kind's default output mode.
    #[serde(default)]
    pub output: Option<OutputMode>,
}

fn default_timeout_secs() -> f64 {
    60.0
}

fn default_interval_secs() -> f64 {
    1.0
}

impl Source {
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            timeout_secs: default_timeout_secs(),
            min_interval_secs: default_interval_secs(),
            listing_interval_secs: None,
            jitter_ms: 0,
            output: None,
        }
    }

    pub fn validate(&self) -> Result<(), SourceError> {
        let config = |msg: String| SourceError::Config(format!("{}: {msg}", self.name));
        for (field, value) in [
            ("timeout_secs", Some(self.timeout_secs)),
            ("min_interval_secs", Some(self.min_interval_secs)),
            ("listing_interval_secs", self.listing_interval_secs),
        ] {
            if let Some(value) = value {
                Duration::try_from_secs_f64(value)
                    .map_err(|_| config(format!("{field} must be a non-negative number")))?;
            }
        }

        match &self.kind {
            SourceKind::Catalog(c) if c.board.trim().is_empty() => {
                Err(config("board must not be empty".into()))
            }
            SourceKind::Imageboard(b) => {
                if !b.item_url_template.contains("{id}") {
                    return Err(config("item_url_template must contain {id}".into()));
                }
                if b.pages > 1 && !b.page_url_template.contains("{page}") {
                    return Err(config("page_url_template must contain {page}".into()));
                }
                b.id_pattern().map(|_| ()).map_err(config)
            }
            SourceKind::Subreddit(r) if r.subreddit.trim().is_empty() => {
                Err(config("subreddit must not be empty".into()))
            }
            _ => Ok(()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::ZERO)
    }

    pub fn item_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.min_interval_secs).unwrap_or(Duration::ZERO)
    }

    pub fn listing_interval(&self) -> Duration {
        self.listing_interval_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_else(|| self.item_interval())
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output.unwrap_or(match &self.kind {
            SourceKind::Catalog(c) if !c.filter => OutputMode::Append,
            SourceKind::Catalog(_) | SourceKind::Imageboard(_) => OutputMode::Snapshot,
            SourceKind::Subreddit(_) => OutputMode::Append,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// A single JSON catalog listing every thread of a board.
    Catalog(CatalogSource),
    /// Paginated HTML index pages plus one HTML page per thread.
    Imageboard(ImageboardSource),
    /// A subreddit's newest submissions with their comments.
    Subreddit(SubredditSource),
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Catalog(_) => "catalog",
            SourceKind::Imageboard(_) => "imageboard",
            SourceKind::Subreddit(_) => "subreddit",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSource {
    pub board: String,
    /// Defaults to the 4chan API catalog of `board`.
    #[serde(default)]
    pub url: Option<String>,
    /// Reduce threads to the allow-list; `false` stores the catalog as served.
    #[serde(default = "yes")]
    pub filter: bool,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default = "default_catalog_dir")]
    pub directory: String,
}

impl CatalogSource {
    pub fn catalog_url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("https://a.4cdn.org/{}/catalog.json", self.board))
    }

    pub fn allow_list(&self) -> AllowList {
        allow_list(&self.fields, CATALOG_THREAD_FIELDS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageboardSource {
    pub board: String,
    pub first_page_url: String,
    /// Index page `n > 1`, with `{page}` replaced by `n`.
    pub page_url_template: String,
    #[serde(default = "default_pages")]
    pub pages: usize,
    /// Thread page, with `{id}` replaced by the thread identifier.
    pub item_url_template: String,
    #[serde(default = "default_selector")]
    pub selector: String,
    #[serde(default = "default_attribute")]
    pub attribute: String,
    #[serde(default = "default_id_regex")]
    pub id_regex: String,
    #[serde(default = "default_imageboard_dir")]
    pub directory: String,
}

impl ImageboardSource {
    pub fn page_urls(&self) -> Vec<String> {
        (1..=self.pages)
            .map(|page| match page {
                1 => self.first_page_url.clone(),
                n => self.page_url_template.replace("{page}", &n.to_string()),
            })
            .collect()
    }

    pub fn item_url(&self, id: &str) -> String {
        self.item_url_template.replace("{id}", id)
    }

    pub fn id_pattern(&self) -> Result<IdPattern, String> {
        IdPattern::new(&self.selector, &self.attribute, &self.id_regex)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubredditSource {
    pub subreddit: String,
    /// Newest submissions to take per run.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Look up each author's profile.
    #[serde(default = "yes")]
    pub include_authors: bool,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub comment_fields: Option<Vec<String>>,
    #[serde(default)]
    pub author_fields: Option<Vec<String>>,
    #[serde(default = "default_reddit_dir")]
    pub directory: String,
}

impl SubredditSource {
    pub fn submission_allow_list(&self) -> AllowList {
        allow_list(&self.fields, SUBMISSION_FIELDS)
    }

    pub fn comment_allow_list(&self) -> AllowList {
        allow_list(&self.comment_fields, COMMENT_FIELDS)
    }

    pub fn author_allow_list(&self) -> AllowList {
        allow_list(&self.author_fields, REDDITOR_FIELDS)
    }
}

/// Client credentials for application-only reddit OAuth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedditAuth {
    pub client_id: String,
    pub client_secret: String,
}

fn allow_list(custom: &Option<Vec<String>>, default: &[&str]) -> AllowList {
    match custom {
        Some(fields) => AllowList::new(fields.iter().cloned()),
        None => AllowList::new(default.iter().copied()),
    }
}

fn yes() -> bool {
    true
}

fn default_pages() -> usize {
    10
}

fn default_limit() -> usize {
    20
}

fn default_selector() -> String {
    DEFAULT_SELECTOR.to_string()
}

fn default_attribute() -> String {
    DEFAULT_ATTRIBUTE.to_string()
}

fn default_id_regex() -> String {
    DEFAULT_ID_REGEX.to_string()
}

fn default_catalog_dir() -> String {
    "4chan-data".to_string()
}

fn default_imageboard_dir() -> String {
    "8kun-data".to_string()
}

fn default_reddit_dir() -> String {
    "data".to_string()
}
