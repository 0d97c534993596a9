//! Source-specific run flows.
//!
//! Each module drives a [`SourceRunner`](crate::runner::SourceRunner)
//! through its phases for one kind of source:
//!
//! | Kind | Module | Listing | Items | Default output |
//! |------|--------|---------|-------|----------------|
//! | `catalog` | [`catalog`] | one JSON catalog (mandatory) | threads inside the catalog | snapshot per run |
//! | `imageboard` | [`imageboard`] | N HTML index pages (best effort) | one HTML page per thread | snapshot per thread |
//! | `subreddit` | [`reddit`] | "new" listing (mandatory) | submission + comment tree | one appended line per submission |
//!
//! # Failure policy
//!
//! - A failed optional listing page or item is logged and skipped.
//! - A failed mandatory listing, an unparseable listing, or a failed write
//!   ends the source with a [`SourceError`](crate::error::SourceError).

pub mod catalog;
pub mod imageboard;
pub mod reddit;
