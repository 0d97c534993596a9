//! Identifier discovery on listing pages.
//!
//! A listing page embeds item identifiers inside attribute values, e.g.
//! `<div id="op_121497">`. An [`IdPattern`] names which elements to look at
//! (CSS selector), which attribute to read, and a regex whose first capture
//! group is the identifier. [`collect`] unions the matches of every page into
//! one [`IdentifierSet`].

use crate::models::IdentifierSet;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

/// Default: thread-opening posts on vichan-style boards.
pub const DEFAULT_SELECTOR: &str = "div[id]";
pub const DEFAULT_ATTRIBUTE: &str = "id";
pub const DEFAULT_ID_REGEX: &str = r"^op_(\d+)$";

/// How to find identifiers on a listing page.
#[derive(Debug, Clone)]
pub struct IdPattern {
    selector: Selector,
    attribute: String,
    regex: Regex,
}

impl IdPattern {
    /// Build a pattern. `regex` must contain at least one capture group.
    pub fn new(selector: &str, attribute: &str, regex: &str) -> Result<Self, String> {
        let selector =
            Selector::parse(selector).map_err(|e| format!("invalid selector {selector:?}: {e}"))?;
        let regex = Regex::new(regex).map_err(|e| format!("invalid id regex: {e}"))?;
        if regex.captures_len() < 2 {
            return Err(format!("id regex {:?} has no capture group", regex.as_str()));
        }
        Ok(Self {
            selector,
            attribute: attribute.to_string(),
            regex,
        })
    }

    /// Identifiers on one page in document order, duplicates included.
    pub fn matches(&self, page: &str) -> Vec<String> {
        let document = Html::parse_document(page);
        document
            .select(&self.selector)
            .filter_map(|element| element.value().attr(&self.attribute))
            .filter_map(|value| {
                self.regex
                    .captures(value)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
            })
            .collect()
    }
}

impl Default for IdPattern {
    fn default() -> Self {
        Self::new(DEFAULT_SELECTOR, DEFAULT_ATTRIBUTE, DEFAULT_ID_REGEX)
            .unwrap_or_else(|e| unreachable!("built-in id pattern is valid: {e}"))
    }
}

/// Scan every page and return the deduplicated identifiers.
///
/// Pages without matches, and markup the HTML parser has to repair,
/// simply contribute nothing.
pub fn collect<S: AsRef<str>>(pages: &[S], pattern: &IdPattern) -> IdentifierSet {
    let mut ids = IdentifierSet::new();
    let mut total_matches = 0usize;
    for page in pages {
        let found = pattern.matches(page.as_ref());
        total_matches += found.len();
        ids.extend(found);
    }
    debug!(
        pages = pages.len(),
        matches = total_matches,
        unique = ids.len(),
        "Collected identifiers"
    );
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_ONE: &str = r#"
        <html><body>
          <div class="thread" id="thread_100"><div class="post op" id="op_100">a</div></div>
          <div class="thread" id="thread_200"><div class="post op" id="op_200">b</div></div>
          <div class="post reply" id="reply_201">c</div>
        </body></html>"#;

    #[test]
    fn test_three_matches_two_identical_yield_two_ids() {
        let page = r#"<div id="op_5"></div><div id="op_9"></div><div id="op_5"></div>"#;
        let ids = collect(&[page], &IdPattern::default());
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("5"));
        assert!(ids.contains("9"));
    }

    #[test]
    fn test_ignores_non_matching_ids() {
        let ids = collect(&[PAGE_ONE], &IdPattern::default());
        assert_eq!(ids.iter().collect::<Vec<_>>(), vec!["100", "200"]);
    }

    #[test]
    fn test_duplicates_across_pages_collapse() {
        let page_two = r#"<div id="op_200"></div><div id="op_300"></div>"#;
        let ids = collect(&[PAGE_ONE, page_two], &IdPattern::default());
        assert_eq!(ids.iter().collect::<Vec<_>>(), vec!["100", "200", "300"]);
    }

    #[test]
    fn test_empty_input_yields_empty_set() {
        let pages: [&str; 0] = [];
        assert!(collect(&pages, &IdPattern::default()).is_empty());
    }

    #[test]
    fn test_page_without_matches_is_not_an_error() {
        let ids = collect(&["<p>nothing here</p>"], &IdPattern::default());
        assert!(ids.is_empty());
    }

    #[test]
    fn test_malformed_markup_is_tolerated() {
        let broken = r#"<div id="op_42"><p>unclosed <div id="op_43" <span>"#;
        let ids = collect(&[broken], &IdPattern::default());
        assert!(ids.contains("42"));
    }

    #[test]
    fn test_collect_is_repeatable_and_bounded_by_matches() {
        let pattern = IdPattern::default();
        let pages = [PAGE_ONE, r#"<div id="op_100"></div>"#];
        let total: usize = pages.iter().map(|p| pattern.matches(p).len()).sum();
        let first = collect(&pages, &pattern);
        let second = collect(&pages, &pattern);
        assert_eq!(first, second);
        assert!(first.len() <= total);
    }

    #[test]
    fn test_custom_attribute_and_regex() {
        let pattern = IdPattern::new("a[href]", "href", r"/res/(\d+)\.html").unwrap();
        let page = r#"<a href="/pnd/res/77.html#77">x</a><a href="/about">y</a>"#;
        let ids = collect(&[page], &pattern);
        assert_eq!(ids.iter().collect::<Vec<_>>(), vec!["77"]);
    }

    #[test]
    fn test_pattern_without_capture_group_is_rejected() {
        assert!(IdPattern::new("div", "id", "^op_").is_err());
        assert!(IdPattern::new("div[", "id", "^op_(\\d+)$").is_err());
    }
}
