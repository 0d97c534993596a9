//! Allow-list normalization of remote records.
//!
//! Remote endpoints deliver far more than is worth keeping (image metadata,
//! flair, awards, ...). [`normalize`] keeps exactly the fields named by an
//! allow-list, leaving their values untouched. The default lists below are
//! what each source kind keeps unless its configuration overrides them.

use crate::models::{NormalizedRecord, RawRecord};
use serde_json::Map;
use std::collections::BTreeSet;

/// A set of field names to retain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList(BTreeSet<String>);

impl AllowList {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Keep only the allow-listed fields of `raw`.
///
/// Absent fields are omitted rather than defaulted. Iterates the raw record so
/// the output keeps the remote's field order where the map preserves it.
pub fn normalize(raw: &RawRecord, allow: &AllowList) -> NormalizedRecord {
    let kept: Map<_, _> = raw
        .iter()
        .filter(|(key, _)| allow.contains(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    NormalizedRecord(kept)
}

/// Thread attributes kept from a board catalog. Image and file metadata are
/// left out to save space.
pub const CATALOG_THREAD_FIELDS: &[&str] = &[
    "no",
    "resto",
    "sticky",
    "closed",
    "now",
    "time",
    "name",
    "trip",
    "id",
    "capcode",
    "country",
    "country_name",
    "sub",
    "com",
    "tim",
    "replies",
    "images",
    "last_modified",
    "tag",
    "semantic_url",
    "unique_ips",
    "archived",
    "archived_on",
    "last_replies",
];

pub const SUBMISSION_FIELDS: &[&str] = &[
    "id",
    "title",
    "name",
    "created_utc",
    "edited",
    "num_comments",
    "over_18",
    "permalink",
    "score",
    "upvote_ratio",
    "url",
];

pub const COMMENT_FIELDS: &[&str] = &[
    "id",
    "body",
    "created_utc",
    "edited",
    "is_submitter",
    "link_id",
    "parent_id",
    "permalink",
    "score",
    "stickied",
    "subreddit_id",
];

pub const REDDITOR_FIELDS: &[&str] = &[
    "id",
    "name",
    "comment_karma",
    "created_utc",
    "has_verified_email",
    "icon_img",
    "is_employee",
    "is_mod",
    "is_gold",
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn raw(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    #[test]
    fn test_keeps_only_allow_listed_fields() {
        let record = raw(json!({"no": 1, "com": "hello", "tim": 999, "extra": "drop-me"}));
        let allow = AllowList::new(["no", "com", "tim"]);
        let out = normalize(&record, &allow);
        assert_eq!(out.into_value(), json!({"no": 1, "com": "hello", "tim": 999}));
    }

    #[test]
    fn test_missing_fields_are_omitted_not_defaulted() {
        let record = raw(json!({"no": 7}));
        let allow = AllowList::new(["no", "sub", "com"]);
        let out = normalize(&record, &allow);
        assert_eq!(out.len(), 1);
        assert!(out.get("sub").is_none());
    }

    #[test]
    fn test_nested_values_pass_through_unchanged() {
        let record = raw(json!({
            "last_replies": [{"no": 2, "com": "x"}],
            "capcode": null,
            "sticky": true,
            "meta": {"a": 1}
        }));
        let allow = AllowList::new(["last_replies", "capcode", "sticky"]);
        let out = normalize(&record, &allow);
        assert_eq!(out.get("last_replies"), record.get("last_replies"));
        assert_eq!(out.get("capcode"), Some(&Value::Null));
        assert_eq!(out.get("sticky"), Some(&Value::Bool(true)));
        assert!(out.get("meta").is_none());
    }

    #[test]
    fn test_key_set_is_subset_of_allow_list() {
        let record = raw(json!({"id": "x", "body": "b", "ups": 3, "gilded": 0}));
        let allow = AllowList::new(COMMENT_FIELDS.iter().copied());
        let out = normalize(&record, &allow);
        assert!(out.keys().all(|k| allow.contains(k)));
        for key in record.keys().filter(|k| allow.contains(k)) {
            assert_eq!(out.get(key), record.get(key));
        }
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let record = raw(json!({"no": 1, "sub": "t", "filename": "a.png", "w": 100}));
        let allow = AllowList::new(CATALOG_THREAD_FIELDS.iter().copied());
        let once = normalize(&record, &allow);
        let twice = normalize(once.as_raw(), &allow);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_record_normalizes_to_empty() {
        let allow = AllowList::new(SUBMISSION_FIELDS.iter().copied());
        assert!(normalize(&RawRecord::new(), &allow).is_empty());
    }

    #[test]
    fn test_empty_allow_list_drops_everything() {
        let record = raw(json!({"no": 1}));
        assert!(normalize(&record, &AllowList::default()).is_empty());
    }
}
