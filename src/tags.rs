//! Tag tokenizer, query matcher, display formatter and mutation deltas.
//!
//! Wire syntax is shared by filters, mutations and storage: `key` is a
//! presence marker, `key=value` a string value. Only mutations give `key=`
//! its own meaning (delete).

use std::collections::{BTreeMap, BTreeSet};

use crate::error::NodeError;
use crate::node::{TagValue, Tags};

/// Split tokens on whitespace and parse each into `(key, value)`.
pub fn parse_tokens<'a>(
    tokens: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<(String, Option<String>)>, NodeError> {
    tokens
        .into_iter()
        .flat_map(str::split_whitespace)
        .map(parse_token)
        .collect()
}

pub(crate) fn parse_token(token: &str) -> Result<(String, Option<String>), NodeError> {
    let (key, value) = match token.split_once('=') {
        Some((k, v)) => (k, Some(v.to_string())),
        None => (token, None),
    };
    if key.is_empty() {
        return Err(NodeError::MalformedToken {
            token: token.to_string(),
            reason: "tag key must not be empty".into(),
        });
    }
    Ok((key.to_string(), value))
}

/// Conjunctive tag filter: `None` requires presence, `Some(v)` an exact value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagQuery(BTreeMap<String, Option<String>>);

impl TagQuery {
    pub fn parse<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Result<Self, NodeError> {
        Ok(Self(parse_tokens(tokens)?.into_iter().collect()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        matches(tags, self)
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for TagQuery {
    fn from_iter<I: IntoIterator<Item = (K, Option<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

pub fn matches(tags: &Tags, query: &TagQuery) -> bool {
    query.0.iter().all(|(key, expected)| match (tags.get(key), expected) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(TagValue::Valued(actual)), Some(expected)) => actual == expected,
        (Some(TagValue::Present), Some(_)) => false,
    })
}

/// Render tags for display: `key` or `key="value"`, sorted by key.
///
/// Only `"` is escaped, so values with whitespace or `=` do not re-parse
/// to the same tag set.
pub fn format_tags(tags: &Tags) -> String {
    tags.iter()
        .map(|(k, v)| match v {
            TagValue::Present => k.to_string(),
            TagValue::Valued(s) => format!("{k}=\"{}\"", s.replace('"', "\\\"")),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A parsed `--tags` mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDelta {
    set: BTreeMap<String, TagValue>,
    delete: BTreeSet<String>,
}

impl TagDelta {
    pub fn parse<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Result<Self, NodeError> {
        let mut delta = TagDelta::default();
        for (key, value) in parse_tokens(tokens)? {
            match value {
                None => {
                    delta.set.insert(key, TagValue::Present);
                }
                Some(v) if v.is_empty() => {
                    delta.delete.insert(key);
                }
                Some(v) => {
                    delta.set.insert(key, TagValue::Valued(v));
                }
            }
        }
        Ok(delta)
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.delete.is_empty()
    }

    /// Apply additions, then deletions: a delete of the same key wins.
    pub fn apply(&self, tags: &Tags) -> Tags {
        let mut out = tags.clone();
        for (k, v) in &self.set {
            out.insert(k.clone(), v.clone());
        }
        for k in &self.delete {
            out.remove(k);
        }
        out
    }
}

/// Parse `key=value` definition pairs given to `new`.
pub fn parse_pairs<'a>(
    tokens: impl IntoIterator<Item = &'a str>,
) -> Result<BTreeMap<String, String>, NodeError> {
    let mut out = BTreeMap::new();
    for token in tokens {
        let Some((key, value)) = token.split_once('=') else {
            return Err(NodeError::MalformedToken {
                token: token.to_string(),
                reason: "expected key=value".into(),
            });
        };
        if key.is_empty() {
            return Err(NodeError::MalformedToken {
                token: token.to_string(),
                reason: "key must not be empty".into(),
            });
        }
        out.insert(key.to_string(), value.to_string());
    }
    Ok(out)
}
