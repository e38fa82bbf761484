//! Tag value predicates and their compiled matchers.

use regex::bytes::{Regex, RegexBuilder};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::config::ReaderConfig;
use crate::error::DbError;
use crate::trie::Trie;

/// Filter over the values of one tag key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagValuePredicate {
    /// Exact value.
    Equals(String),
    /// Any of the listed values.
    In(Vec<String>),
    /// Wildcard pattern: `*` matches any run of bytes, with an implicit trailing `*`.
    Like(String),
    /// Unanchored regular expression.
    Regex(String),
}

impl TagValuePredicate {
    pub fn equals(value: impl Into<String>) -> Self {
        TagValuePredicate::Equals(value.into())
    }

    pub fn in_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TagValuePredicate::In(values.into_iter().map(Into::into).collect())
    }

    pub fn like(pattern: impl Into<String>) -> Self {
        TagValuePredicate::Like(pattern.into())
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        TagValuePredicate::Regex(pattern.into())
    }

    /// Validates the predicate and builds its matcher.
    pub fn compile(&self, config: &ReaderConfig) -> Result<CompiledPredicate, DbError> {
        match self {
            TagValuePredicate::Equals(v) => {
                Ok(CompiledPredicate::Exact(vec![v.as_bytes().to_vec()]))
            }
            TagValuePredicate::In(values) => {
                if values.is_empty() {
                    return Err(DbError::InvalidPredicate(
                        "In predicate needs at least one value".to_string(),
                    ));
                }
                Ok(CompiledPredicate::Exact(
                    values.iter().map(|v| v.as_bytes().to_vec()).collect(),
                ))
            }
            TagValuePredicate::Like(pattern) => {
                if pattern.is_empty() {
                    return Err(DbError::InvalidPredicate(
                        "Like pattern must not be empty".to_string(),
                    ));
                }
                Ok(CompiledPredicate::Like(LikePattern::new(pattern.as_bytes())))
            }
            TagValuePredicate::Regex(pattern) => {
                if pattern.len() > config.max_regex_pattern_len {
                    return Err(DbError::InvalidPredicate(format!(
                        "Regex pattern too long: {} bytes (max: {})",
                        pattern.len(),
                        config.max_regex_pattern_len
                    )));
                }
                let regex = RegexBuilder::new(pattern)
                    .size_limit(config.regex_size_limit)
                    .build()
                    .map_err(|e| {
                        let shown: String = pattern.chars().take(50).collect();
                        DbError::InvalidPredicate(format!("Invalid regex '{}': {}", shown, e))
                    })?;
                Ok(CompiledPredicate::Regex(regex))
            }
        }
    }
}

/// Wildcard pattern split on `*`. The first segment is the literal trie prefix.
#[derive(Debug, Clone)]
pub struct LikePattern {
    segments: Vec<Vec<u8>>,
}

impl LikePattern {
    pub fn new(pattern: &[u8]) -> Self {
        Self {
            segments: pattern.split(|&b| b == b'*').map(<[u8]>::to_vec).collect(),
        }
    }

    /// Literal text before the first `*`.
    pub fn prefix(&self) -> &[u8] {
        self.segments.first().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_match(&self, value: &[u8]) -> bool {
        let Some(rest) = value.strip_prefix(self.prefix()) else {
            return false;
        };
        let mut hay = rest;
        for seg in self.segments.iter().skip(1) {
            if seg.is_empty() {
                continue;
            }
            match find(hay, seg) {
                Some(at) => hay = &hay[at + seg.len()..],
                None => return false,
            }
        }
        true
    }
}

fn find(hay: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > hay.len() {
        return None;
    }
    hay.windows(needle.len()).position(|w| w == needle)
}

/// Predicate ready to run against decoded tries.
#[derive(Debug, Clone)]
pub enum CompiledPredicate {
    Exact(Vec<Vec<u8>>),
    Like(LikePattern),
    Regex(Regex),
}

impl CompiledPredicate {
    /// Adds the ids of every entry of `trie` that satisfies the predicate.
    pub fn collect_into(&self, trie: &Trie, out: &mut RoaringBitmap) {
        match self {
            CompiledPredicate::Exact(values) => {
                for v in values {
                    if let Some(id) = trie.get(v) {
                        out.insert(id);
                    }
                }
            }
            CompiledPredicate::Like(pattern) => {
                trie.walk_prefix(pattern.prefix(), |value, id| {
                    if pattern.is_match(value) {
                        out.insert(id);
                    }
                    true
                });
            }
            CompiledPredicate::Regex(regex) => {
                trie.walk_prefix(&[], |value, id| {
                    if regex.is_match(value) {
                        out.insert(id);
                    }
                    true
                });
            }
        }
    }
}
