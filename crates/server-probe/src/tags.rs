//! Tag normalization.

use crate::types::RawTags;
use std::collections::{BTreeSet, HashMap};

/// Canonical set of lowercase tag tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    /// Normalize tags in whatever shape they arrived.
    ///
    /// Delimited strings are split on commas; every token is trimmed and
    /// lowercased, empties are dropped.
    pub fn from_raw(raw: &RawTags) -> Self {
        let mut set = BTreeSet::new();
        match raw {
            RawTags::List(items) => {
                for item in items {
                    insert_tokens(&mut set, item);
                }
            }
            RawTags::Delimited(s) => insert_tokens(&mut set, s),
        }
        Self(set)
    }

    /// Normalize tags and fold in the keys of the server rules.
    ///
    /// Plugins commonly announce themselves through a rule key (e.g. `kz`,
    /// `hns`), so rule keys take part in tag matching.
    pub fn from_raw_with_rules(raw: &RawTags, rules: &HashMap<String, String>) -> Self {
        let mut tags = Self::from_raw(raw);
        for key in rules.keys() {
            insert_tokens(&mut tags.0, key);
        }
        tags
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(token)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = BTreeSet::new();
        for item in iter {
            insert_tokens(&mut set, item.as_ref());
        }
        Self(set)
    }
}

fn insert_tokens(set: &mut BTreeSet<String>, input: &str) {
    for token in input.split(',') {
        let token = token.trim();
        if !token.is_empty() {
            set.insert(token.to_lowercase());
        }
    }
}
