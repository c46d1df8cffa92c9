//! Tag keys whose aggregates are computed but never persisted.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::TagAggregate;

/// A set of excluded tag keys, passed explicitly to the publishing step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusionList {
    keys: HashSet<String>,
}

impl ExclusionList {
    /// An empty list: nothing is excluded.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>) {
        self.keys.insert(key.into());
    }

    pub fn is_excluded(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// True if `aggregate` may be handed to a sink.
    pub fn permits(&self, aggregate: &TagAggregate) -> bool {
        !self.is_excluded(&aggregate.key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ExclusionList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusion_is_exact_match() {
        let list: ExclusionList = ["tag_user_Name"].into_iter().collect();

        assert!(list.is_excluded("tag_user_Name"));
        assert!(!list.is_excluded("tag_user_name"));
        assert!(!list.is_excluded("tag_user_Name2"));
    }

    #[test]
    fn test_permits_checks_key_only() {
        let mut list = ExclusionList::new();
        list.insert("owner");

        assert!(!list.permits(&TagAggregate::empty("owner", "alice")));
        assert!(!list.permits(&TagAggregate::none_bucket("owner")));
        assert!(list.permits(&TagAggregate::empty("env", "owner")));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_empty_list_permits_everything() {
        let list = ExclusionList::new();
        assert!(list.is_empty());
        assert!(list.permits(&TagAggregate::empty("anything", "x")));
    }
}
