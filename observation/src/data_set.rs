//! Data-set and table entry collections.
//!
//! A data set is an ordered map of unique keys to scalar values; a table is a
//! data set whose values are themselves data sets (the rows). Entries marked
//! `removed` act as deletions when the checkpoint merges an update into the
//! accumulated set.

use crate::Value;
use std::collections::btree_map::{self, BTreeMap};

/// One `key[=value]` entry. A bare key (or `key=` with an empty value) on the
/// wire arrives with `removed` set.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSetEntry {
    pub value: Value,
    pub removed: bool,
}

impl DataSetEntry {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            removed: false,
        }
    }

    pub fn removed() -> Self {
        Self {
            value: Value::Text(String::new()),
            removed: true,
        }
    }
}

/// An ordered collection of [`DataSetEntry`] keyed by unique entry key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSet(BTreeMap<String, DataSetEntry>);

impl DataSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: DataSetEntry) {
        self.0.insert(key.into(), entry);
    }

    pub fn get(&self, key: &str) -> Option<&DataSetEntry> {
        self.0.get(key)
    }

    /// The typed value for `key`, ignoring removal markers.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.0.get(key).map(|e| &e.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, DataSetEntry> {
        self.0.iter()
    }

    pub fn keys(&self) -> btree_map::Keys<'_, String, DataSetEntry> {
        self.0.keys()
    }

    /// Merges `incoming` over this set, producing the accumulated state:
    /// incoming entries override same-key entries, incoming removals delete
    /// their key, and unmentioned keys are preserved. The result carries no
    /// removal markers.
    pub fn merged_with(&self, incoming: &Self) -> Self {
        let mut merged = self.clone();
        for (key, entry) in &incoming.0 {
            if entry.removed {
                merged.0.remove(key);
            } else {
                merged.0.insert(key.clone(), entry.clone());
            }
        }
        merged
    }

    /// Drops entries equal to their counterpart in `previous`, leaving only
    /// the changes. Returns true if anything was dropped. Used by the
    /// duplicate filter to reduce a data-set update to its delta.
    pub fn retain_changes(&mut self, previous: &Self) -> bool {
        let before = self.0.len();
        self.0.retain(|key, entry| match previous.0.get(key) {
            Some(prior) => entry.removed || prior.value != entry.value || prior.removed,
            None => !entry.removed,
        });
        self.0.len() != before
    }
}

impl FromIterator<(String, DataSetEntry)> for DataSet {
    fn from_iter<T: IntoIterator<Item = (String, DataSetEntry)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a DataSet {
    type Item = (&'a String, &'a DataSetEntry);
    type IntoIter = btree_map::Iter<'a, String, DataSetEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl std::fmt::Display for DataSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (key, entry) in &self.0 {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            if entry.removed {
                write!(f, "{key}")?;
            } else {
                write!(f, "{key}={}", entry.value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, i64)]) -> DataSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), DataSetEntry::new(Value::Integer(*v))))
            .collect()
    }

    #[test]
    fn merge_overrides_removes_and_preserves() {
        let stored = set(&[("a", 1), ("b", 2), ("c", 3), ("d", 4)]);

        let mut incoming = set(&[("e", 6)]);
        incoming.insert("a", DataSetEntry::removed());
        incoming.insert("c", DataSetEntry::removed());

        let merged = stored.merged_with(&incoming);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.value("b"), Some(&Value::Integer(2)));
        assert_eq!(merged.value("d"), Some(&Value::Integer(4)));
        assert_eq!(merged.value("e"), Some(&Value::Integer(6)));
        assert!(!merged.contains_key("a"));
        assert!(!merged.contains_key("c"));
    }

    #[test]
    fn merge_override_wins() {
        let stored = set(&[("a", 1), ("b", 2)]);
        let incoming = set(&[("a", 8)]);

        let merged = stored.merged_with(&incoming);
        assert_eq!(merged.value("a"), Some(&Value::Integer(8)));
        assert_eq!(merged.value("b"), Some(&Value::Integer(2)));
    }

    #[test]
    fn retain_changes_drops_unchanged() {
        let previous = set(&[("a", 1), ("b", 2), ("c", 3)]);

        let mut incoming = set(&[("a", 1), ("b", 5), ("d", 7)]);
        assert!(incoming.retain_changes(&previous));
        assert_eq!(incoming.len(), 2);
        assert!(!incoming.contains_key("a"));
        assert_eq!(incoming.value("b"), Some(&Value::Integer(5)));
        assert_eq!(incoming.value("d"), Some(&Value::Integer(7)));
    }

    #[test]
    fn retain_changes_keeps_removals_of_known_keys() {
        let previous = set(&[("a", 1)]);

        let mut incoming = DataSet::new();
        incoming.insert("a", DataSetEntry::removed());
        incoming.insert("x", DataSetEntry::removed());

        incoming.retain_changes(&previous);
        assert!(incoming.contains_key("a"));
        // removing a key the set never had is a no-op, not a change
        assert!(!incoming.contains_key("x"));
    }
}
