//! Condition payloads and the per-data-item condition chain.
//!
//! The chain is a persistent singly linked list: each condition observation
//! may point at the previous condition for the same data item via a shared
//! `Arc`. Modifications clone the prefix down to the affected entry and share
//! the unchanged tail, so older chain heads held by the buffer or by query
//! results in flight are never disturbed.

use crate::{Observation, Payload};
use std::sync::Arc;

/// Severity level of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Normal,
    Warning,
    Fault,
    Unavailable,
}

impl Level {
    /// Case-insensitive wire form; anything unrecognized is unavailable.
    pub fn from_token(s: &str) -> Self {
        if s.eq_ignore_ascii_case("normal") {
            Self::Normal
        } else if s.eq_ignore_ascii_case("warning") {
            Self::Warning
        } else if s.eq_ignore_ascii_case("fault") {
            Self::Fault
        } else {
            Self::Unavailable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Warning => "Warning",
            Self::Fault => "Fault",
            Self::Unavailable => "Unavailable",
        }
    }
}

/// A condition payload: level, native code/severity/qualifier, description
/// text, and the back-link forming the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub level: Level,
    pub native_code: Option<String>,
    pub native_severity: Option<String>,
    pub qualifier: Option<String>,
    pub text: Option<String>,
    prev: Option<Arc<Observation>>,
}

impl Condition {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            native_code: None,
            native_severity: None,
            qualifier: None,
            text: None,
            prev: None,
        }
    }

    /// A NORMAL with no code, clearing every active condition.
    pub fn normal() -> Self {
        Self::new(Level::Normal)
    }

    pub fn unavailable() -> Self {
        Self::new(Level::Unavailable)
    }

    pub fn with_native_code(mut self, code: impl Into<String>) -> Self {
        let code = code.into();
        if !code.is_empty() {
            self.native_code = Some(code);
        }
        self
    }

    pub fn with_native_severity(mut self, severity: impl Into<String>) -> Self {
        self.native_severity = Some(severity.into());
        self
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn code(&self) -> Option<&str> {
        self.native_code.as_deref()
    }

    pub fn prev(&self) -> Option<&Arc<Observation>> {
        self.prev.as_ref()
    }

    pub fn is_normal(&self) -> bool {
        self.level == Level::Normal
    }

    pub fn is_unavailable(&self) -> bool {
        self.level == Level::Unavailable
    }
}

impl Observation {
    /// Chains this observation onto `prev`, making it the new head.
    pub fn chained_to(mut self, prev: Option<Arc<Self>>) -> Self {
        if let Payload::Condition(c) = &mut self.payload {
            c.prev = prev;
        }
        self
    }

    /// The active conditions in this chain, oldest first.
    pub fn condition_list(self: &Arc<Self>) -> Vec<Arc<Self>> {
        let mut list = Vec::new();
        collect(self, &mut list);
        list
    }

    /// Number of entries in the chain, this observation included.
    pub fn chain_len(self: &Arc<Self>) -> usize {
        let mut len = 0;
        let mut cursor = Some(self);
        while let Some(obs) = cursor {
            len += 1;
            cursor = obs.condition().and_then(|c| c.prev());
        }
        len
    }

    /// Whether any entry in the chain carries `code` as its native code.
    pub fn chain_contains_code(self: &Arc<Self>, code: &str) -> bool {
        let mut cursor = Some(self);
        while let Some(obs) = cursor {
            let Some(condition) = obs.condition() else {
                return false;
            };
            if condition.code() == Some(code) {
                return true;
            }
            cursor = condition.prev();
        }
        false
    }

    /// Removes the first entry whose native code equals `code`.
    ///
    /// Returns `None` when no entry matches; otherwise the new head, which is
    /// `None` when the removed entry was the only one. The prefix above the
    /// removed entry is copied, the tail below it is shared.
    pub fn chain_remove(self: &Arc<Self>, code: &str) -> Option<Option<Arc<Self>>> {
        let condition = self.condition()?;
        if condition.code() == Some(code) {
            return Some(condition.prev.clone());
        }

        let tail = condition.prev()?.chain_remove(code)?;
        let copy = (**self).clone().chained_to(tail);
        Some(Some(Arc::new(copy)))
    }

    /// Replaces the entry whose native code matches `incoming`'s, keeping its
    /// position in the chain. Returns `None` when no entry matches.
    pub fn chain_replace(self: &Arc<Self>, incoming: &Self) -> Option<Arc<Self>> {
        let code = incoming.condition()?.code()?;
        let condition = self.condition()?;

        if condition.code() == Some(code) {
            let replacement = incoming.clone().chained_to(condition.prev.clone());
            return Some(Arc::new(replacement));
        }

        let tail = condition.prev()?.chain_replace(incoming)?;
        let copy = (**self).clone().chained_to(Some(tail));
        Some(Arc::new(copy))
    }
}

fn collect(obs: &Arc<Observation>, list: &mut Vec<Arc<Observation>>) {
    if let Some(prev) = obs.condition().and_then(|c| c.prev()) {
        collect(prev, list);
    }
    list.push(Arc::clone(obs));
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_time::Time;
    use data_types::{Category, DataItem, Representation};

    fn item() -> Arc<DataItem> {
        Arc::new(DataItem::new(
            "c1",
            "LOAD",
            Category::Condition,
            Representation::Value,
        ))
    }

    fn warning(code: &str) -> Observation {
        Observation::new(
            item(),
            Payload::Condition(
                Condition::new(Level::Warning)
                    .with_native_code(code)
                    .with_qualifier("HIGH")
                    .with_text("Over..."),
            ),
            Time::from_timestamp_millis(0),
        )
    }

    fn chain(codes: &[&str]) -> Arc<Observation> {
        let mut head: Option<Arc<Observation>> = None;
        for code in codes {
            head = Some(Arc::new(warning(code).chained_to(head)));
        }
        head.unwrap()
    }

    #[test]
    fn list_is_oldest_first() {
        let head = chain(&["CODE1", "CODE2", "CODE3"]);
        let codes: Vec<_> = head
            .condition_list()
            .iter()
            .map(|o| o.condition().unwrap().code().unwrap().to_string())
            .collect();
        assert_eq!(codes, ["CODE1", "CODE2", "CODE3"]);
        assert_eq!(head.chain_len(), 3);
    }

    #[test]
    fn remove_head_returns_tail() {
        let head = chain(&["CODE1", "CODE2"]);
        let new_head = head.chain_remove("CODE2").unwrap().unwrap();
        assert_eq!(new_head.chain_len(), 1);
        assert_eq!(new_head.condition().unwrap().code(), Some("CODE1"));
    }

    #[test]
    fn remove_shares_the_unchanged_tail() {
        let head = chain(&["CODE1", "CODE2", "CODE3"]);
        let new_head = head.chain_remove("CODE2").unwrap().unwrap();

        // old chain is untouched
        assert_eq!(head.chain_len(), 3);
        assert_eq!(new_head.chain_len(), 2);

        // the tail below the removed entry is the same allocation
        let old_tail = head
            .condition_list()
            .first()
            .map(Arc::clone)
            .unwrap();
        let new_tail = new_head
            .condition_list()
            .first()
            .map(Arc::clone)
            .unwrap();
        assert!(Arc::ptr_eq(&old_tail, &new_tail));
    }

    #[test]
    fn remove_only_entry_empties_chain() {
        let head = chain(&["CODE1"]);
        assert_eq!(head.chain_remove("CODE1").unwrap(), None);
    }

    #[test]
    fn remove_missing_code_is_none() {
        let head = chain(&["CODE1"]);
        assert!(head.chain_remove("CODE9").is_none());
    }

    #[test]
    fn replace_preserves_order() {
        let head = chain(&["CODE1", "CODE2", "CODE3"]);
        let incoming = warning("CODE2").with_sequence(99);

        let new_head = head.chain_replace(&incoming).unwrap();
        let codes: Vec<_> = new_head
            .condition_list()
            .iter()
            .map(|o| o.condition().unwrap().code().unwrap().to_string())
            .collect();
        assert_eq!(codes, ["CODE1", "CODE2", "CODE3"]);

        let replaced = &new_head.condition_list()[1];
        assert_eq!(replaced.sequence(), 99);
    }

    #[test]
    fn contains_code_walks_the_chain() {
        let head = chain(&["CODE1", "CODE2"]);
        assert!(head.chain_contains_code("CODE1"));
        assert!(head.chain_contains_code("CODE2"));
        assert!(!head.chain_contains_code("CODE3"));
    }
}
