//! A per-data-item snapshot of the most recent observation.
//!
//! Insertion applies the semantic merge rules: condition observations are
//! folded into the per-item condition chain, data-set observations merge
//! into the accumulated set (unless a reset trigger or unavailability forces
//! a replace), and everything else replaces. Observations themselves are
//! immutable and shared; a checkpoint only ever swaps which records it
//! points at.

use data_types::FilterSet;
use observation::{Condition, Level, Observation, Payload};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    observations: BTreeMap<String, Arc<Observation>>,
    filter: Option<FilterSet>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// A checkpoint that only tracks the given data-item ids.
    pub fn with_filter(filter: FilterSet) -> Self {
        Self {
            observations: BTreeMap::new(),
            filter: Some(filter),
        }
    }

    /// Inserts or merges `observation` under its data-item id.
    pub fn add(&mut self, observation: &Arc<Observation>) {
        let id = observation.data_item_id();
        if let Some(filter) = &self.filter {
            if !filter.contains(id) {
                return;
            }
        }

        let item = observation.data_item();
        let merged = match self.observations.get(id) {
            Some(existing) if item.is_condition() => merge_condition(existing, observation),
            Some(existing) if item.is_data_set() => merge_data_set(existing, observation),
            _ => Arc::clone(observation),
        };
        self.observations.insert(id.to_string(), merged);
    }

    /// Copies this checkpoint, optionally narrowing to `filter`. When no
    /// filter is given the source's own filter carries over. Observations
    /// are shared, not cloned.
    pub fn copy(&self, filter: Option<&FilterSet>) -> Self {
        let effective = filter.or(self.filter.as_ref());
        let observations = self
            .observations
            .iter()
            .filter(|(id, _)| effective.map_or(true, |f| f.contains(*id)))
            .map(|(id, obs)| (id.clone(), Arc::clone(obs)))
            .collect();
        Self {
            observations,
            filter: filter.or(self.filter.as_ref()).cloned(),
        }
    }

    /// Narrows this checkpoint in place, dropping entries outside the set.
    /// An empty set only records the filter and drops nothing.
    pub fn filter(&mut self, filter: FilterSet) {
        if !filter.is_empty() {
            self.observations.retain(|id, _| filter.contains(id));
        }
        self.filter = Some(filter);
    }

    pub fn observation(&self, id: &str) -> Option<&Arc<Observation>> {
        self.observations.get(id)
    }

    /// The stored observations, in data-item-id order. Condition chains are
    /// unrolled oldest to newest so every active condition is reported
    /// individually. Orphaned observations are skipped.
    pub fn observations(&self, filter: Option<&FilterSet>) -> Vec<Arc<Observation>> {
        let mut list = Vec::new();
        for (id, observation) in &self.observations {
            if observation.is_orphaned() {
                continue;
            }
            if let Some(filter) = filter {
                if !filter.contains(id) {
                    continue;
                }
            }
            if observation.data_item().is_condition() {
                list.extend(observation.condition_list());
            } else {
                list.push(Arc::clone(observation));
            }
        }
        list
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Folds a condition observation into the existing chain.
fn merge_condition(existing: &Arc<Observation>, incoming: &Arc<Observation>) -> Arc<Observation> {
    let Some(incoming_condition) = incoming.condition() else {
        return Arc::clone(incoming);
    };
    let Some(existing_condition) = existing.condition() else {
        return Arc::clone(incoming);
    };

    let active = |level: Level| !matches!(level, Level::Normal | Level::Unavailable);

    if active(existing_condition.level) && active(incoming_condition.level) {
        // active-over-active: replace the entry with the same native code in
        // place, otherwise grow the chain
        if let Some(replaced) = existing.chain_replace(incoming) {
            return replaced;
        }
        return Arc::new((**incoming).clone().chained_to(Some(Arc::clone(existing))));
    }

    if incoming_condition.level == Level::Normal {
        if let Some(code) = incoming_condition.code() {
            // a coded NORMAL clears only the matching entry
            return match existing.chain_remove(code) {
                Some(Some(head)) => head,
                Some(None) => {
                    // last active condition cleared; keep a single NORMAL
                    // with no code
                    Arc::new(
                        (**incoming)
                            .clone()
                            .with_payload(Payload::Condition(Condition::normal())),
                    )
                }
                // the code was never active; leave the chain alone
                None => Arc::clone(existing),
            };
        }
    }

    // codeless NORMAL, UNAVAILABLE, or an active condition arriving over an
    // inactive chain: the incoming observation becomes the whole chain
    Arc::clone(incoming)
}

/// Folds a data-set or table observation into the accumulated set.
fn merge_data_set(existing: &Arc<Observation>, incoming: &Arc<Observation>) -> Arc<Observation> {
    if incoming.reset_triggered().is_some()
        || incoming.is_unavailable()
        || existing.is_unavailable()
    {
        return Arc::clone(incoming);
    }

    let (Some(stored), Some(update)) = (existing.data_set(), incoming.data_set()) else {
        return Arc::clone(incoming);
    };

    let merged = stored.merged_with(update);
    Arc::new((**incoming).clone().with_payload(Payload::DataSet(merged)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_time::Time;
    use data_types::{Category, Component, DataItem, Representation};
    use observation::{DataSet, DataSetEntry, Value};

    fn condition_item(id: &str) -> Arc<DataItem> {
        Arc::new(DataItem::new(
            id,
            "LOAD",
            Category::Condition,
            Representation::Value,
        ))
    }

    fn data_set_item(id: &str) -> Arc<DataItem> {
        Arc::new(DataItem::new(
            id,
            "VARIABLE",
            Category::Event,
            Representation::DataSet,
        ))
    }

    fn sample_item(id: &str) -> Arc<DataItem> {
        Arc::new(DataItem::new(
            id,
            "POSITION",
            Category::Sample,
            Representation::Value,
        ))
    }

    fn ts(millis: i64) -> Time {
        Time::from_timestamp_millis(millis)
    }

    fn warning(item: &Arc<DataItem>, code: &str) -> Arc<Observation> {
        Arc::new(Observation::new(
            Arc::clone(item),
            Payload::Condition(
                Condition::new(Level::Warning)
                    .with_native_code(code)
                    .with_qualifier("HIGH")
                    .with_text("Over..."),
            ),
            ts(0),
        ))
    }

    fn normal(item: &Arc<DataItem>, code: &str) -> Arc<Observation> {
        Arc::new(Observation::new(
            Arc::clone(item),
            Payload::Condition(Condition::new(Level::Normal).with_native_code(code)),
            ts(0),
        ))
    }

    fn sample(item: &Arc<DataItem>, value: f64) -> Arc<Observation> {
        Arc::new(Observation::new(
            Arc::clone(item),
            Payload::Sample(Value::Double(value)),
            ts(0),
        ))
    }

    fn data_set(item: &Arc<DataItem>, text: &str) -> Arc<Observation> {
        let parsed = parse_set_text(text);
        let mut obs = Observation::new(Arc::clone(item), Payload::DataSet(parsed.0), ts(0));
        if let Some(trigger) = parsed.1 {
            obs = obs.with_reset_triggered(trigger);
        }
        Arc::new(obs)
    }

    // tiny data-set text helper so these tests need no parser crate
    fn parse_set_text(text: &str) -> (DataSet, Option<String>) {
        let mut set = DataSet::new();
        let mut reset = None;
        for word in text.split_whitespace() {
            if let Some(trigger) = word.strip_prefix(':') {
                reset = Some(trigger.to_string());
            } else if let Some((k, v)) = word.split_once('=') {
                set.insert(k, DataSetEntry::new(Value::from_token(v)));
            } else {
                set.insert(word, DataSetEntry::removed());
            }
        }
        (set, reset)
    }

    #[test]
    fn scalar_replaces() {
        let item = sample_item("x1");
        let mut cp = Checkpoint::new();
        cp.add(&sample(&item, 1.0));
        cp.add(&sample(&item, 2.0));

        assert_eq!(cp.len(), 1);
        let stored = cp.observation("x1").unwrap();
        assert_eq!(stored.value(), Some(&Value::Double(2.0)));
    }

    #[test]
    fn conditions_chain_and_clear_by_code() {
        let item = condition_item("c1");
        let mut cp = Checkpoint::new();

        cp.add(&warning(&item, "CODE1"));
        cp.add(&warning(&item, "CODE2"));

        let head = cp.observation("c1").unwrap();
        assert_eq!(head.chain_len(), 2);

        // a NORMAL for CODE1 leaves only CODE2 active
        cp.add(&normal(&item, "CODE1"));
        let head = cp.observation("c1").unwrap();
        assert_eq!(head.chain_len(), 1);
        assert_eq!(head.condition().unwrap().code(), Some("CODE2"));
        assert_eq!(head.condition().unwrap().level, Level::Warning);
    }

    #[test]
    fn clearing_last_condition_leaves_codeless_normal() {
        let item = condition_item("c1");
        let mut cp = Checkpoint::new();

        cp.add(&warning(&item, "CODE1"));
        cp.add(&normal(&item, "CODE1"));

        let head = cp.observation("c1").unwrap();
        assert_eq!(head.chain_len(), 1);
        let condition = head.condition().unwrap();
        assert_eq!(condition.level, Level::Normal);
        assert_eq!(condition.code(), None);
    }

    #[test]
    fn codeless_normal_clears_everything() {
        let item = condition_item("c1");
        let mut cp = Checkpoint::new();

        cp.add(&warning(&item, "CODE1"));
        cp.add(&warning(&item, "CODE2"));
        cp.add(&Arc::new(Observation::new(
            Arc::clone(&item),
            Payload::Condition(Condition::normal()),
            ts(0),
        )));

        let head = cp.observation("c1").unwrap();
        assert_eq!(head.chain_len(), 1);
        assert!(head.condition().unwrap().is_normal());
    }

    #[test]
    fn normal_for_unknown_code_is_ignored() {
        let item = condition_item("c1");
        let mut cp = Checkpoint::new();

        cp.add(&warning(&item, "CODE1"));
        let before = Arc::clone(cp.observation("c1").unwrap());

        cp.add(&normal(&item, "CODE9"));
        let after = cp.observation("c1").unwrap();
        assert!(Arc::ptr_eq(&before, after));
    }

    #[test]
    fn repeated_code_replaces_in_place() {
        let item = condition_item("c1");
        let mut cp = Checkpoint::new();

        cp.add(&warning(&item, "CODE1"));
        cp.add(&warning(&item, "CODE2"));
        let updated = Arc::new((*warning(&item, "CODE1")).clone().with_sequence(77));
        cp.add(&updated);

        let head = cp.observation("c1").unwrap();
        assert_eq!(head.chain_len(), 2);
        let list = head.condition_list();
        assert_eq!(list[0].condition().unwrap().code(), Some("CODE1"));
        assert_eq!(list[0].sequence(), 77);
        assert_eq!(list[1].condition().unwrap().code(), Some("CODE2"));
    }

    #[test]
    fn unavailable_collapses_the_chain() {
        let item = condition_item("c1");
        let mut cp = Checkpoint::new();

        cp.add(&warning(&item, "CODE1"));
        cp.add(&Arc::new(Observation::new(
            Arc::clone(&item),
            Payload::Condition(Condition::unavailable()),
            ts(0),
        )));

        let head = cp.observation("c1").unwrap();
        assert_eq!(head.chain_len(), 1);
        assert!(head.condition().unwrap().is_unavailable());
    }

    #[test]
    fn buffered_heads_are_not_disturbed_by_later_merges() {
        let item = condition_item("c1");
        let mut cp = Checkpoint::new();

        cp.add(&warning(&item, "CODE1"));
        cp.add(&warning(&item, "CODE2"));
        let snapshot = Arc::clone(cp.observation("c1").unwrap());

        cp.add(&normal(&item, "CODE2"));

        // the earlier head still reports both conditions
        assert_eq!(snapshot.chain_len(), 2);
        assert_eq!(cp.observation("c1").unwrap().chain_len(), 1);
    }

    #[test]
    fn data_set_merge_and_removal() {
        let item = data_set_item("vars");
        let mut cp = Checkpoint::new();

        cp.add(&data_set(&item, "a=1 b=2 c=3 d=4"));
        cp.add(&data_set(&item, "c e=6 a"));

        let stored = cp.observation("vars").unwrap();
        let set = stored.data_set().unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.value("b"), Some(&Value::Integer(2)));
        assert_eq!(set.value("d"), Some(&Value::Integer(4)));
        assert_eq!(set.value("e"), Some(&Value::Integer(6)));
    }

    #[test]
    fn data_set_reset_trigger_replaces() {
        let item = data_set_item("vars");
        let mut cp = Checkpoint::new();

        cp.add(&data_set(&item, "a=1 b=2 c=3"));
        cp.add(&data_set(&item, ":MANUAL d=10"));

        let stored = cp.observation("vars").unwrap();
        assert_eq!(stored.reset_triggered(), Some("MANUAL"));
        let set = stored.data_set().unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.value("d"), Some(&Value::Integer(10)));
    }

    #[test]
    fn data_set_unavailable_replaces() {
        let item = data_set_item("vars");
        let mut cp = Checkpoint::new();

        cp.add(&data_set(&item, "a=1"));
        cp.add(&Arc::new(Observation::unavailable(Arc::clone(&item), ts(0))));
        assert!(cp.observation("vars").unwrap().is_unavailable());

        // and coming back from unavailable starts fresh
        cp.add(&data_set(&item, "b=2"));
        let set = cp.observation("vars").unwrap().data_set().unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.value("b"), Some(&Value::Integer(2)));
    }

    #[test]
    fn copy_and_filter() {
        let x1 = sample_item("x1");
        let x2 = sample_item("x2");
        let mut cp = Checkpoint::new();
        cp.add(&sample(&x1, 1.0));
        cp.add(&sample(&x2, 2.0));

        let filter: FilterSet = ["x1".to_string()].into_iter().collect();
        let narrowed = cp.copy(Some(&filter));
        assert_eq!(narrowed.len(), 1);
        assert!(narrowed.observation("x1").is_some());

        // the narrowed copy ignores out-of-filter additions
        let mut narrowed = narrowed;
        narrowed.add(&sample(&x2, 3.0));
        assert_eq!(narrowed.len(), 1);

        // in-place filtering
        cp.filter(filter);
        assert_eq!(cp.len(), 1);
    }

    #[test]
    fn copies_share_observations_but_not_state() {
        let item = data_set_item("vars");
        let mut cp = Checkpoint::new();
        cp.add(&data_set(&item, "a=1"));

        let mut copy = cp.copy(None);
        assert!(Arc::ptr_eq(
            cp.observation("vars").unwrap(),
            copy.observation("vars").unwrap()
        ));

        copy.add(&data_set(&item, "b=2"));
        assert_eq!(cp.observation("vars").unwrap().data_set().unwrap().len(), 1);
        assert_eq!(copy.observation("vars").unwrap().data_set().unwrap().len(), 2);
    }

    #[test]
    fn observations_unroll_condition_chains_oldest_first() {
        let c1 = condition_item("c1");
        let x1 = sample_item("x1");
        let mut cp = Checkpoint::new();

        cp.add(&warning(&c1, "CODE1"));
        cp.add(&warning(&c1, "CODE2"));
        cp.add(&sample(&x1, 1.0));

        let list = cp.observations(None);
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].condition().unwrap().code(), Some("CODE1"));
        assert_eq!(list[1].condition().unwrap().code(), Some("CODE2"));
        assert_eq!(list[2].data_item_id(), "x1");
    }

    #[test]
    fn orphaned_observations_are_skipped() {
        let item = Arc::new(DataItem::new(
            "x9",
            "POSITION",
            Category::Sample,
            Representation::Value,
        ));
        let component = Component::new("comp1", None, vec![Arc::clone(&item)]);

        let mut cp = Checkpoint::new();
        cp.add(&sample(&item, 1.0));
        assert_eq!(cp.observations(None).len(), 1);

        drop(component);
        assert_eq!(cp.observations(None).len(), 0);
        // the entry itself is retained, only enumeration skips it
        assert!(cp.observation("x9").is_some());
    }
}
