//! Drops observations whose value repeats the previous one for the same
//! data item, for adapters configured with `filter_duplicates`.

use crate::{Entity, PipelineContext, Transform, Transformed};
use hashbrown::HashMap;
use observation::{DataSet, Observation, Payload, Value};
use parking_lot::Mutex;

/// Last-seen state per data item.
#[derive(Debug, Clone)]
enum LastValue {
    Unavailable,
    Scalar(Value),
    /// Accumulated data-set state, mirroring the checkpoint's merge.
    Set(DataSet),
}

/// Suppresses exact repeats. Data-set observations are reduced to the
/// entries that actually changed against the accumulated set and dropped
/// when nothing did. Conditions, messages, alarms, asset events, and
/// discrete items always pass.
#[derive(Debug, Default)]
pub struct DuplicateFilter {
    state: Mutex<HashMap<String, LastValue>>,
}

impl DuplicateFilter {
    pub const NAME: &'static str = "DuplicateFilter";

    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the observation to forward, reduced where applicable.
    fn filter(&self, observation: Observation) -> Option<Observation> {
        let item = observation.data_item();
        if item.is_condition()
            || item.is_message()
            || item.is_alarm()
            || item.is_asset_changed()
            || item.is_asset_removed()
            || item.is_discrete()
        {
            return Some(observation);
        }

        let mut state = self.state.lock();
        let id = observation.data_item_id().to_string();

        if observation.is_unavailable() {
            return match state.insert(id, LastValue::Unavailable) {
                Some(LastValue::Unavailable) => None,
                _ => Some(observation),
            };
        }

        match observation.payload() {
            Payload::Sample(value) | Payload::Event(value) => {
                let duplicate = matches!(
                    state.get(&id),
                    Some(LastValue::Scalar(last)) if last == value
                );
                if duplicate {
                    return None;
                }
                state.insert(id, LastValue::Scalar(value.clone()));
                Some(observation)
            }
            Payload::DataSet(incoming) => {
                if observation.reset_triggered().is_some() {
                    state.insert(id, LastValue::Set(incoming.clone()));
                    return Some(observation);
                }
                match state.get(&id) {
                    Some(LastValue::Set(accumulated)) => {
                        let mut delta = incoming.clone();
                        delta.retain_changes(accumulated);
                        if delta.is_empty() {
                            return None;
                        }
                        let merged = accumulated.merged_with(&delta);
                        state.insert(id, LastValue::Set(merged));
                        Some(observation.with_payload(Payload::DataSet(delta)))
                    }
                    _ => {
                        state.insert(id, LastValue::Set(incoming.clone()));
                        Some(observation)
                    }
                }
            }
            _ => Some(observation),
        }
    }
}

impl Transform for DuplicateFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn guard(&self, entity: &Entity) -> bool {
        matches!(entity, Entity::Observations(_))
    }

    fn process(&self, entity: Entity, _context: &PipelineContext) -> Transformed {
        let Entity::Observations(observations) = entity else {
            unreachable!("guard admits only observations");
        };

        let kept: Vec<_> = observations
            .into_iter()
            .filter_map(|observation| self.filter(observation))
            .collect();

        if kept.is_empty() {
            return Transformed::Consumed;
        }
        Transformed::Forward(Entity::Observations(kept))
    }
}
