//! Suppresses numeric observations inside a data item's configured
//! minimum-delta / minimum-period band.

use crate::{Entity, PipelineContext, Transform, Transformed};
use agent_time::Time;
use hashbrown::HashMap;
use observation::Observation;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct LastReported {
    value: f64,
    timestamp: Time,
}

/// Applies the per-data-item filter configuration: an observation within
/// `minimum_delta` of the last reported value, or arriving within
/// `minimum_period` of it, is dropped. Either constraint alone suppresses.
/// Only numeric sample values participate.
#[derive(Debug, Default)]
pub struct DeltaFilter {
    state: Mutex<HashMap<String, LastReported>>,
}

impl DeltaFilter {
    pub const NAME: &'static str = "DeltaFilter";

    pub fn new() -> Self {
        Self::default()
    }

    fn suppress(&self, observation: &Observation) -> bool {
        let item = observation.data_item();
        let filter = item.filter();
        if !filter.is_filtered() {
            return false;
        }
        let Some(value) = observation.value().and_then(|v| v.as_f64()) else {
            // unavailability and non-numeric values always get through, but
            // reset the band so the next numeric value is reported
            self.state.lock().remove(item.id());
            return false;
        };

        let mut state = self.state.lock();
        let last = state.get(item.id()).copied();

        if let Some(last) = last {
            if let Some(minimum_delta) = filter.minimum_delta {
                if (value - last.value).abs() < minimum_delta {
                    return true;
                }
            }
            if let Some(minimum_period) = filter.minimum_period {
                let elapsed = observation
                    .timestamp()
                    .checked_duration_since(last.timestamp);
                if elapsed.map_or(true, |elapsed| elapsed < minimum_period) {
                    return true;
                }
            }
        }

        state.insert(
            item.id().to_string(),
            LastReported {
                value,
                timestamp: observation.timestamp(),
            },
        );
        false
    }
}

impl Transform for DeltaFilter {
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
            .filter(|observation| !self.suppress(observation))
            .collect();

        if kept.is_empty() {
            return Transformed::Consumed;
        }
        Transformed::Forward(Entity::Observations(kept))
    }
}
