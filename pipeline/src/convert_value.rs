//! Applies unit conversion to numeric values, for adapters configured with
//! `conversion_required`.

use crate::{Entity, PipelineContext, Transform, Transformed};
use observation::{Observation, Payload, Timeseries, Value};

/// Maps native-unit numeric values into reported units using the data
/// item's linear conversion. Values stored downstream are always in
/// reported units.
#[derive(Debug, Default)]
pub struct ConvertValue;

impl ConvertValue {
    pub const NAME: &'static str = "ConvertValue";

    pub fn new() -> Self {
        Self
    }
}

impl Transform for ConvertValue {
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
        Transformed::Forward(Entity::Observations(
            observations.into_iter().map(convert).collect(),
        ))
    }
}

fn convert(observation: Observation) -> Observation {
    let Some(conversion) = observation.data_item().conversion() else {
        return observation;
    };
    let is_sample = observation.data_item().is_sample();

    let converted = match observation.payload() {
        Payload::Sample(value) | Payload::Event(value) => value.as_f64().map(|raw| {
            let value = Value::Double(conversion.convert(raw));
            if is_sample {
                Payload::Sample(value)
            } else {
                Payload::Event(value)
            }
        }),
        Payload::Timeseries(series) => Some(Payload::Timeseries(Timeseries {
            sample_count: series.sample_count,
            sample_rate: series.sample_rate,
            samples: series
                .samples
                .iter()
                .map(|sample| conversion.convert(*sample))
                .collect(),
        })),
        _ => None,
    };

    match converted {
        Some(payload) => observation.with_payload(payload),
        None => observation,
    }
}
