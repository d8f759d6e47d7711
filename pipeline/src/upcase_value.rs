//! Upcases string event values, for adapters configured with
//! `upcase_data_item_value`.

use crate::{Entity, PipelineContext, Transform, Transformed};
use observation::{Payload, Value};

#[derive(Debug, Default)]
pub struct UpcaseValue;

impl UpcaseValue {
    pub const NAME: &'static str = "UpcaseValue";

    pub fn new() -> Self {
        Self
    }
}

impl Transform for UpcaseValue {
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

        let observations = observations
            .into_iter()
            .map(|observation| match observation.payload() {
                Payload::Event(Value::Text(text)) => {
                    let upper = text.to_uppercase();
                    observation.with_payload(Payload::Event(Value::Text(upper)))
                }
                _ => observation,
            })
            .collect();

        Transformed::Forward(Entity::Observations(observations))
    }
}
