//! The transform trait and its forwarding contract.

use crate::{Entity, PipelineContext};
use std::fmt::Debug;

/// What a transform did with an entity.
#[derive(Debug)]
pub enum Transformed {
    /// Hand the entity to the next transform in the chain.
    Forward(Entity),
    /// Stop here; this entity is the pipeline's result.
    Complete(Entity),
    /// The entity was consumed (delivered, filtered out, or dropped on
    /// error); nothing flows further.
    Consumed,
}

/// One named stage of the ingest pipeline.
///
/// Names are stable and unique within a pipeline; the splice operations
/// address stages by them. A transform whose [`guard`](Transform::guard)
/// rejects an entity never sees it; the pipeline forwards the entity to the
/// successor unchanged.
pub trait Transform: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Which entity shapes this transform accepts.
    fn guard(&self, entity: &Entity) -> bool;

    fn process(&self, entity: Entity, context: &PipelineContext) -> Transformed;
}
