//! Terminal stage: hands observations and asset commands to the sink.

use crate::{AssetCommand, Entity, PipelineContext, Transform, Transformed};
use observability_deps::tracing::warn;
use observation::Observation;
use std::fmt::Debug;
use std::sync::Arc;

/// Boxed error from a sink implementation.
#[derive(Debug, thiserror::Error)]
#[error("sink rejected delivery: {inner}")]
pub struct SinkError {
    inner: Box<dyn std::error::Error + Send + Sync>,
}

impl SinkError {
    pub fn new(inner: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            inner: inner.into(),
        }
    }

    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync) {
        self.inner.as_ref()
    }
}

/// Where the pipeline ends: the agent's sink commits observations to the
/// buffer (assigning sequences and firing change signalers) and routes
/// asset commands to the asset store. Implementations return after the
/// state is updated; the pipeline never blocks on anything downstream.
pub trait ObservationSink: Send + Sync + Debug {
    /// Commits the observations of one line, in order. Returns the last
    /// assigned sequence.
    fn accept_observations(&self, observations: Vec<Observation>) -> Result<u64, SinkError>;

    /// Applies an asset command to the asset store.
    fn accept_asset(&self, command: AssetCommand) -> Result<(), SinkError>;
}

/// The standard terminal transform. Delivery failures are contained here:
/// logged, and the entity is dropped.
#[derive(Debug)]
pub struct DeliverObservation {
    sink: Arc<dyn ObservationSink>,
}

impl DeliverObservation {
    pub const NAME: &'static str = "DeliverObservation";

    pub fn new(sink: Arc<dyn ObservationSink>) -> Self {
        Self { sink }
    }
}

impl Transform for DeliverObservation {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn guard(&self, entity: &Entity) -> bool {
        matches!(entity, Entity::Observations(_) | Entity::Asset(_))
    }

    fn process(&self, entity: Entity, _context: &PipelineContext) -> Transformed {
        match entity {
            Entity::Observations(observations) => {
                if let Err(error) = self.sink.accept_observations(observations) {
                    warn!(%error, "observation delivery failed");
                }
            }
            Entity::Asset(command) => {
                if let Err(error) = self.sink.accept_asset(command) {
                    warn!(%error, "asset delivery failed");
                }
            }
            other => {
                warn!(?other, "deliverer cannot handle entity");
            }
        }
        Transformed::Consumed
    }
}
