//! The ordered transform chain and its editing operations.

use crate::{Entity, PipelineContext, Transform, Transformed};
use observability_deps::tracing::trace;
use std::sync::Arc;

/// An ordered chain of named transforms.
///
/// Built once at adapter start; the splice operations exist for the control
/// plane to reshape a quiesced pipeline (and for tests).
#[derive(Debug)]
pub struct Pipeline {
    context: PipelineContext,
    transforms: Vec<Arc<dyn Transform>>,
}

impl Pipeline {
    pub fn new(context: PipelineContext) -> Self {
        Self {
            context,
            transforms: Vec::new(),
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Appends a transform at the end of the chain.
    pub fn bind(&mut self, transform: Arc<dyn Transform>) -> &mut Self {
        self.transforms.push(transform);
        self
    }

    /// Inserts `transform` immediately before the transform named `name`.
    pub fn splice_before(&mut self, name: &str, transform: Arc<dyn Transform>) -> bool {
        match self.position(name) {
            Some(index) => {
                self.transforms.insert(index, transform);
                true
            }
            None => false,
        }
    }

    /// Inserts `transform` immediately after the transform named `name`.
    pub fn splice_after(&mut self, name: &str, transform: Arc<dyn Transform>) -> bool {
        match self.position(name) {
            Some(index) => {
                self.transforms.insert(index + 1, transform);
                true
            }
            None => false,
        }
    }

    /// Replaces the entire tail after `name` with `transform`.
    pub fn first_after(&mut self, name: &str, transform: Arc<dyn Transform>) -> bool {
        match self.position(name) {
            Some(index) => {
                self.transforms.truncate(index + 1);
                self.transforms.push(transform);
                true
            }
            None => false,
        }
    }

    /// Appends `transform` after the existing tail following `name`.
    pub fn last_after(&mut self, name: &str, transform: Arc<dyn Transform>) -> bool {
        match self.position(name) {
            Some(_) => {
                self.transforms.push(transform);
                true
            }
            None => false,
        }
    }

    pub fn transform_names(&self) -> Vec<&str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    /// Runs an entity through the chain. Guard-rejected stages are skipped;
    /// a [`Transformed::Complete`] stops the walk with that entity; a
    /// [`Transformed::Consumed`] ends it with nothing.
    pub fn run(&self, entity: Entity) -> Option<Entity> {
        let mut current = entity;
        for transform in &self.transforms {
            if !transform.guard(&current) {
                trace!(transform = transform.name(), "guard rejected, forwarding");
                continue;
            }
            match transform.process(current, &self.context) {
                Transformed::Forward(next) => current = next,
                Transformed::Complete(result) => return Some(result),
                Transformed::Consumed => return None,
            }
        }
        Some(current)
    }

    /// Convenience entry point for one adapter line.
    pub fn process_line(&self, line: &str) -> Option<Entity> {
        self.run(Entity::line(line))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.transforms.iter().position(|t| t.name() == name)
    }
}
