//! Shared state the transforms draw on.

use agent_time::TimeProvider;
use data_types::DataItem;
use std::fmt::Debug;
use std::sync::Arc;

/// What the pipeline needs from its owner: data-item resolution and the
/// device the adapter feeds. The agent implements this over its device
/// model.
pub trait PipelineContract: Send + Sync + Debug {
    /// Resolves the `DATAITEM` field of a line, by id or name.
    fn data_item(&self, key: &str) -> Option<Arc<DataItem>>;

    /// The uuid assets without an explicit device belong to.
    fn default_device_uuid(&self) -> Option<String>;
}

/// Per-pipeline shared context handed to every transform invocation.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub contract: Arc<dyn PipelineContract>,
    pub time_provider: Arc<dyn TimeProvider>,
}

impl PipelineContext {
    pub fn new(contract: Arc<dyn PipelineContract>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            contract,
            time_provider,
        }
    }
}

/// Adapter-level options selecting which optional transforms a standard
/// pipeline carries and how timestamps are treated.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdapterOptions {
    /// Substitute the ingest time for adapter timestamps.
    pub ignore_timestamps: bool,
    /// Upcase string event values.
    pub upcase_values: bool,
    /// Apply unit conversion to numeric values.
    pub conversion_required: bool,
    /// Drop observations whose value repeats the previous one.
    pub filter_duplicates: bool,
}
