//! Configuration recognized by the data plane. Loading these from a
//! configuration file or the command line happens elsewhere.

use std::time::Duration;

/// Agent-wide options. Defaults follow common fielded agents.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// `k` such that the observation buffer holds `2^k` slots.
    pub buffer_size_exp: u8,
    /// Sequences between periodic checkpoints.
    pub checkpoint_frequency: usize,
    /// Asset store capacity.
    pub max_assets: usize,
    /// Enable the duplicate filter on adapter pipelines.
    pub filter_duplicates: bool,
    /// Use ingest time instead of adapter timestamps.
    pub ignore_timestamps: bool,
    /// Upcase string event values.
    pub upcase_data_item_value: bool,
    /// Apply unit conversion on adapter pipelines.
    pub conversion_required: bool,
    /// Keep the configured device uuid when an adapter republishes one.
    pub preserve_uuid: bool,
    /// Adapter reconnect interval, passed through to transports.
    pub reconnect_interval: Duration,
    /// Mark a silent adapter's data items UNAVAILABLE after this long.
    pub legacy_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            buffer_size_exp: 17,
            checkpoint_frequency: 1000,
            max_assets: 1024,
            filter_duplicates: false,
            ignore_timestamps: false,
            upcase_data_item_value: true,
            conversion_required: true,
            preserve_uuid: true,
            reconnect_interval: Duration::from_secs(10),
            legacy_timeout: Duration::from_secs(600),
        }
    }
}

impl AgentConfig {
    pub(crate) fn adapter_options(&self) -> pipeline::AdapterOptions {
        pipeline::AdapterOptions {
            ignore_timestamps: self.ignore_timestamps,
            upcase_values: self.upcase_data_item_value,
            conversion_required: self.conversion_required,
            filter_duplicates: self.filter_duplicates,
        }
    }
}
