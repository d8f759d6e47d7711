//! The terminal sink behind every pipeline: commits observations to the
//! buffer, fires change signalers, and mirrors asset commands into the
//! asset store and back out as asset events.

use agent_time::TimeProvider;
use asset_store::{Asset, AssetStore, ReceivedAsset};
use data_types::DataItem;
use observability_deps::tracing::{debug, warn};
use observation::{AssetEvent, DataSet, DataSetEntry, Observation, Payload, Value};
use observation_store::{ChangeSignaler, CircularBuffer};
use parking_lot::Mutex;
use pipeline::{AssetCommand, ObservationSink, SinkError};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct AgentSink {
    buffer: Arc<CircularBuffer>,
    assets: Arc<AssetStore>,
    signaler: Arc<ChangeSignaler>,
    time_provider: Arc<dyn TimeProvider>,
    default_device_uuid: Option<String>,
    /// Data items the asset events are observed on, when the model has
    /// them.
    asset_changed: Option<Arc<DataItem>>,
    asset_removed: Option<Arc<DataItem>>,
    asset_count: Option<Arc<DataItem>>,
    /// Asset types present in the last published count set, so a type
    /// dropping to zero publishes a removal marker.
    counted_types: Mutex<BTreeSet<String>>,
}

impl AgentSink {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        buffer: Arc<CircularBuffer>,
        assets: Arc<AssetStore>,
        signaler: Arc<ChangeSignaler>,
        time_provider: Arc<dyn TimeProvider>,
        default_device_uuid: Option<String>,
        asset_changed: Option<Arc<DataItem>>,
        asset_removed: Option<Arc<DataItem>>,
        asset_count: Option<Arc<DataItem>>,
    ) -> Self {
        Self {
            buffer,
            assets,
            signaler,
            time_provider,
            default_device_uuid,
            asset_changed,
            asset_removed,
            asset_count,
            counted_types: Mutex::new(BTreeSet::new()),
        }
    }

    fn commit(&self, observation: Observation) -> u64 {
        let (sequence, _) = self.buffer.push(observation);
        self.signaler.signal_observers(sequence);
        sequence
    }

    fn emit_asset_event(&self, item: &Option<Arc<DataItem>>, asset: &Asset) {
        let Some(item) = item else {
            debug!(
                asset_id = asset.asset_id(),
                "no data item for the asset event"
            );
            return;
        };
        let observation = Observation::new(
            Arc::clone(item),
            Payload::AssetEvent(AssetEvent {
                asset_id: asset.asset_id().to_string(),
                asset_type: asset.asset_type().to_string(),
                hash: Some(asset.hash().to_string()),
            }),
            asset.timestamp(),
        );
        self.commit(observation);
    }

    /// Publishes the per-type active asset counts as a data set, with
    /// removal markers for types that emptied out.
    fn publish_asset_counts(&self) {
        let Some(item) = &self.asset_count else {
            return;
        };

        let counts = self.assets.counts_by_type();
        let mut counted = self.counted_types.lock();

        let mut set = DataSet::new();
        for (asset_type, count) in &counts {
            set.insert(
                asset_type.clone(),
                DataSetEntry::new(Value::Integer(*count as i64)),
            );
        }
        for gone in counted.iter().filter(|t| !counts.contains_key(*t)) {
            set.insert(gone.clone(), DataSetEntry::removed());
        }
        *counted = counts.keys().cloned().collect();

        let observation = Observation::new(
            Arc::clone(item),
            Payload::DataSet(set),
            self.time_provider.now(),
        );
        self.commit(observation);
    }
}

impl ObservationSink for AgentSink {
    fn accept_observations(&self, observations: Vec<Observation>) -> Result<u64, SinkError> {
        let mut last = 0;
        for observation in observations {
            last = self.commit(observation);
        }
        Ok(last)
    }

    fn accept_asset(&self, command: AssetCommand) -> Result<(), SinkError> {
        match command {
            AssetCommand::Upsert {
                asset_id,
                asset_type,
                timestamp,
                document,
            } => {
                let upsert = self
                    .assets
                    .upsert(ReceivedAsset {
                        asset_id,
                        asset_type,
                        device_uuid: self.default_device_uuid.clone(),
                        timestamp,
                        document,
                    })
                    .map_err(SinkError::new)?;
                self.emit_asset_event(&self.asset_changed, &upsert.asset);
                self.publish_asset_counts();
            }
            AssetCommand::Remove {
                asset_id,
                timestamp,
            } => match self.assets.remove(&asset_id, timestamp) {
                Some(removed) => {
                    self.emit_asset_event(&self.asset_removed, &removed);
                    self.publish_asset_counts();
                }
                None => {
                    warn!(
                        asset_id = asset_id.as_str(),
                        "remove of unknown or removed asset ignored"
                    );
                }
            },
            AssetCommand::RemoveAll {
                asset_type,
                timestamp,
            } => {
                let removed = self.assets.remove_all_by_type(&asset_type, timestamp);
                for asset in &removed {
                    self.emit_asset_event(&self.asset_removed, asset);
                }
                if !removed.is_empty() {
                    self.publish_asset_counts();
                }
            }
        }
        Ok(())
    }
}
