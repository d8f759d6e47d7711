//! The agent: owns the buffer, the asset store, the signaler registry, and
//! one pipeline per source, all initialized at start and dropped at stop.

use crate::{config::AgentConfig, sink::AgentSink};
use agent_time::{Time, TimeProvider};
use asset_store::AssetStore;
use data_types::{DataItem, Device, DeviceModel};
use hashbrown::HashMap;
use observability_deps::tracing::{debug, info, warn};
use observation::{Condition, Observation, Payload};
use observation_store::{ChangeObserver, ChangeSignaler, CircularBuffer};
use parking_lot::Mutex;
use pipeline::{ObservationSink, Pipeline, PipelineContext, PipelineContract};
use std::sync::Arc;

/// Connection state of an adapter, observed on the agent's own device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Listening,
    Established,
    Closed,
}

impl ConnectionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Listening => "LISTENING",
            Self::Established => "ESTABLISHED",
            Self::Closed => "CLOSED",
        }
    }
}

#[derive(Debug)]
struct SourceState {
    device_name: String,
    last_heard: Time,
    /// Set once the source's items were marked unavailable, until it is
    /// heard from again.
    stale: bool,
}

/// Resolves data items for the pipelines out of the device model.
#[derive(Debug)]
struct ModelContract {
    model: Arc<DeviceModel>,
}

impl PipelineContract for ModelContract {
    fn data_item(&self, key: &str) -> Option<Arc<DataItem>> {
        self.model.data_item(key)
    }

    fn default_device_uuid(&self) -> Option<String> {
        self.model.devices().first().map(|d| d.uuid())
    }
}

/// The assembled data plane.
#[derive(Debug)]
pub struct Agent {
    config: AgentConfig,
    instance_id: u64,
    model: Arc<DeviceModel>,
    time_provider: Arc<dyn TimeProvider>,
    buffer: Arc<CircularBuffer>,
    assets: Arc<AssetStore>,
    signaler: Arc<ChangeSignaler>,
    sink: Arc<AgentSink>,
    /// Pipeline for agent-generated observations (connection status,
    /// availability sweeps).
    loopback: Pipeline,
    sources: Mutex<HashMap<String, SourceState>>,
}

impl Agent {
    /// Builds the data plane around an already-built device model. The
    /// instance id is the start time in seconds; clients use it to detect
    /// restarts.
    pub fn new(
        config: AgentConfig,
        model: Arc<DeviceModel>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Arc<Self> {
        let buffer = Arc::new(CircularBuffer::new(
            config.buffer_size_exp,
            config.checkpoint_frequency,
        ));
        let assets = Arc::new(AssetStore::new(
            config.max_assets,
            Arc::clone(&time_provider),
        ));
        let signaler = Arc::new(ChangeSignaler::new());

        let contract: Arc<dyn PipelineContract> = Arc::new(ModelContract {
            model: Arc::clone(&model),
        });
        let find_by_type = |type_name: &str| {
            model
                .data_items()
                .into_iter()
                .find(|item| item.type_name() == type_name)
        };
        let sink = Arc::new(AgentSink::new(
            Arc::clone(&buffer),
            Arc::clone(&assets),
            Arc::clone(&signaler),
            Arc::clone(&time_provider),
            contract.default_device_uuid(),
            find_by_type("ASSET_CHANGED"),
            find_by_type("ASSET_REMOVED"),
            find_by_type("ASSET_COUNT"),
        ));

        // the loopback carries agent-generated lines; no filters, adapter
        // timestamps honored
        let loopback = pipeline::standard_pipeline(
            PipelineContext::new(Arc::clone(&contract), Arc::clone(&time_provider)),
            pipeline::AdapterOptions::default(),
            Arc::<AgentSink>::clone(&sink) as _,
        );

        let instance_id = time_provider.now().timestamp() as u64;
        info!(instance_id, "agent data plane started");

        Arc::new(Self {
            config,
            instance_id,
            model,
            time_provider,
            buffer,
            assets,
            signaler,
            sink,
            loopback,
            sources: Mutex::new(HashMap::new()),
        })
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<DeviceModel> {
        &self.model
    }

    pub(crate) fn buffer(&self) -> &Arc<CircularBuffer> {
        &self.buffer
    }

    pub(crate) fn asset_store(&self) -> &Arc<AssetStore> {
        &self.assets
    }

    /// Registers an adapter feeding the named device, building its
    /// pipeline from the agent options.
    pub fn add_adapter(self: &Arc<Self>, name: impl Into<String>, device_name: &str) -> Adapter {
        let name = name.into();
        self.sources.lock().insert(
            name.clone(),
            SourceState {
                device_name: device_name.to_string(),
                last_heard: self.time_provider.now(),
                stale: false,
            },
        );

        let contract: Arc<dyn PipelineContract> = Arc::new(ModelContract {
            model: Arc::clone(&self.model),
        });
        let pipeline = pipeline::standard_pipeline(
            PipelineContext::new(contract, Arc::clone(&self.time_provider)),
            self.config.adapter_options(),
            Arc::<AgentSink>::clone(&self.sink) as _,
        );

        debug!(adapter = name.as_str(), device = device_name, "adapter added");
        Adapter {
            agent: Arc::clone(self),
            name,
            pipeline,
        }
    }

    /// A new observer registered with the sink's signaler.
    pub fn observer(&self) -> ChangeObserver {
        let observer = ChangeObserver::new();
        self.signaler.add_observer(&observer);
        observer
    }

    /// Feeds one agent-generated SHDR line through the loopback pipeline.
    pub fn loopback_line(&self, line: &str) {
        let _ = self.loopback.run(pipeline::Entity::line(line));
    }

    /// Marks every data item of `device` UNAVAILABLE, skipping those that
    /// already are.
    pub fn make_device_unavailable(&self, device: &Arc<Device>) {
        let latest = self.buffer.latest(None);
        let now = self.time_provider.now();

        let mut pending = Vec::new();
        for item in device.data_items() {
            let already = latest
                .observation(item.id())
                .map_or(false, |o| o.is_unavailable());
            if already {
                continue;
            }
            pending.push(if item.is_condition() {
                Observation::new(item, Payload::Condition(Condition::unavailable()), now)
            } else {
                Observation::unavailable(item, now)
            });
        }
        if pending.is_empty() {
            return;
        }

        info!(
            device = device.name(),
            count = pending.len(),
            "marking data items unavailable"
        );
        if let Err(error) = self.sink.accept_observations(pending) {
            warn!(%error, "failed to mark device unavailable");
        }
    }

    /// Shuts the data plane down: cancels every waiting observer. Further
    /// ingest is the callers' responsibility to stop.
    pub fn stop(&self) {
        self.signaler.close();
        info!("agent data plane stopped");
    }

    fn heard_from(&self, source: &str) {
        if let Some(state) = self.sources.lock().get_mut(source) {
            state.last_heard = self.time_provider.now();
            state.stale = false;
        }
    }

    fn connection_status(&self, source: &str, status: ConnectionStatus) {
        // the agent device models one connection status item per adapter,
        // named after the source
        let key = format!("{source}_connection_status");
        if self.model.data_item(&key).is_some() {
            let timestamp = self.time_provider.now().to_rfc3339();
            self.loopback_line(&format!("{timestamp}|{key}|{}", status.as_str()));
        } else {
            debug!(source, "no connection status data item");
        }

        if status == ConnectionStatus::Closed {
            let device_name = self
                .sources
                .lock()
                .get(source)
                .map(|s| s.device_name.clone());
            if let Some(device) = device_name.and_then(|name| self.model.device_by_name(&name)) {
                self.make_device_unavailable(&device);
            }
        }
    }

    /// Marks devices of sources silent for longer than `legacy_timeout`
    /// unavailable. Returns the number of sources that went stale.
    pub fn sweep_stale_sources(&self) -> usize {
        let now = self.time_provider.now();
        let timeout = self.config.legacy_timeout;

        let expired: Vec<(String, String)> = {
            let mut sources = self.sources.lock();
            sources
                .iter_mut()
                .filter(|(_, state)| {
                    !state.stale
                        && now
                            .checked_duration_since(state.last_heard)
                            .map_or(false, |silent| silent >= timeout)
                })
                .map(|(name, state)| {
                    state.stale = true;
                    (name.clone(), state.device_name.clone())
                })
                .collect()
        };

        for (source, device_name) in &expired {
            warn!(source = source.as_str(), "source silent past the legacy timeout");
            if let Some(device) = self.model.device_by_name(device_name) {
                self.make_device_unavailable(&device);
            }
        }
        expired.len()
    }
}

/// The agent-side handle for one adapter: its pipeline plus liveness
/// bookkeeping. Transports call [`process_line`](Self::process_line) for
/// every line they read.
#[derive(Debug)]
pub struct Adapter {
    agent: Arc<Agent>,
    name: String,
    pipeline: Pipeline,
}

impl Adapter {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs one adapter line through the pipeline.
    pub fn process_line(&self, line: &str) {
        self.agent.heard_from(&self.name);
        let _ = self.pipeline.run(pipeline::Entity::line(line));
    }

    /// Reports transport state; a close marks the device's items
    /// unavailable.
    pub fn set_connection_status(&self, status: ConnectionStatus) {
        if status == ConnectionStatus::Established {
            self.agent.heard_from(&self.name);
        }
        self.agent.connection_status(&self.name, status);
    }

    /// Adopts a device uuid republished by the adapter, unless the agent
    /// preserves configured uuids.
    pub fn update_device_uuid(&self, uuid: &str) {
        if self.agent.config.preserve_uuid {
            debug!(adapter = self.name.as_str(), uuid, "preserving configured uuid");
            return;
        }
        let device_name = {
            let sources = self.agent.sources.lock();
            sources.get(&self.name).map(|s| s.device_name.clone())
        };
        if let Some(device) = device_name.and_then(|name| self.agent.model.device_by_name(&name)) {
            device.set_uuid(uuid);
        }
    }

    /// For editing the adapter's pipeline while the adapter is quiesced.
    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }
}
