//! Shared device-model handles consumed by the agent data plane.
//!
//! The store never builds or mutates the device model; it borrows immutable
//! [`DataItem`] handles for classification (category, representation, units)
//! and follows a weak link back to the owning [`Component`] to detect
//! observations whose component has been torn down.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use hashbrown::HashMap;
use parking_lot::RwLock;
use snafu::Snafu;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Errors raised while assembling device-model handles.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("unknown data item category: {}", category))]
    UnknownCategory { category: String },

    #[snafu(display("unknown data item representation: {}", representation))]
    UnknownRepresentation { representation: String },

    #[snafu(display("duplicate data item id: {}", id))]
    DuplicateDataItem { id: String },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The set of data-item ids a query is restricted to.
pub type FilterSet = BTreeSet<String>;

/// Category of a data item, mirroring the MTConnect information model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Sample,
    Event,
    Condition,
}

impl std::str::FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SAMPLE" => Ok(Self::Sample),
            "EVENT" => Ok(Self::Event),
            "CONDITION" => Ok(Self::Condition),
            _ => UnknownCategorySnafu { category: s }.fail(),
        }
    }
}

/// How the values of a data item are shaped on the wire and in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Representation {
    Value,
    TimeSeries,
    DataSet,
    Table,
    Discrete,
}

impl std::str::FromStr for Representation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "VALUE" => Ok(Self::Value),
            "TIME_SERIES" => Ok(Self::TimeSeries),
            "DATA_SET" => Ok(Self::DataSet),
            "TABLE" => Ok(Self::Table),
            "DISCRETE" => Ok(Self::Discrete),
            _ => UnknownRepresentationSnafu { representation: s }.fail(),
        }
    }
}

/// Linear unit conversion from native units to reported units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub factor: f64,
    pub offset: f64,
}

impl Conversion {
    pub fn new(factor: f64, offset: f64) -> Self {
        Self { factor, offset }
    }

    pub fn convert(&self, value: f64) -> f64 {
        value * self.factor + self.offset
    }
}

/// Filter configuration limiting which observations of a data item are kept.
///
/// Either constraint alone suppresses an observation: a value within
/// `minimum_delta` of the last reported value, or one arriving within
/// `minimum_period` of it, is dropped by the delta filter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FilterConfig {
    pub minimum_delta: Option<f64>,
    pub minimum_period: Option<Duration>,
}

impl FilterConfig {
    pub fn is_filtered(&self) -> bool {
        self.minimum_delta.is_some() || self.minimum_period.is_some()
    }
}

/// An immutable descriptor identifying one stream of observations.
///
/// Handles are shared (`Arc`) between the device model, the ingest pipeline,
/// and every stored observation. The link to the owning component is weak so
/// observations never prolong component lifetime; readers skip observations
/// whose upgrade fails.
#[derive(Debug)]
pub struct DataItem {
    id: String,
    name: Option<String>,
    category: Category,
    representation: Representation,
    type_: String,
    sub_type: Option<String>,
    units: Option<String>,
    native_units: Option<String>,
    conversion: Option<Conversion>,
    filter: FilterConfig,
    initial_value: Option<String>,
    reset_trigger: Option<String>,
    /// `None` until attached to a component; a dead weak afterwards marks
    /// the data item as orphaned.
    component: RwLock<Option<Weak<Component>>>,
}

impl PartialEq for DataItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.category == other.category
            && self.representation == other.representation
            && self.type_ == other.type_
            && self.sub_type == other.sub_type
            && self.units == other.units
            && self.native_units == other.native_units
            && self.conversion == other.conversion
            && self.filter == other.filter
            && self.initial_value == other.initial_value
            && self.reset_trigger == other.reset_trigger
    }
}

impl DataItem {
    pub fn new(
        id: impl Into<String>,
        type_: impl Into<String>,
        category: Category,
        representation: Representation,
    ) -> Self {
        Self {
            id: id.into(),
            name: None,
            category,
            representation,
            type_: type_.into(),
            sub_type: None,
            units: None,
            native_units: None,
            conversion: None,
            filter: FilterConfig::default(),
            initial_value: None,
            reset_trigger: None,
            component: RwLock::new(None),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.sub_type = Some(sub_type.into());
        self
    }

    pub fn with_units(
        mut self,
        units: impl Into<String>,
        native_units: impl Into<String>,
        conversion: Option<Conversion>,
    ) -> Self {
        self.units = Some(units.into());
        self.native_units = Some(native_units.into());
        self.conversion = conversion;
        self
    }

    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_initial_value(mut self, value: impl Into<String>) -> Self {
        self.initial_value = Some(value.into());
        self
    }

    pub fn with_reset_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.reset_trigger = Some(trigger.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn representation(&self) -> Representation {
        self.representation
    }

    pub fn type_name(&self) -> &str {
        &self.type_
    }

    pub fn sub_type(&self) -> Option<&str> {
        self.sub_type.as_deref()
    }

    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    pub fn native_units(&self) -> Option<&str> {
        self.native_units.as_deref()
    }

    pub fn conversion(&self) -> Option<Conversion> {
        self.conversion
    }

    /// True when a numeric value must be mapped from native units before it
    /// is stored.
    pub fn conversion_required(&self) -> bool {
        self.conversion.is_some()
    }

    pub fn filter(&self) -> FilterConfig {
        self.filter
    }

    pub fn initial_value(&self) -> Option<&str> {
        self.initial_value.as_deref()
    }

    pub fn reset_trigger(&self) -> Option<&str> {
        self.reset_trigger.as_deref()
    }

    pub fn is_condition(&self) -> bool {
        self.category == Category::Condition
    }

    pub fn is_sample(&self) -> bool {
        self.category == Category::Sample
    }

    pub fn is_event(&self) -> bool {
        self.category == Category::Event
    }

    /// Tables are data sets whose entry values are themselves data sets.
    pub fn is_data_set(&self) -> bool {
        matches!(
            self.representation,
            Representation::DataSet | Representation::Table
        )
    }

    pub fn is_table(&self) -> bool {
        self.representation == Representation::Table
    }

    pub fn is_timeseries(&self) -> bool {
        self.representation == Representation::TimeSeries
    }

    pub fn is_discrete(&self) -> bool {
        self.representation == Representation::Discrete
    }

    pub fn is_message(&self) -> bool {
        self.type_ == "MESSAGE"
    }

    pub fn is_alarm(&self) -> bool {
        self.type_ == "ALARM"
    }

    pub fn is_asset_changed(&self) -> bool {
        self.type_ == "ASSET_CHANGED"
    }

    pub fn is_asset_removed(&self) -> bool {
        self.type_ == "ASSET_REMOVED"
    }

    /// The component this data item reports for, if it is still alive.
    pub fn component(&self) -> Option<Arc<Component>> {
        self.component.read().as_ref()?.upgrade()
    }

    /// An orphaned data item belongs to a component that has been torn down;
    /// readers skip its observations. A data item never attached to a
    /// component is standalone, not orphaned.
    pub fn is_orphaned(&self) -> bool {
        self.component
            .read()
            .as_ref()
            .map_or(false, |weak| weak.upgrade().is_none())
    }

    fn attach(&self, component: &Arc<Component>) {
        *self.component.write() = Some(Arc::downgrade(component));
    }
}

/// A structural element of a device owning a set of data items.
#[derive(Debug)]
pub struct Component {
    id: String,
    name: Option<String>,
    data_items: Vec<Arc<DataItem>>,
}

impl Component {
    /// Builds the component and points every data item's weak back-link at it.
    pub fn new(
        id: impl Into<String>,
        name: Option<String>,
        data_items: Vec<Arc<DataItem>>,
    ) -> Arc<Self> {
        let component = Arc::new(Self {
            id: id.into(),
            name,
            data_items,
        });
        for item in &component.data_items {
            item.attach(&component);
        }
        component
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn data_items(&self) -> &[Arc<DataItem>] {
        &self.data_items
    }
}

/// A device: a uuid, a name, and the components observed under it.
///
/// The uuid is interior-mutable because an adapter may republish it on
/// reconnection (suppressed by the `preserve_uuid` option).
#[derive(Debug)]
pub struct Device {
    uuid: RwLock<String>,
    name: String,
    components: RwLock<Vec<Arc<Component>>>,
}

impl Device {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            uuid: RwLock::new(uuid.into()),
            name: name.into(),
            components: RwLock::new(Vec::new()),
        })
    }

    pub fn uuid(&self) -> String {
        self.uuid.read().clone()
    }

    pub fn set_uuid(&self, uuid: impl Into<String>) {
        *self.uuid.write() = uuid.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_component(&self, component: Arc<Component>) {
        self.components.write().push(component);
    }

    /// Drops the component, orphaning its data items.
    pub fn remove_component(&self, id: &str) -> bool {
        let mut components = self.components.write();
        let before = components.len();
        components.retain(|c| c.id() != id);
        components.len() != before
    }

    pub fn components(&self) -> Vec<Arc<Component>> {
        self.components.read().clone()
    }

    pub fn data_items(&self) -> Vec<Arc<DataItem>> {
        self.components
            .read()
            .iter()
            .flat_map(|c| c.data_items().iter().cloned())
            .collect()
    }
}

/// The already-built device model the store consumes.
///
/// Provides the id/name lookup the token mapper uses to resolve the
/// `DATAITEM` field of an adapter line.
#[derive(Debug, Default)]
pub struct DeviceModel {
    devices: RwLock<Vec<Arc<Device>>>,
    by_id: RwLock<HashMap<String, Arc<DataItem>>>,
    by_name: RwLock<HashMap<String, Arc<DataItem>>>,
}

impl DeviceModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device and indexes its data items by id and name.
    pub fn add_device(&self, device: Arc<Device>) -> Result<()> {
        {
            let mut by_id = self.by_id.write();
            let mut by_name = self.by_name.write();
            for item in device.data_items() {
                if by_id.contains_key(item.id()) {
                    return DuplicateDataItemSnafu { id: item.id() }.fail();
                }
                by_id.insert(item.id().to_string(), Arc::clone(&item));
                if let Some(name) = item.name() {
                    by_name.insert(name.to_string(), Arc::clone(&item));
                }
            }
        }
        self.devices.write().push(device);
        Ok(())
    }

    /// Resolves a data item by id first, falling back to name.
    pub fn data_item(&self, key: &str) -> Option<Arc<DataItem>> {
        if let Some(item) = self.by_id.read().get(key) {
            return Some(Arc::clone(item));
        }
        self.by_name.read().get(key).map(Arc::clone)
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.read().clone()
    }

    pub fn device_by_name(&self, name: &str) -> Option<Arc<Device>> {
        self.devices
            .read()
            .iter()
            .find(|d| d.name() == name)
            .map(Arc::clone)
    }

    pub fn device_by_uuid(&self, uuid: &str) -> Option<Arc<Device>> {
        self.devices
            .read()
            .iter()
            .find(|d| d.uuid() == uuid)
            .map(Arc::clone)
    }

    /// Every data item across every device.
    pub fn data_items(&self) -> Vec<Arc<DataItem>> {
        self.by_id.read().values().map(Arc::clone).collect()
    }
}
