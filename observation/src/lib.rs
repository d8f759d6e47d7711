//! The observation value model.
//!
//! An [`Observation`] is an immutable record binding a [`DataItem`] handle to
//! a timestamp, a sequence number (assigned exactly once by the sink), and a
//! category-shaped [`Payload`]. Observations are shared by `Arc` once they
//! reach the store; every mutation below produces a new record.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod condition;
mod data_set;

pub use condition::{Condition, Level};
pub use data_set::{DataSet, DataSetEntry};

use agent_time::Time;
use data_types::DataItem;
use std::sync::Arc;

/// A scalar or nested value as reported by an adapter.
///
/// Numeric typing follows the wire text: a token that parses fully as an
/// integer is integer-typed, one that parses fully as a float is
/// double-typed, anything else stays text (`1Bch` is text, not `1`).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Double(f64),
    Text(String),
    /// Table cells: a row is a data set whose values are data sets.
    DataSet(DataSet),
}

impl Value {
    /// Types a raw token per the wire rules above.
    pub fn from_token(s: &str) -> Self {
        if let Ok(i) = s.parse::<i64>() {
            return Self::Integer(i);
        }
        if let Ok(d) = s.parse::<f64>() {
            if d.is_finite() {
                return Self::Double(d);
            }
        }
        Self::Text(s.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::DataSet(ds) => write!(f, "{{{ds}}}"),
        }
    }
}

/// A waveform sample block: `count|rate|v1 v2 …` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeseries {
    pub sample_count: usize,
    pub sample_rate: Option<f64>,
    pub samples: Vec<f64>,
}

/// A legacy alarm event: `CODE|NATIVECODE|SEVERITY|STATE|description`.
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub code: String,
    pub native_code: String,
    pub severity: String,
    pub state: String,
    pub text: String,
}

/// Fired when an asset changes or is removed; mirrors the asset store.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetEvent {
    pub asset_id: String,
    pub asset_type: String,
    pub hash: Option<String>,
}

/// The category-shaped payload of an observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The data item has no known value (`UNAVAILABLE` on the wire).
    Unavailable,
    Sample(Value),
    Event(Value),
    Timeseries(Timeseries),
    /// Data-set and table observations; the data item's representation
    /// distinguishes the two.
    DataSet(DataSet),
    Condition(Condition),
    Message {
        native_code: Option<String>,
        text: String,
    },
    Alarm(Alarm),
    AssetEvent(AssetEvent),
}

/// A single typed measurement or event. Immutable after construction; the
/// sink stamps the sequence on its way into the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    data_item: Arc<DataItem>,
    timestamp: Time,
    duration: Option<f64>,
    sequence: u64,
    reset_triggered: Option<String>,
    payload: Payload,
}

impl Observation {
    pub fn new(data_item: Arc<DataItem>, payload: Payload, timestamp: Time) -> Self {
        Self {
            data_item,
            timestamp,
            duration: None,
            sequence: 0,
            reset_triggered: None,
            payload,
        }
    }

    pub fn unavailable(data_item: Arc<DataItem>, timestamp: Time) -> Self {
        Self::new(data_item, Payload::Unavailable, timestamp)
    }

    /// Statistical duration carried on a `TIME@DURATION` adapter timestamp.
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_reset_triggered(mut self, trigger: impl Into<String>) -> Self {
        self.reset_triggered = Some(trigger.into());
        self
    }

    /// Stamps the committed sequence. Called exactly once, by the sink.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Rebinds the payload, keeping every other field. Used by the
    /// checkpoint when merging data sets and rewriting condition chains.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn data_item(&self) -> &Arc<DataItem> {
        &self.data_item
    }

    pub fn data_item_id(&self) -> &str {
        self.data_item.id()
    }

    pub fn timestamp(&self) -> Time {
        self.timestamp
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// The committed sequence; zero until the sink has accepted it.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn reset_triggered(&self) -> Option<&str> {
        self.reset_triggered.as_deref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn is_unavailable(&self) -> bool {
        match &self.payload {
            Payload::Unavailable => true,
            Payload::Condition(c) => c.level == Level::Unavailable,
            _ => false,
        }
    }

    pub fn is_orphaned(&self) -> bool {
        self.data_item.is_orphaned()
    }

    pub fn condition(&self) -> Option<&Condition> {
        match &self.payload {
            Payload::Condition(c) => Some(c),
            _ => None,
        }
    }

    pub fn data_set(&self) -> Option<&DataSet> {
        match &self.payload {
            Payload::DataSet(ds) => Some(ds),
            _ => None,
        }
    }

    /// The scalar value, for sample/event observations.
    pub fn value(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Sample(v) | Payload::Event(v) => Some(v),
            _ => None,
        }
    }
}
