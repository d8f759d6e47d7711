//! The entities that flow between transforms.

use agent_time::Time;
use observation::Observation;
use shdr::ShdrTimestamp;

/// A block of `|`-separated fields from one adapter line, with the
/// timestamp field split off. [`ExtractTimestamp`](crate::ExtractTimestamp)
/// fills `timestamp`; the mapper requires it.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBlock {
    pub timestamp_field: String,
    pub timestamp: Option<ShdrTimestamp>,
    pub fields: Vec<String>,
}

/// An asset operation decoded from `@ASSET@` / `@REMOVE_ASSET@` /
/// `@REMOVE_ALL_ASSETS@` lines. The document body is opaque.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetCommand {
    Upsert {
        asset_id: String,
        asset_type: String,
        timestamp: Option<Time>,
        document: String,
    },
    Remove {
        asset_id: String,
        timestamp: Option<Time>,
    },
    RemoveAll {
        asset_type: String,
        timestamp: Option<Time>,
    },
}

/// What a transform receives and produces.
#[derive(Debug, Clone)]
pub enum Entity {
    /// A raw adapter line.
    Line(String),
    /// A tokenized line.
    Tokens(TokenBlock),
    /// Observations mapped from one line, not yet committed.
    Observations(Vec<Observation>),
    /// An asset operation for the asset store.
    Asset(AssetCommand),
}

impl Entity {
    pub fn line(line: impl Into<String>) -> Self {
        Self::Line(line.into())
    }

    pub fn observations(&self) -> Option<&[Observation]> {
        match self {
            Self::Observations(observations) => Some(observations),
            _ => None,
        }
    }
}
