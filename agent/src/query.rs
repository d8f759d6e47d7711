//! The read side: snapshots, samples, and asset queries, each paired with
//! the window metadata the printers put in response headers.

use crate::Agent;
use asset_store::Asset;
use data_types::FilterSet;
use observation_store::{Checkpoint, Error, ObservationRange, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Buffer window metadata returned with every observation query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMeta {
    pub instance_id: u64,
    pub buffer_size: usize,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub next_sequence: u64,
}

/// Asset store metadata returned with every asset query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetMeta {
    pub asset_buffer_size: usize,
    pub asset_count: usize,
}

impl Agent {
    fn window(&self) -> WindowMeta {
        let buffer = self.buffer();
        WindowMeta {
            instance_id: self.instance_id(),
            buffer_size: buffer.capacity(),
            first_sequence: buffer.first_sequence(),
            last_sequence: buffer.last_sequence(),
            next_sequence: buffer.sequence(),
        }
    }

    fn asset_meta(&self) -> AssetMeta {
        let store = self.asset_store();
        AssetMeta {
            asset_buffer_size: store.max_assets(),
            asset_count: store.count(),
        }
    }

    /// The state snapshot: the latest checkpoint, or a reconstruction at
    /// `at`. Fails with [`Error::OutOfRange`] when `at` is outside the
    /// retained window.
    pub fn current(
        &self,
        filter: Option<&FilterSet>,
        at: Option<u64>,
    ) -> Result<(Checkpoint, WindowMeta)> {
        let meta = self.window();
        let checkpoint = match at {
            None => self.buffer().latest(filter),
            Some(at) => {
                if at > meta.last_sequence {
                    return Err(Error::OutOfRange {
                        sequence: at,
                        first_sequence: meta.first_sequence,
                    });
                }
                self.buffer().checkpoint_at(at, filter)?
            }
        };
        Ok((checkpoint, meta))
    }

    /// A range read from the buffer. `from` must lie inside the retained
    /// window when given.
    pub fn sample(
        &self,
        count: i64,
        from: Option<u64>,
        filter: Option<&FilterSet>,
    ) -> Result<(ObservationRange, WindowMeta)> {
        let meta = self.window();
        if let Some(from) = from {
            if from < meta.first_sequence || from > meta.next_sequence {
                return Err(Error::OutOfRange {
                    sequence: from,
                    first_sequence: meta.first_sequence,
                });
            }
        }
        Ok((self.buffer().range(count, from, filter), meta))
    }

    pub fn asset(&self, asset_id: &str) -> Option<Arc<Asset>> {
        self.asset_store().get(asset_id)
    }

    /// Every stored asset in arrival order, plus the store metadata.
    pub fn assets(&self) -> (Vec<Arc<Asset>>, AssetMeta) {
        (self.asset_store().assets(), self.asset_meta())
    }

    pub fn assets_for_device(&self, device_uuid: &str) -> (BTreeMap<String, Arc<Asset>>, AssetMeta) {
        (
            self.asset_store().assets_for_device(device_uuid),
            self.asset_meta(),
        )
    }

    pub fn assets_for_type(&self, asset_type: &str) -> (BTreeMap<String, Arc<Asset>>, AssetMeta) {
        (
            self.asset_store().assets_for_type(asset_type),
            self.asset_meta(),
        )
    }

    pub fn asset_counts_by_type(&self) -> BTreeMap<String, usize> {
        self.asset_store().counts_by_type()
    }
}
