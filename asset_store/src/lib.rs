//! Bounded in-memory asset repository.
//!
//! Assets are opaque documents keyed by asset id, indexed additionally by
//! asset type and owning device uuid, held in arrival order for eviction.
//! A sha-256 hash over the canonicalized document detects content changes:
//! re-upserting an identical document refreshes the timestamp and eviction
//! position but keeps the hash. Removal marks the asset `removed` and keeps
//! it in storage.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use agent_time::{Time, TimeProvider};
use hashbrown::HashMap;
use observability_deps::tracing::{debug, warn};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use snafu::Snafu;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Errors raised by the store.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display(
        "asset {} cannot change type from {} to {}",
        asset_id,
        stored,
        incoming
    ))]
    TypeMismatch {
        asset_id: String,
        stored: String,
        incoming: String,
    },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An asset as delivered by an adapter, before the store stamps it.
#[derive(Debug, Clone)]
pub struct ReceivedAsset {
    pub asset_id: String,
    pub asset_type: String,
    pub device_uuid: Option<String>,
    /// Assigned from the store's clock when absent.
    pub timestamp: Option<Time>,
    pub document: String,
}

/// A stored asset. Immutable; updates replace the record.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    asset_id: String,
    asset_type: String,
    device_uuid: Option<String>,
    timestamp: Time,
    removed: bool,
    document: String,
    hash: String,
}

impl Asset {
    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn asset_type(&self) -> &str {
        &self.asset_type
    }

    pub fn device_uuid(&self) -> Option<&str> {
        self.device_uuid.as_deref()
    }

    pub fn timestamp(&self) -> Time {
        self.timestamp
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// The document exactly as the source delivered it.
    pub fn document(&self) -> &str {
        &self.document
    }

    /// Content hash over the canonicalized document.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

/// The outcome of an upsert: the stored record and the version it replaced.
#[derive(Debug)]
pub struct Upsert {
    pub asset: Arc<Asset>,
    pub previous: Option<Arc<Asset>>,
}

/// Hashes a document, whitespace-insensitively: outer whitespace is trimmed
/// and every internal whitespace run collapses to a single space, so
/// formatting-only differences do not change the hash.
pub fn hash_document(document: &str) -> String {
    let mut hasher = Sha256::new();
    let mut pending_space = false;
    for token in document.split_whitespace() {
        if pending_space {
            hasher.update(b" ");
        }
        hasher.update(token.as_bytes());
        pending_space = true;
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

type IdIndex = BTreeMap<String, Arc<Asset>>;

#[derive(Debug, Default)]
struct Inner {
    /// Arrival order, oldest first; the eviction candidate is the front.
    order: Vec<String>,
    primary: HashMap<String, Arc<Asset>>,
    by_type: BTreeMap<String, IdIndex>,
    by_device: BTreeMap<String, IdIndex>,
    removed_total: usize,
    removed_by_type: BTreeMap<String, usize>,
    removed_by_device: BTreeMap<String, usize>,
}

/// The bounded repository. All operations take the single store lock.
#[derive(Debug)]
pub struct AssetStore {
    max_assets: usize,
    time_provider: Arc<dyn TimeProvider>,
    inner: Mutex<Inner>,
}

impl AssetStore {
    pub fn new(max_assets: usize, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            max_assets: max_assets.max(1),
            time_provider,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn max_assets(&self) -> usize {
        self.max_assets
    }

    /// Inserts or replaces an asset. Same-content re-upserts only refresh
    /// the timestamp and the eviction position. Fails when the incoming
    /// type differs from the stored one.
    pub fn upsert(&self, received: ReceivedAsset) -> Result<Upsert> {
        let mut inner = self.inner.lock();

        let timestamp = received
            .timestamp
            .unwrap_or_else(|| self.time_provider.now());
        let hash = hash_document(&received.document);
        let asset = Arc::new(Asset {
            asset_id: received.asset_id,
            asset_type: received.asset_type,
            device_uuid: received.device_uuid,
            timestamp,
            removed: false,
            document: received.document,
            hash,
        });

        match inner.primary.get(asset.asset_id()).map(Arc::clone) {
            Some(previous) => {
                if previous.asset_type() != asset.asset_type() {
                    return TypeMismatchSnafu {
                        asset_id: asset.asset_id(),
                        stored: previous.asset_type(),
                        incoming: asset.asset_type(),
                    }
                    .fail();
                }
                if previous.hash() == asset.hash() {
                    debug!(asset_id = asset.asset_id(), "asset content unchanged");
                }
                inner.update(asset, &previous);
                Ok(Upsert {
                    asset: Arc::clone(inner.primary.get(previous.asset_id()).unwrap()),
                    previous: Some(previous),
                })
            }
            None => {
                inner.insert(Arc::clone(&asset));
                if inner.order.len() > self.max_assets {
                    let evicted = inner.evict_oldest();
                    if let Some(evicted) = evicted {
                        debug!(
                            asset_id = evicted.asset_id(),
                            "asset buffer overflow, evicted oldest"
                        );
                    }
                }
                Ok(Upsert {
                    asset,
                    previous: None,
                })
            }
        }
    }

    /// Marks the asset removed, keeping it in storage. Returns the removed
    /// record to be mirrored as an `ASSET_REMOVED` event, or `None` when
    /// the asset is absent or already removed.
    pub fn remove(&self, asset_id: &str, timestamp: Option<Time>) -> Option<Arc<Asset>> {
        let mut inner = self.inner.lock();

        let previous = inner.primary.get(asset_id).map(Arc::clone)?;
        if previous.is_removed() {
            warn!(asset_id, "remove of an already removed asset ignored");
            return None;
        }

        let mut removed = (*previous).clone();
        removed.removed = true;
        removed.timestamp = timestamp.unwrap_or_else(|| self.time_provider.now());
        let removed = Arc::new(removed);

        inner.update(Arc::clone(&removed), &previous);
        Some(removed)
    }

    /// Marks every non-removed asset of `asset_type` removed, oldest first.
    pub fn remove_all_by_type(&self, asset_type: &str, timestamp: Option<Time>) -> Vec<Arc<Asset>> {
        let ids: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .by_type
                .get(asset_type)
                .map(|index| {
                    inner
                        .order
                        .iter()
                        .filter(|id| {
                            index
                                .get(*id)
                                .map_or(false, |asset| !asset.is_removed())
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        ids.iter()
            .filter_map(|id| self.remove(id, timestamp))
            .collect()
    }

    pub fn get(&self, asset_id: &str) -> Option<Arc<Asset>> {
        self.inner.lock().primary.get(asset_id).map(Arc::clone)
    }

    /// Snapshot of the assets for one device, keyed by asset id.
    pub fn assets_for_device(&self, device_uuid: &str) -> IdIndex {
        self.inner
            .lock()
            .by_device
            .get(device_uuid)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of the assets of one type, keyed by asset id.
    pub fn assets_for_type(&self, asset_type: &str) -> IdIndex {
        self.inner
            .lock()
            .by_type
            .get(asset_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Every stored asset in arrival order, removed ones included.
    pub fn assets(&self) -> Vec<Arc<Asset>> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.primary.get(id).map(Arc::clone))
            .collect()
    }

    /// Active (non-removed) assets per type.
    pub fn counts_by_type(&self) -> BTreeMap<String, usize> {
        let inner = self.inner.lock();
        inner
            .by_type
            .iter()
            .map(|(asset_type, index)| {
                let removed = inner
                    .removed_by_type
                    .get(asset_type)
                    .copied()
                    .unwrap_or_default();
                (asset_type.clone(), index.len() - removed)
            })
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// Number of active (non-removed) assets.
    pub fn count(&self) -> usize {
        let inner = self.inner.lock();
        inner.primary.len() - inner.removed_total
    }

    /// Number of stored assets, removed ones included.
    pub fn total_count(&self) -> usize {
        self.inner.lock().primary.len()
    }

    pub fn removed_count(&self) -> usize {
        self.inner.lock().removed_total
    }

    pub fn removed_count_for_type(&self, asset_type: &str) -> usize {
        self.inner
            .lock()
            .removed_by_type
            .get(asset_type)
            .copied()
            .unwrap_or_default()
    }

    pub fn removed_count_for_device(&self, device_uuid: &str) -> usize {
        self.inner
            .lock()
            .removed_by_device
            .get(device_uuid)
            .copied()
            .unwrap_or_default()
    }
}

impl Inner {
    fn insert(&mut self, asset: Arc<Asset>) {
        let id = asset.asset_id().to_string();
        self.order.push(id.clone());
        self.index(&asset);
        self.primary.insert(id, asset);
    }

    /// Replaces a stored asset, maintaining indexes, counts, and ordering.
    fn update(&mut self, asset: Arc<Asset>, previous: &Arc<Asset>) {
        let id = asset.asset_id().to_string();

        // a live replacement moves to the back of the eviction order; a
        // removal keeps its position
        if !asset.is_removed() {
            self.order.retain(|entry| entry != &id);
            self.order.push(id.clone());
        }

        // device moves leave the old bucket
        if let Some(old_device) = previous.device_uuid() {
            if previous.device_uuid() != asset.device_uuid() {
                if let Some(bucket) = self.by_device.get_mut(old_device) {
                    bucket.remove(&id);
                }
            }
        }

        if previous.is_removed() {
            self.adjust_removed_counts(previous, -1);
        }
        if asset.is_removed() {
            self.adjust_removed_counts(&asset, 1);
        }

        self.index(&asset);
        self.primary.insert(id, asset);
    }

    fn index(&mut self, asset: &Arc<Asset>) {
        let id = asset.asset_id().to_string();
        self.by_type
            .entry(asset.asset_type().to_string())
            .or_default()
            .insert(id.clone(), Arc::clone(asset));
        if let Some(device) = asset.device_uuid() {
            self.by_device
                .entry(device.to_string())
                .or_default()
                .insert(id, Arc::clone(asset));
        }
    }

    fn evict_oldest(&mut self) -> Option<Arc<Asset>> {
        if self.order.is_empty() {
            return None;
        }
        let id = self.order.remove(0);
        let evicted = self.primary.remove(&id)?;

        if let Some(bucket) = self.by_type.get_mut(evicted.asset_type()) {
            bucket.remove(&id);
            if bucket.is_empty() {
                self.by_type.remove(evicted.asset_type());
            }
        }
        if let Some(device) = evicted.device_uuid() {
            if let Some(bucket) = self.by_device.get_mut(device) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    self.by_device.remove(device);
                }
            }
        }
        if evicted.is_removed() {
            self.adjust_removed_counts(&evicted, -1);
        }

        Some(evicted)
    }

    fn adjust_removed_counts(&mut self, asset: &Arc<Asset>, delta: isize) {
        let apply = |count: &mut usize| {
            *count = count.saturating_add_signed(delta);
        };
        apply(&mut self.removed_total);
        apply(
            self.removed_by_type
                .entry(asset.asset_type().to_string())
                .or_default(),
        );
        if let Some(device) = asset.device_uuid() {
            apply(
                self.removed_by_device
                    .entry(device.to_string())
                    .or_default(),
            );
        }
    }
}
