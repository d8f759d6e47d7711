//! The sequence-numbered ring of committed observations.
//!
//! Capacity is `2^k` slots; an observation with sequence `s` lives in slot
//! `(s - 1) % capacity` until the window slides past it. Alongside the ring
//! the buffer maintains the "latest" checkpoint, the "first" checkpoint
//! (state as of the oldest retained sequence), and a periodic checkpoint
//! every `checkpoint_freq` slots so [`checkpoint_at`](CircularBuffer::checkpoint_at)
//! replays at most `checkpoint_freq` observations.

use crate::{Checkpoint, Error, Result};
use data_types::FilterSet;
use observation::Observation;
use parking_lot::Mutex;
use std::sync::Arc;

/// The result of a windowed range read.
#[derive(Debug)]
pub struct ObservationRange {
    pub observations: Vec<Arc<Observation>>,
    /// First sequence the walk did not visit; the `from` for a follow-up.
    pub next_sequence: u64,
    /// First sequence retained in the buffer at read time.
    pub first_sequence: u64,
    /// True when the walk hit the window boundary.
    pub end_of_buffer: bool,
}

#[derive(Debug)]
pub struct CircularBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    checkpoint_freq: usize,
}

#[derive(Debug)]
struct Inner {
    /// Next sequence to assign; sequences start at 1.
    next_sequence: u64,
    slots: Vec<Option<Arc<Observation>>>,
    latest: Checkpoint,
    first: Checkpoint,
    periodic: Vec<Option<PeriodicCheckpoint>>,
}

/// A copy of the latest checkpoint taken when `base` was committed; equals
/// a replay of sequences `1..=base`.
#[derive(Debug)]
struct PeriodicCheckpoint {
    base: u64,
    checkpoint: Checkpoint,
}

impl CircularBuffer {
    /// `size_exp` is `k` such that capacity is `2^k`; `checkpoint_freq` is
    /// the slot distance between periodic checkpoints.
    pub fn new(size_exp: u8, checkpoint_freq: usize) -> Self {
        let capacity = 1usize << size_exp;
        let checkpoint_freq = checkpoint_freq.max(1);
        let checkpoint_count = capacity / checkpoint_freq + 1;

        Self {
            inner: Mutex::new(Inner {
                next_sequence: 1,
                slots: vec![None; capacity],
                latest: Checkpoint::new(),
                first: Checkpoint::new(),
                periodic: std::iter::repeat_with(|| None).take(checkpoint_count).collect(),
            }),
            capacity,
            checkpoint_freq,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn checkpoint_freq(&self) -> usize {
        self.checkpoint_freq
    }

    /// Next sequence to be assigned.
    pub fn sequence(&self) -> u64 {
        self.inner.lock().next_sequence
    }

    /// Oldest retained sequence.
    pub fn first_sequence(&self) -> u64 {
        first_sequence(self.inner.lock().next_sequence, self.capacity)
    }

    /// Newest committed sequence; zero when nothing was committed yet.
    pub fn last_sequence(&self) -> u64 {
        self.inner.lock().next_sequence - 1
    }

    /// Commits an observation: assigns the next sequence, writes the slot,
    /// folds it into the latest checkpoint, and maintains the first and
    /// periodic checkpoints. Returns the shared committed record.
    pub fn push(&self, observation: Observation) -> (u64, Arc<Observation>) {
        let mut inner = self.inner.lock();

        let sequence = inner.next_sequence;
        let observation = Arc::new(observation.with_sequence(sequence));

        let index = ((sequence - 1) % self.capacity as u64) as usize;
        inner.slots[index] = Some(Arc::clone(&observation));
        inner.latest.add(&observation);

        // prime the first checkpoint with the very first event
        if sequence == 1 {
            inner.first.add(&observation);
        }

        if index % self.checkpoint_freq == 0 {
            let snapshot = inner.latest.copy(None);
            inner.periodic[index / self.checkpoint_freq] = Some(PeriodicCheckpoint {
                base: sequence,
                checkpoint: snapshot,
            });
        }

        inner.next_sequence += 1;

        // the slot the next sequence will overwrite holds the observation at
        // the new oldest retained sequence; fold it into the first
        // checkpoint so "first" stays the state as of first_sequence()
        let next_index = ((inner.next_sequence - 1) % self.capacity as u64) as usize;
        if let Some(oldest) = inner.slots[next_index].as_ref().map(Arc::clone) {
            inner.first.add(&oldest);
        }

        (sequence, observation)
    }

    /// O(1) slot read; `None` outside the retained window.
    pub fn get_at(&self, sequence: u64) -> Option<Arc<Observation>> {
        let inner = self.inner.lock();
        if sequence >= inner.next_sequence
            || sequence < first_sequence(inner.next_sequence, self.capacity)
        {
            return None;
        }
        inner.slots[((sequence - 1) % self.capacity as u64) as usize]
            .as_ref()
            .map(Arc::clone)
    }

    /// A copy of the continuously maintained latest checkpoint.
    pub fn latest(&self, filter: Option<&FilterSet>) -> Checkpoint {
        self.inner.lock().latest.copy(filter)
    }

    /// Reconstructs the checkpoint as of `at`: copy the nearest retained
    /// checkpoint at or before it (a periodic one, or "first" right after
    /// eviction started), then replay the buffered observations up to `at`.
    pub fn checkpoint_at(&self, at: u64, filter: Option<&FilterSet>) -> Result<Checkpoint> {
        let inner = self.inner.lock();
        let first_seq = first_sequence(inner.next_sequence, self.capacity);

        if at < first_seq {
            return Err(Error::OutOfRange {
                sequence: at,
                first_sequence: first_seq,
            });
        }
        // reads past the window replay everything committed so far
        let at = at.min(inner.next_sequence - 1);

        // the "first" checkpoint already includes the observation at
        // first_seq; a periodic checkpoint with a later usable base wins
        let mut base = first_seq;
        let mut reference = &inner.first;
        for periodic in inner.periodic.iter().flatten() {
            if periodic.base <= at && periodic.base > base && periodic.base + 1 >= first_seq {
                base = periodic.base;
                reference = &periodic.checkpoint;
            }
        }

        let mut checkpoint = reference.copy(filter);
        for sequence in (base + 1)..=at {
            if let Some(observation) =
                inner.slots[((sequence - 1) % self.capacity as u64) as usize].as_ref()
            {
                checkpoint.add(observation);
            }
        }

        Ok(checkpoint)
    }

    /// Walks up to `|count|` observations from `from` (forward for positive
    /// counts, backward for negative), keeping those whose data-item id
    /// passes `filter` and skipping orphans.
    pub fn range(
        &self,
        count: i64,
        from: Option<u64>,
        filter: Option<&FilterSet>,
    ) -> ObservationRange {
        let inner = self.inner.lock();
        let next = inner.next_sequence;
        let first_seq = first_sequence(next, self.capacity);

        let (start, limit, step) = if count >= 0 {
            let start = match from {
                Some(s) if s > first_seq => s,
                _ => first_seq,
            };
            (start as i64, count as usize, 1i64)
        } else {
            let start = match from {
                Some(s) if s < next => s,
                _ => next - 1,
            };
            (start as i64, (-count) as usize, -1i64)
        };

        let mut observations = Vec::new();
        let mut i = start;
        while observations.len() < limit && i < next as i64 && i >= first_seq as i64 {
            let slot = inner.slots[((i as u64 - 1) % self.capacity as u64) as usize].as_ref();
            if let Some(observation) = slot {
                if !observation.is_orphaned()
                    && filter.map_or(true, |f| f.contains(observation.data_item_id()))
                {
                    observations.push(Arc::clone(observation));
                }
            }
            i += step;
        }

        let end_of_buffer = if count >= 0 {
            i >= next as i64
        } else {
            i <= first_seq as i64
        };

        ObservationRange {
            observations,
            next_sequence: i.max(0) as u64,
            first_sequence: first_seq,
            end_of_buffer,
        }
    }
}

fn first_sequence(next_sequence: u64, capacity: usize) -> u64 {
    if next_sequence > capacity as u64 {
        next_sequence - capacity as u64
    } else {
        1
    }
}
