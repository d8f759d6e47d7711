//! Wait/signal plumbing for streaming clients.
//!
//! A [`ChangeObserver`] registers with a [`ChangeSignaler`] (held by the
//! sink) and blocks, with a timeout, until a sequence is posted. The
//! earliest unobserved sequence is retained across multiple signals so a
//! slow client resumes from the right place. Closing the signaler wakes
//! every observer; their subsequent waits return immediately.

use observability_deps::tracing::trace;
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Sentinel for "no sequence posted yet".
const UNSIGNALED: u64 = u64::MAX;

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A sequence was posted; the value is the earliest unobserved one.
    Signaled(u64),
    TimedOut,
    /// The signaler shut down; no more signals will arrive.
    Closed,
}

#[derive(Debug, Default)]
struct ObserverState {
    sequence: Mutex<SignalState>,
    condition: Condvar,
}

#[derive(Debug)]
struct SignalState {
    sequence: u64,
    closed: bool,
}

impl Default for SignalState {
    fn default() -> Self {
        Self {
            sequence: UNSIGNALED,
            closed: false,
        }
    }
}

/// The waiting half. One per streaming client.
#[derive(Debug, Default)]
pub struct ChangeObserver {
    state: Arc<ObserverState>,
}

impl ChangeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until a sequence is posted, the signaler closes, or `timeout`
    /// elapses. Returns immediately when a signal is already pending.
    pub fn wait_for(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.sequence.lock();

        loop {
            if state.closed {
                return WaitOutcome::Closed;
            }
            if state.sequence != UNSIGNALED {
                return WaitOutcome::Signaled(state.sequence);
            }
            if self
                .state
                .condition
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return if state.closed {
                    WaitOutcome::Closed
                } else if state.sequence != UNSIGNALED {
                    WaitOutcome::Signaled(state.sequence)
                } else {
                    WaitOutcome::TimedOut
                };
            }
        }
    }

    /// The earliest unobserved sequence, if one was posted.
    pub fn sequence(&self) -> Option<u64> {
        let state = self.state.sequence.lock();
        (state.sequence != UNSIGNALED).then_some(state.sequence)
    }

    pub fn was_signaled(&self) -> bool {
        self.state.sequence.lock().sequence != UNSIGNALED
    }

    /// Consumes the pending signal so the next wait blocks again.
    pub fn reset(&self) {
        self.state.sequence.lock().sequence = UNSIGNALED;
    }

    fn signal(&self, sequence: u64) {
        let mut state = self.state.sequence.lock();
        // keep the earliest unobserved sequence
        if sequence != 0 && state.sequence > sequence {
            state.sequence = sequence;
        }
        self.state.condition.notify_all();
    }

    fn close(&self) {
        self.state.sequence.lock().closed = true;
        self.state.condition.notify_all();
    }

    fn state(&self) -> Weak<ObserverState> {
        Arc::downgrade(&self.state)
    }
}

/// The signaling half, held by whoever commits sequences.
#[derive(Debug, Default)]
pub struct ChangeSignaler {
    observers: Mutex<Vec<Weak<ObserverState>>>,
}

impl ChangeSignaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&self, observer: &ChangeObserver) {
        self.observers.lock().push(observer.state());
    }

    pub fn remove_observer(&self, observer: &ChangeObserver) -> bool {
        let target = observer.state();
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|o| !o.ptr_eq(&target) && o.strong_count() > 0);
        observers.len() != before
    }

    pub fn has_observer(&self, observer: &ChangeObserver) -> bool {
        let target = observer.state();
        self.observers.lock().iter().any(|o| o.ptr_eq(&target))
    }

    /// Posts `sequence` to every live observer, pruning the dead ones.
    pub fn signal_observers(&self, sequence: u64) {
        let mut observers = self.observers.lock();
        observers.retain(|weak| match weak.upgrade() {
            Some(state) => {
                ChangeObserver { state }.signal(sequence);
                true
            }
            None => false,
        });
        trace!(sequence, observers = observers.len(), "signaled observers");
    }

    /// Wakes everyone with the shutdown sentinel.
    pub fn close(&self) {
        let observers = std::mem::take(&mut *self.observers.lock());
        for weak in observers {
            if let Some(state) = weak.upgrade() {
                ChangeObserver { state }.close();
            }
        }
    }
}

impl Drop for ChangeSignaler {
    fn drop(&mut self) {
        self.close();
    }
}
