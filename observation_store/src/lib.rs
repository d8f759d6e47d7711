//! The in-memory observation store.
//!
//! Observations committed by the sink land in a sequence-numbered
//! [`CircularBuffer`]; a continuously maintained latest [`Checkpoint`],
//! a "first" checkpoint tracking the oldest retained sequence, and periodic
//! checkpoints taken every `checkpoint_freq` slots let queries reconstruct
//! the state at any retained sequence by a short replay instead of a full
//! scan. [`ChangeObserver`]s let streaming clients block until the sequence
//! advances.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod change_observer;
mod checkpoint;
mod circular_buffer;

pub use change_observer::{ChangeObserver, ChangeSignaler, WaitOutcome};
pub use checkpoint::Checkpoint;
pub use circular_buffer::{CircularBuffer, ObservationRange};

use snafu::Snafu;

/// Errors surfaced to query callers.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display(
        "sequence {} is before the first buffered sequence {}",
        sequence,
        first_sequence
    ))]
    OutOfRange { sequence: u64, first_sequence: u64 },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;
