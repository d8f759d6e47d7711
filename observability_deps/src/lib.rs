//! Entry point for the observability dependencies of the agent.
//!
//! Every crate in this workspace takes its `tracing` through this crate so
//! the whole tree agrees on a single version and feature set.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop, clippy::use_self)]

pub use tracing;
