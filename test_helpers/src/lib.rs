//! Helpers shared by the workspace's unit tests.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop, clippy::use_self)]

use observability_deps::tracing;
use parking_lot::Once;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, EnvFilter};

static LOG_SETUP: Once = Once::new();

/// Enables debug logging if the `RUST_LOG` environment variable is set.
/// Designed for use in tests, hence the panics on misconfiguration.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        start_logging()
    }
}

/// Enables debug logging regardless of the value of `RUST_LOG`.
pub fn start_logging() {
    // ensure the global logger is only initialized once, subsequent
    // calls keep the settings of the first
    LOG_SETUP.call_once(|| {
        LogTracer::init().expect("tracing-log init failed");

        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting tracing default failed");
    });
}

/// Asserts two floats are within `f64::EPSILON` of each other.
#[macro_export]
macro_rules! assert_close {
    ($left:expr, $right:expr) => {{
        let (left, right) = (($left) as f64, ($right) as f64);
        assert!(
            (left - right).abs() <= f64::EPSILON,
            "{} is not close to {}",
            left,
            right
        );
    }};
}
