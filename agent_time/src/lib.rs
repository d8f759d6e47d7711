//! Abstraction over the system clock.
//!
//! All "current time" reads in the agent (ingest-time substitution, asset
//! timestamps, staleness sweeps) go through a [`TimeProvider`] so that tests
//! can drive the clock deterministically with [`MockProvider`].

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use parking_lot::RwLock;
use std::fmt::Debug;
use std::ops::{Add, Sub};
use std::time::Duration;

/// A UTC instant with nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(DateTime<Utc>);

impl Time {
    pub fn from_date_time(time: DateTime<Utc>) -> Self {
        Self(time)
    }

    /// Makes a new `Time` from the number of non-leap nanoseconds since
    /// January 1, 1970 0:00:00 UTC (aka "UNIX timestamp").
    pub fn from_timestamp_nanos(nanos: i64) -> Self {
        Self(Utc.timestamp_nanos(nanos))
    }

    pub fn from_timestamp_millis(millis: i64) -> Self {
        Self(Utc.timestamp_millis(millis))
    }

    pub fn from_timestamp(secs: i64, nanos: u32) -> Self {
        Self(Utc.timestamp(secs, nanos))
    }

    /// Parses an RFC 3339 / ISO 8601 timestamp, e.g. `2021-01-22T12:33:45.123Z`.
    pub fn from_rfc3339(s: &str) -> Result<Self, chrono::ParseError> {
        Ok(Self(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc)))
    }

    pub fn timestamp_nanos(&self) -> i64 {
        self.0.timestamp_nanos()
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    pub fn timestamp(&self) -> i64 {
        self.0.timestamp()
    }

    /// Renders with millisecond precision and a trailing `Z`, the form the
    /// adapters and printers exchange.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn date_time(&self) -> DateTime<Utc> {
        self.0
    }

    /// Duration since `other`, or `None` if `other` is later than `self`.
    pub fn checked_duration_since(&self, other: Self) -> Option<Duration> {
        (self.0 - other.0).to_std().ok()
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + chrono::Duration::from_std(rhs).expect("duration overflow"))
    }
}

impl Sub<Duration> for Time {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self::Output {
        Self(self.0 - chrono::Duration::from_std(rhs).expect("duration overflow"))
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

/// Source of the current time.
pub trait TimeProvider: Debug + Send + Sync + 'static {
    /// Returns the current `Time`. No guarantees about monotonicity.
    fn now(&self) -> Time;
}

/// A [`TimeProvider`] that uses [`Utc::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider;

impl SystemProvider {
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time(Utc::now())
    }
}

/// A [`TimeProvider`] that returns a value pinned by tests.
#[derive(Debug)]
pub struct MockProvider {
    now: RwLock<Time>,
}

impl MockProvider {
    pub fn new(now: Time) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: Time) {
        *self.now.write() = now
    }

    pub fn inc(&self, duration: Duration) -> Time {
        let mut now = self.now.write();
        *now = *now + duration;
        *now
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_provider_now() {
        let provider = SystemProvider::new();
        let a = provider.now();
        let b = provider.now();
        assert!(b >= a);
    }

    #[test]
    fn mock_provider_pins_time() {
        let provider = MockProvider::new(Time::from_timestamp_millis(100));
        assert_eq!(provider.now(), provider.now());

        provider.set(Time::from_timestamp_millis(200));
        assert_eq!(provider.now().timestamp_millis(), 200);

        provider.inc(Duration::from_millis(50));
        assert_eq!(provider.now().timestamp_millis(), 250);
    }

    #[test]
    fn rfc3339_round_trip() {
        let time = Time::from_rfc3339("2021-01-22T12:33:45.123Z").unwrap();
        assert_eq!(time.to_rfc3339(), "2021-01-22T12:33:45.123Z");
    }

    #[test]
    fn checked_duration_since_ordering() {
        let t0 = Time::from_timestamp_millis(1_000);
        let t1 = Time::from_timestamp_millis(3_500);
        assert_eq!(
            t1.checked_duration_since(t0),
            Some(Duration::from_millis(2_500))
        );
        assert_eq!(t0.checked_duration_since(t1), None);
    }
}
