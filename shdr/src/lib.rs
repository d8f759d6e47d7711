//! Parsing for the SHDR line protocol spoken by machine-tool adapters.
//!
//! A line is `TIMESTAMP|DATAITEM|VALUE[|DATAITEM|VALUE…]`. This crate splits
//! lines into fields (respecting quoting so data-set values may carry pipes),
//! parses the timestamp field, and parses data-set/table value text with a
//! hand-written character scanner. Mapping fields onto data items is the
//! pipeline's job; nothing here needs the device model.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod data_set;

pub use data_set::{parse_data_set, parse_table, serialize_data_set, DataSetError, ParsedSet};

use agent_time::Time;
use smallvec::SmallVec;
use snafu::{ResultExt, Snafu};

/// Errors from the timestamp field of an adapter line.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum TimestampError {
    #[snafu(display("invalid timestamp {:?}: {}", token, source))]
    Invalid {
        token: String,
        source: chrono::ParseError,
    },

    #[snafu(display("invalid duration suffix {:?}", token))]
    InvalidDuration { token: String },
}

/// A parsed adapter timestamp: the instant plus the optional statistical
/// duration carried by a `TIME@DURATION` suffix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShdrTimestamp {
    pub timestamp: Time,
    pub duration: Option<f64>,
}

/// Parses the leading timestamp field. An empty field yields `now` (the
/// ingest time), as does `ignore_timestamps` handling upstream.
pub fn parse_timestamp(token: &str, now: Time) -> Result<ShdrTimestamp, TimestampError> {
    let token = token.trim();
    if token.is_empty() {
        return Ok(ShdrTimestamp {
            timestamp: now,
            duration: None,
        });
    }

    let (time_part, duration) = match token.split_once('@') {
        Some((time_part, duration_part)) => {
            let duration = duration_part
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite())
                .ok_or_else(|| InvalidDurationSnafu { token }.build())?;
            (time_part, Some(duration))
        }
        None => (token, None),
    };

    let timestamp = Time::from_rfc3339(time_part).context(InvalidSnafu { token })?;

    Ok(ShdrTimestamp {
        timestamp,
        duration,
    })
}

/// Splits a line into its `|`-delimited fields.
///
/// Pipes inside single quotes, double quotes, or braces do not split, and a
/// backslash escapes the character after it, so data-set values survive
/// tokenization intact. Fields are trimmed.
pub fn split_fields(line: &str) -> SmallVec<[&str; 8]> {
    let mut fields = SmallVec::new();
    let bytes = line.as_bytes();
    let mut start = 0;
    let mut quote: Option<u8> = None;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'\'' | b'"' if quote == Some(b) => quote = None,
            b'}' if quote == Some(b'{') => quote = None,
            b'\'' | b'"' | b'{' if quote.is_none() => quote = Some(b),
            b'|' if quote.is_none() => {
                fields.push(line[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(line[start..].trim());
    fields
}
