//! Maps timestamped token blocks onto typed observations using the data
//! item metadata resolved through the pipeline contract.

use crate::{Entity, PipelineContext, Transform, Transformed};
use data_types::DataItem;
use observability_deps::tracing::warn;
use observation::{
    Alarm, AssetEvent, Condition, Level, Observation, Payload, Timeseries, Value,
};
use shdr::ShdrTimestamp;
use std::sync::Arc;

const UNAVAILABLE: &str = "UNAVAILABLE";

/// Walks the fields of a line, resolving each `DATAITEM` key and consuming
/// the category-specific number of value fields that follow it:
///
/// | shape        | fields after the key                      |
/// |--------------|-------------------------------------------|
/// | scalar       | `VALUE`                                   |
/// | timeseries   | `COUNT\|RATE\|V1 V2 …`                    |
/// | condition    | `LEVEL\|NATIVECODE\|SEVERITY\|QUALIFIER\|TEXT` |
/// | message      | `NATIVECODE\|TEXT`                        |
/// | alarm        | `CODE\|NATIVECODE\|SEVERITY\|STATE\|TEXT` |
/// | asset change | `ASSETTYPE\|ID` (or `ID` alone)           |
///
/// An unresolvable key abandons the rest of the line; observations mapped
/// before it survive.
#[derive(Debug, Default)]
pub struct ShdrTokenMapper;

impl ShdrTokenMapper {
    pub const NAME: &'static str = "ShdrTokenMapper";

    pub fn new() -> Self {
        Self
    }
}

impl Transform for ShdrTokenMapper {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn guard(&self, entity: &Entity) -> bool {
        matches!(entity, Entity::Tokens(block) if block.timestamp.is_some())
    }

    fn process(&self, entity: Entity, context: &PipelineContext) -> Transformed {
        let Entity::Tokens(block) = entity else {
            unreachable!("guard admits only token blocks");
        };
        let timestamp = block.timestamp.expect("guard requires a timestamp");

        let mut observations = Vec::new();
        let mut fields = block.fields.iter().map(String::as_str).peekable();
        while let Some(key) = fields.next() {
            if key.is_empty() {
                continue;
            }
            let Some(item) = context.contract.data_item(key) else {
                warn!(key, "unknown data item, abandoning the rest of the line");
                break;
            };

            match map_one(&item, &mut fields, timestamp) {
                Some(observation) => observations.push(observation),
                None => break,
            }
        }

        if observations.is_empty() {
            return Transformed::Consumed;
        }
        Transformed::Forward(Entity::Observations(observations))
    }
}

/// Builds one observation, consuming the item's fields from the iterator.
fn map_one<'a>(
    item: &Arc<DataItem>,
    fields: &mut impl Iterator<Item = &'a str>,
    timestamp: ShdrTimestamp,
) -> Option<Observation> {
    let payload = if item.is_condition() {
        map_condition(fields)
    } else if item.is_timeseries() {
        map_timeseries(fields)?
    } else if item.is_message() {
        map_message(fields)
    } else if item.is_alarm() {
        map_alarm(fields)
    } else if item.is_asset_changed() || item.is_asset_removed() {
        map_asset_event(fields)?
    } else if item.is_data_set() {
        return map_data_set(item, fields.next().unwrap_or_default(), timestamp);
    } else {
        map_scalar(item, fields.next().unwrap_or_default())
    };

    let mut observation = Observation::new(Arc::clone(item), scrub(payload), timestamp.timestamp);
    if let Some(duration) = timestamp.duration {
        observation = observation.with_duration(duration);
    }
    // scalar reset triggers ride on the value as `VALUE:TRIGGER`
    let reset = match observation.payload() {
        Payload::Sample(Value::Text(text)) | Payload::Event(Value::Text(text))
            if item.reset_trigger().is_some() =>
        {
            text.split_once(':')
                .map(|(value, trigger)| (value.to_string(), trigger.to_string()))
        }
        _ => None,
    };
    if let Some((value, trigger)) = reset {
        let value = item.initial_value().unwrap_or(&value);
        let payload = scalar_payload(item, Value::from_token(value));
        observation = observation
            .with_payload(payload)
            .with_reset_triggered(trigger);
    }
    Some(observation)
}

/// `UNAVAILABLE` anywhere a scalar lives becomes the unavailable payload.
fn scrub(payload: Payload) -> Payload {
    match &payload {
        Payload::Sample(Value::Text(t)) | Payload::Event(Value::Text(t)) if t == UNAVAILABLE => {
            Payload::Unavailable
        }
        _ => payload,
    }
}

fn scalar_payload(item: &Arc<DataItem>, value: Value) -> Payload {
    if item.is_sample() {
        Payload::Sample(value)
    } else {
        Payload::Event(value)
    }
}

fn map_scalar(item: &Arc<DataItem>, value: &str) -> Payload {
    scalar_payload(item, Value::from_token(value))
}

fn map_condition<'a>(fields: &mut impl Iterator<Item = &'a str>) -> Payload {
    let level = fields.next().unwrap_or_default();
    if level == UNAVAILABLE {
        return Payload::Condition(Condition::unavailable());
    }
    let mut condition = Condition::new(Level::from_token(level));
    if let Some(code) = fields.next() {
        condition = condition.with_native_code(code);
    }
    if let Some(severity) = fields.next() {
        if !severity.is_empty() {
            condition = condition.with_native_severity(severity);
        }
    }
    if let Some(qualifier) = fields.next() {
        if !qualifier.is_empty() {
            condition = condition.with_qualifier(qualifier);
        }
    }
    if let Some(text) = fields.next() {
        if !text.is_empty() {
            condition = condition.with_text(text);
        }
    }
    Payload::Condition(condition)
}

fn map_timeseries<'a>(fields: &mut impl Iterator<Item = &'a str>) -> Option<Payload> {
    let count_field = fields.next().unwrap_or_default();
    if count_field == UNAVAILABLE {
        return Some(Payload::Unavailable);
    }
    let sample_count: usize = match count_field.parse() {
        Ok(count) => count,
        Err(_) => {
            warn!(count = count_field, "bad timeseries sample count");
            return None;
        }
    };
    let sample_rate = fields.next().and_then(|rate| rate.parse::<f64>().ok());

    let mut samples = Vec::with_capacity(sample_count);
    for token in fields.next().unwrap_or_default().split_whitespace() {
        match token.parse::<f64>() {
            Ok(sample) => samples.push(sample),
            Err(_) => {
                warn!(token, "bad timeseries sample");
                return None;
            }
        }
    }
    if samples.len() != sample_count {
        warn!(
            expected = sample_count,
            actual = samples.len(),
            "timeseries sample count mismatch"
        );
    }

    Some(Payload::Timeseries(Timeseries {
        sample_count,
        sample_rate,
        samples,
    }))
}

fn map_message<'a>(fields: &mut impl Iterator<Item = &'a str>) -> Payload {
    let native_code = fields.next().unwrap_or_default();
    if native_code == UNAVAILABLE {
        return Payload::Unavailable;
    }
    let text = fields.next().unwrap_or_default();
    Payload::Message {
        native_code: (!native_code.is_empty()).then(|| native_code.to_string()),
        text: text.to_string(),
    }
}

fn map_alarm<'a>(fields: &mut impl Iterator<Item = &'a str>) -> Payload {
    let code = fields.next().unwrap_or_default();
    if code == UNAVAILABLE {
        return Payload::Unavailable;
    }
    Payload::Alarm(Alarm {
        code: code.to_string(),
        native_code: fields.next().unwrap_or_default().to_string(),
        severity: fields.next().unwrap_or_default().to_string(),
        state: fields.next().unwrap_or_default().to_string(),
        text: fields.next().unwrap_or_default().to_string(),
    })
}

/// `ASSET_CHANGED`/`ASSET_REMOVED` events: `TYPE|ID`, or a bare id.
fn map_asset_event<'a>(fields: &mut impl Iterator<Item = &'a str>) -> Option<Payload> {
    let first = fields.next().unwrap_or_default();
    if first == UNAVAILABLE {
        return Some(Payload::Unavailable);
    }
    match fields.next() {
        Some(id) => Some(Payload::AssetEvent(AssetEvent {
            asset_id: id.to_string(),
            asset_type: first.to_string(),
            hash: None,
        })),
        None => {
            if first.is_empty() {
                warn!("asset event without an asset id");
                return None;
            }
            Some(Payload::AssetEvent(AssetEvent {
                asset_id: first.to_string(),
                asset_type: String::new(),
                hash: None,
            }))
        }
    }
}

fn map_data_set(
    item: &Arc<DataItem>,
    text: &str,
    timestamp: ShdrTimestamp,
) -> Option<Observation> {
    if text == UNAVAILABLE {
        return Some(Observation::new(
            Arc::clone(item),
            Payload::Unavailable,
            timestamp.timestamp,
        ));
    }

    let parse = if item.is_table() {
        shdr::parse_table(text)
    } else {
        shdr::parse_data_set(text)
    };
    let parsed = match parse {
        Ok(parsed) => parsed,
        Err(error) => {
            // keep what scanned cleanly, drop the rest
            warn!(%error, item = item.id(), "malformed data set");
            error.into_parsed()
        }
    };

    if parsed.entries.is_empty() && parsed.reset_triggered.is_none() {
        return None;
    }

    let mut observation = Observation::new(
        Arc::clone(item),
        Payload::DataSet(parsed.entries),
        timestamp.timestamp,
    );
    if let Some(duration) = timestamp.duration {
        observation = observation.with_duration(duration);
    }
    if let Some(trigger) = parsed.reset_triggered {
        observation = observation.with_reset_triggered(trigger);
    }
    Some(observation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixture::{context, tokens};
    use assert_matches::assert_matches;

    fn map(line_fields: &[&str]) -> Vec<Observation> {
        let mapper = ShdrTokenMapper::new();
        match mapper.process(tokens(line_fields), &context()) {
            Transformed::Forward(Entity::Observations(observations)) => observations,
            Transformed::Consumed => Vec::new(),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn scalar_sample() {
        let observations = map(&["Xpos", "100.0"]);
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].data_item_id(), "x1");
        assert_eq!(observations[0].value(), Some(&Value::Double(100.0)));
    }

    #[test]
    fn multiple_pairs_on_one_line() {
        let observations = map(&["Xpos", "1", "exec", "ACTIVE"]);
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[1].value(), Some(&Value::Text("ACTIVE".into())));
    }

    #[test]
    fn unavailable_scalar() {
        let observations = map(&["Xpos", "UNAVAILABLE"]);
        assert!(observations[0].is_unavailable());
    }

    #[test]
    fn condition_fields() {
        let observations = map(&["c1", "WARNING", "CODE1", "HIGH", "Over..."]);
        let condition = observations[0].condition().unwrap();
        assert_eq!(condition.level, Level::Warning);
        assert_eq!(condition.code(), Some("CODE1"));
        assert_eq!(condition.native_severity.as_deref(), Some("HIGH"));
        assert_eq!(condition.qualifier.as_deref(), Some("Over..."));
    }

    #[test]
    fn condition_normal_with_code() {
        let observations = map(&["c1", "NORMAL", "CODE1", "", ""]);
        let condition = observations[0].condition().unwrap();
        assert_eq!(condition.level, Level::Normal);
        assert_eq!(condition.code(), Some("CODE1"));
    }

    #[test]
    fn timeseries_fields() {
        let observations = map(&["ts1", "3", "100", "1.1 2.2 3.3"]);
        assert_matches!(observations[0].payload(), Payload::Timeseries(series) => {
            assert_eq!(series.sample_count, 3);
            assert_eq!(series.sample_rate, Some(100.0));
            assert_eq!(series.samples, vec![1.1, 2.2, 3.3]);
        });
    }

    #[test]
    fn message_fields() {
        let observations = map(&["msg1", "M100", "machine stopped"]);
        assert_matches!(observations[0].payload(), Payload::Message { native_code, text } => {
            assert_eq!(native_code.as_deref(), Some("M100"));
            assert_eq!(text, "machine stopped");
        });
    }

    #[test]
    fn alarm_fields() {
        let observations = map(&["al1", "OTHER", "A7", "CRITICAL", "ACTIVE", "oil low"]);
        assert_matches!(observations[0].payload(), Payload::Alarm(alarm) => {
            assert_eq!(alarm.code, "OTHER");
            assert_eq!(alarm.state, "ACTIVE");
            assert_eq!(alarm.text, "oil low");
        });
    }

    #[test]
    fn asset_changed_event() {
        let observations = map(&["ac1", "Part", "P1"]);
        assert_matches!(observations[0].payload(), Payload::AssetEvent(event) => {
            assert_eq!(event.asset_id, "P1");
            assert_eq!(event.asset_type, "Part");
        });
    }

    #[test]
    fn data_set_values() {
        let observations = map(&["vars", "a=1 b=2 c=3"]);
        let set = observations[0].data_set().unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.value("b"), Some(&Value::Integer(2)));
    }

    #[test]
    fn data_set_reset_trigger() {
        let observations = map(&["vars", ":MANUAL d=10"]);
        assert_eq!(observations[0].reset_triggered(), Some("MANUAL"));
        assert_eq!(observations[0].data_set().unwrap().len(), 1);
    }

    #[test]
    fn table_rows() {
        let observations = map(&["wpo", "G54={X=1.0 Y=2.0} G55={X=3.0 Y=4.0}"]);
        let set = observations[0].data_set().unwrap();
        assert_eq!(set.len(), 2);
        assert_matches!(set.value("G54"), Some(Value::DataSet(row)) => {
            assert_eq!(row.value("X"), Some(&Value::Double(1.0)));
        });
    }

    #[test]
    fn malformed_data_set_keeps_clean_entries() {
        let observations = map(&["vars", "a=1 b={oops"]);
        let set = observations[0].data_set().unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.value("a"), Some(&Value::Integer(1)));
    }

    #[test]
    fn unknown_key_abandons_the_rest() {
        let observations = map(&["Xpos", "1", "nope", "2", "exec", "ACTIVE"]);
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].data_item_id(), "x1");
    }

    #[test]
    fn scalar_reset_trigger_uses_initial_value() {
        // pc1 is configured with reset trigger DAY and initial value 0
        let observations = map(&["pc1", "123:DAY"]);
        assert_eq!(observations[0].reset_triggered(), Some("DAY"));
        assert_eq!(observations[0].value(), Some(&Value::Integer(0)));
    }
}
