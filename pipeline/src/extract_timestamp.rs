//! Normalizes the timestamp field of a token block.

use crate::{Entity, PipelineContext, Transform, Transformed};
use observability_deps::tracing::warn;
use shdr::ShdrTimestamp;

/// Parses the adapter timestamp, substituting the ingest time when the
/// field is empty, malformed, or `ignore_timestamps` is configured.
#[derive(Debug, Default)]
pub struct ExtractTimestamp {
    ignore_timestamps: bool,
}

impl ExtractTimestamp {
    pub const NAME: &'static str = "ExtractTimestamp";

    pub fn new(ignore_timestamps: bool) -> Self {
        Self { ignore_timestamps }
    }
}

impl Transform for ExtractTimestamp {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn guard(&self, entity: &Entity) -> bool {
        matches!(entity, Entity::Tokens(block) if block.timestamp.is_none())
    }

    fn process(&self, entity: Entity, context: &PipelineContext) -> Transformed {
        let Entity::Tokens(mut block) = entity else {
            unreachable!("guard admits only token blocks");
        };

        let now = context.time_provider.now();
        block.timestamp = Some(if self.ignore_timestamps {
            ShdrTimestamp {
                timestamp: now,
                duration: None,
            }
        } else {
            match shdr::parse_timestamp(&block.timestamp_field, now) {
                Ok(parsed) => parsed,
                Err(error) => {
                    warn!(%error, "bad adapter timestamp, using ingest time");
                    ShdrTimestamp {
                        timestamp: now,
                        duration: None,
                    }
                }
            }
        });

        Transformed::Forward(Entity::Tokens(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixture::context;
    use crate::TokenBlock;
    use agent_time::Time;
    use assert_matches::assert_matches;

    fn block(timestamp_field: &str) -> Entity {
        Entity::Tokens(TokenBlock {
            timestamp_field: timestamp_field.to_string(),
            timestamp: None,
            fields: vec!["Xpos".to_string(), "1".to_string()],
        })
    }

    #[test]
    fn parses_adapter_timestamps() {
        let transform = ExtractTimestamp::new(false);
        let result = transform.process(block("2021-01-22T12:33:45.123Z"), &context());

        assert_matches!(result, Transformed::Forward(Entity::Tokens(block)) => {
            let parsed = block.timestamp.unwrap();
            assert_eq!(parsed.timestamp.to_rfc3339(), "2021-01-22T12:33:45.123Z");
        });
    }

    #[test]
    fn ignore_timestamps_substitutes_ingest_time() {
        let transform = ExtractTimestamp::new(true);
        let result = transform.process(block("2021-01-22T12:33:45.123Z"), &context());

        assert_matches!(result, Transformed::Forward(Entity::Tokens(block)) => {
            // the fixture clock is pinned at zero
            assert_eq!(block.timestamp.unwrap().timestamp, Time::from_timestamp_millis(0));
        });
    }

    #[test]
    fn malformed_timestamps_fall_back_to_ingest_time() {
        let transform = ExtractTimestamp::new(false);
        let result = transform.process(block("yesterday-ish"), &context());

        assert_matches!(result, Transformed::Forward(Entity::Tokens(block)) => {
            assert_eq!(block.timestamp.unwrap().timestamp, Time::from_timestamp_millis(0));
        });
    }

    #[test]
    fn guard_skips_already_stamped_blocks() {
        let transform = ExtractTimestamp::new(false);
        let mut stamped = TokenBlock {
            timestamp_field: String::new(),
            timestamp: None,
            fields: vec![],
        };
        stamped.timestamp = Some(ShdrTimestamp {
            timestamp: Time::from_timestamp_millis(7),
            duration: None,
        });
        assert!(!transform.guard(&Entity::Tokens(stamped)));
    }
}
