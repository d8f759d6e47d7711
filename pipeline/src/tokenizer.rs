//! Entry stage: splits raw adapter lines into token blocks and decodes
//! asset commands, assembling multiline asset documents.

use crate::{AssetCommand, Entity, PipelineContext, Transform, Transformed};
use agent_time::Time;
use observability_deps::tracing::warn;
use parking_lot::Mutex;

const ASSET_COMMAND: &str = "@ASSET@";
const REMOVE_ASSET_COMMAND: &str = "@REMOVE_ASSET@";
const REMOVE_ALL_ASSETS_COMMAND: &str = "@REMOVE_ALL_ASSETS@";
const MULTILINE_PREFIX: &str = "--multiline--";

/// In-flight multiline asset block.
#[derive(Debug)]
struct MultilineAsset {
    terminator: String,
    asset_id: String,
    asset_type: String,
    timestamp: Option<Time>,
    lines: Vec<String>,
}

/// Splits lines into fields and recognizes the `@…@` asset commands.
///
/// Each adapter pipeline owns one tokenizer; the multiline state is only
/// touched from that adapter's strand.
#[derive(Debug, Default)]
pub struct ShdrTokenizer {
    multiline: Mutex<Option<MultilineAsset>>,
}

impl ShdrTokenizer {
    pub const NAME: &'static str = "ShdrTokenizer";

    pub fn new() -> Self {
        Self::default()
    }

    fn tokenize(&self, line: &str, context: &PipelineContext) -> Transformed {
        {
            let mut multiline = self.multiline.lock();
            if let Some(pending) = multiline.as_mut() {
                if line.trim() == pending.terminator {
                    let pending = multiline.take().expect("pending block present");
                    return Transformed::Forward(Entity::Asset(AssetCommand::Upsert {
                        asset_id: pending.asset_id,
                        asset_type: pending.asset_type,
                        timestamp: pending.timestamp,
                        document: pending.lines.join("\n"),
                    }));
                }
                pending.lines.push(line.to_string());
                return Transformed::Consumed;
            }
        }

        // asset commands keep the document body verbatim, so split them
        // positionally instead of with the quote-aware field splitter
        if let Some(command) = self.asset_command(line, context) {
            return command;
        }

        let mut fields = shdr::split_fields(line);
        if fields.len() < 2 {
            warn!(line, "discarding line without a data item field");
            return Transformed::Consumed;
        }
        let timestamp_field = fields.remove(0).to_string();
        Transformed::Forward(Entity::Tokens(crate::TokenBlock {
            timestamp_field,
            timestamp: None,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }))
    }

    fn asset_command(&self, line: &str, context: &PipelineContext) -> Option<Transformed> {
        let rest = line.trim_end_matches(['\r', '\n']);
        let (timestamp_field, rest) = rest.split_once('|')?;
        let (command, rest) = match rest.split_once('|') {
            Some((command, rest)) => (command, rest),
            None => (rest, ""),
        };
        if !command.starts_with('@') {
            return None;
        }

        let timestamp = self.parse_timestamp(timestamp_field, context);
        match command {
            ASSET_COMMAND => {
                let (asset_id, rest) = rest.split_once('|')?;
                let (asset_type, body) = rest.split_once('|')?;
                if let Some(tag) = body.strip_prefix(MULTILINE_PREFIX) {
                    *self.multiline.lock() = Some(MultilineAsset {
                        terminator: format!("{MULTILINE_PREFIX}{tag}"),
                        asset_id: asset_id.to_string(),
                        asset_type: asset_type.to_string(),
                        timestamp,
                        lines: Vec::new(),
                    });
                    Some(Transformed::Consumed)
                } else {
                    Some(Transformed::Forward(Entity::Asset(AssetCommand::Upsert {
                        asset_id: asset_id.to_string(),
                        asset_type: asset_type.to_string(),
                        timestamp,
                        document: body.to_string(),
                    })))
                }
            }
            REMOVE_ASSET_COMMAND => {
                let asset_id = rest.split('|').next().unwrap_or_default();
                if asset_id.is_empty() {
                    warn!(line, "@REMOVE_ASSET@ without an asset id");
                    return Some(Transformed::Consumed);
                }
                Some(Transformed::Forward(Entity::Asset(AssetCommand::Remove {
                    asset_id: asset_id.to_string(),
                    timestamp,
                })))
            }
            REMOVE_ALL_ASSETS_COMMAND => {
                let asset_type = rest.split('|').next().unwrap_or_default();
                if asset_type.is_empty() {
                    warn!(line, "@REMOVE_ALL_ASSETS@ without an asset type");
                    return Some(Transformed::Consumed);
                }
                Some(Transformed::Forward(Entity::Asset(
                    AssetCommand::RemoveAll {
                        asset_type: asset_type.to_string(),
                        timestamp,
                    },
                )))
            }
            other => {
                warn!(command = other, "ignoring unknown adapter command");
                Some(Transformed::Consumed)
            }
        }
    }

    fn parse_timestamp(&self, field: &str, context: &PipelineContext) -> Option<Time> {
        if field.trim().is_empty() {
            return None;
        }
        match shdr::parse_timestamp(field, context.time_provider.now()) {
            Ok(parsed) => Some(parsed.timestamp),
            Err(error) => {
                warn!(%error, "bad asset timestamp, store will assign one");
                None
            }
        }
    }
}

impl Transform for ShdrTokenizer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn guard(&self, entity: &Entity) -> bool {
        matches!(entity, Entity::Line(_))
    }

    fn process(&self, entity: Entity, context: &PipelineContext) -> Transformed {
        let Entity::Line(line) = entity else {
            unreachable!("guard admits only lines");
        };
        self.tokenize(&line, context)
    }
}
