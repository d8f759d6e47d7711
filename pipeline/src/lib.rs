//! The staged ingest pipeline.
//!
//! Adapter lines enter as [`Entity::Line`], pass through an ordered chain
//! of named [`Transform`]s (tokenize, timestamp, map, optional filters),
//! and end at the [`DeliverObservation`] terminal, which hands committed
//! work to the agent's [`ObservationSink`]. Each adapter owns one pipeline
//! pinned to that adapter's strand; stages never run concurrently within
//! one pipeline.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod context;
mod convert_value;
mod deliver;
mod delta_filter;
mod duplicate_filter;
mod entity;
mod extract_timestamp;
mod pipeline;
mod token_mapper;
mod tokenizer;
mod transform;
mod upcase_value;

pub use context::{AdapterOptions, PipelineContext, PipelineContract};
pub use convert_value::ConvertValue;
pub use deliver::{DeliverObservation, ObservationSink, SinkError};
pub use delta_filter::DeltaFilter;
pub use duplicate_filter::DuplicateFilter;
pub use entity::{AssetCommand, Entity, TokenBlock};
pub use extract_timestamp::ExtractTimestamp;
pub use pipeline::Pipeline;
pub use token_mapper::ShdrTokenMapper;
pub use tokenizer::ShdrTokenizer;
pub use transform::{Transform, Transformed};
pub use upcase_value::UpcaseValue;

use std::sync::Arc;

/// Builds the canonical adapter pipeline:
///
/// ```text
/// ShdrTokenizer → ExtractTimestamp → ShdrTokenMapper → [UpcaseValue]
///     → [ConvertValue] → [DuplicateFilter] → DeltaFilter → DeliverObservation
/// ```
///
/// Bracketed stages are present only when the corresponding adapter option
/// is set. The delta filter is always present; items without a filter
/// configuration pass through it untouched.
pub fn standard_pipeline(
    context: PipelineContext,
    options: AdapterOptions,
    sink: Arc<dyn ObservationSink>,
) -> Pipeline {
    let mut pipeline = Pipeline::new(context);
    pipeline
        .bind(Arc::new(ShdrTokenizer::new()))
        .bind(Arc::new(ExtractTimestamp::new(options.ignore_timestamps)))
        .bind(Arc::new(ShdrTokenMapper::new()));
    if options.upcase_values {
        pipeline.bind(Arc::new(UpcaseValue::new()));
    }
    if options.conversion_required {
        pipeline.bind(Arc::new(ConvertValue::new()));
    }
    if options.filter_duplicates {
        pipeline.bind(Arc::new(DuplicateFilter::new()));
    }
    pipeline.bind(Arc::new(DeltaFilter::new()));
    pipeline.bind(Arc::new(DeliverObservation::new(sink)));
    pipeline
}


#[cfg(test)]
mod tests {
    use super::test_fixture::{context, CapturingSink};
    use super::*;
    use observation::Value;

    fn pipeline(options: AdapterOptions) -> (Pipeline, Arc<CapturingSink>) {
        let sink = Arc::new(CapturingSink::default());
        let pipeline = standard_pipeline(context(), options, Arc::clone(&sink) as _);
        (pipeline, sink)
    }

    #[test]
    fn line_flows_to_the_sink() {
        let (pipeline, sink) = pipeline(AdapterOptions::default());

        assert!(pipeline
            .process_line("2021-01-22T12:33:45.123Z|Xpos|100.0")
            .is_none());

        let delivered = sink.observations();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].data_item_id(), "x1");
        assert_eq!(delivered[0].value(), Some(&Value::Double(100.0)));
        assert_eq!(
            delivered[0].timestamp().to_rfc3339(),
            "2021-01-22T12:33:45.123Z"
        );
    }

    #[test]
    fn duplicate_filtering_is_opt_in() {
        let (unfiltered, sink) = pipeline(AdapterOptions::default());
        unfiltered.process_line("T|Xpos|100.0");
        unfiltered.process_line("T|Xpos|100.0");
        assert_eq!(sink.observations().len(), 2);

        let (filtered, sink) = pipeline(AdapterOptions {
            filter_duplicates: true,
            ..Default::default()
        });
        filtered.process_line("T|Xpos|100.0");
        filtered.process_line("T|Xpos|100.0");
        filtered.process_line("T|Xpos|101.0");
        assert_eq!(sink.observations().len(), 2);
    }

    #[test]
    fn upcase_is_opt_in() {
        let (pipeline, sink) = pipeline(AdapterOptions {
            upcase_values: true,
            ..Default::default()
        });
        pipeline.process_line("2021-01-22T12:33:45.123Z|exec|active");

        assert_eq!(
            sink.observations()[0].value(),
            Some(&Value::Text("ACTIVE".into()))
        );
    }

    #[test]
    fn canonical_stage_order() {
        let (pipeline, _) = pipeline(AdapterOptions {
            ignore_timestamps: false,
            upcase_values: true,
            conversion_required: true,
            filter_duplicates: true,
        });
        assert_eq!(
            pipeline.transform_names(),
            [
                "ShdrTokenizer",
                "ExtractTimestamp",
                "ShdrTokenMapper",
                "UpcaseValue",
                "ConvertValue",
                "DuplicateFilter",
                "DeltaFilter",
                "DeliverObservation",
            ]
        );
    }

    #[test]
    fn asset_lines_deliver_asset_commands() {
        let (pipeline, sink) = pipeline(AdapterOptions::default());
        pipeline.process_line("2021-02-01T12:00:00Z|@ASSET@|P1|Part|<Part assetId='P1'/>");

        let assets = sink.assets();
        assert_eq!(assets.len(), 1);
        assert!(matches!(&assets[0], AssetCommand::Upsert { asset_id, .. } if asset_id == "P1"));
    }
}
