//! Tracing subscriber setup for the binaries.
//!
//! Either plain `fmt` output filtered through `RUST_LOG`, or spans exported to an OTLP collector
//! with bunyan style JSON fields.
use opentelemetry::sdk::propagation::TraceContextPropagator;
use opentelemetry::sdk::trace::BatchConfig;
use opentelemetry::sdk::{trace, Resource};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use tracing::level_filters::LevelFilter;
use tracing_bunyan_formatter::JsonStorageLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry};

const SERVICE_NAME: &str = "replica-router";

/// Logs to stdout, honouring `RUST_LOG` (defaults to `info`)
pub fn initialize_fmt_subscriber() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Exports spans to the OTLP collector listening at `exporter_endpoint`
pub fn initialize_otlp_subscriber(exporter_endpoint: &str) -> anyhow::Result<()> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(exporter_endpoint);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            trace::config().with_resource(Resource::new(vec![KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                SERVICE_NAME.to_string(),
            )])),
        )
        .with_batch_config(BatchConfig::default().with_max_queue_size(64 * 1024))
        .install_batch(opentelemetry::runtime::Tokio)?;

    global::set_text_map_propagator(TraceContextPropagator::new());

    Registry::default()
        .with(LevelFilter::INFO)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(JsonStorageLayer)
        .init();

    Ok(())
}
