//! Tracing/OTel setup (§4.12): a `tracing-subscriber` registry layer with
//! an env-filter (default `info`, overridable by `RUST_LOG`) and either a
//! plain or JSON-formatted writer to stdout. OTLP export is optional and
//! purely additive — attaching it changes no other code path, it only
//! adds a span exporter on top of the same `tracing` calls already made
//! throughout the crate graph.

use ca_domain::config::{TraceExporter, TracingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Guard kept alive for the process lifetime; dropping it flushes the
/// OTLP exporter's pending spans.
pub struct TracingGuard {
    _otlp: Option<opentelemetry_sdk::trace::TracerProvider>,
}

pub fn init(config: &TracingConfig) -> anyhow::Result<TracingGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("codeagent={},tower_http=info", config.level)));

    let otlp_provider = match config.exporter {
        TraceExporter::Otlp => Some(build_otlp_provider(config)?),
        _ => None,
    };

    let otel_layer = otlp_provider.as_ref().map(|provider| {
        use opentelemetry::trace::TracerProvider as _;
        tracing_opentelemetry::layer().with_tracer(provider.tracer("codeagent"))
    });

    match config.exporter {
        TraceExporter::StdoutJson => {
            let fmt_layer = tracing_subscriber::fmt::layer().json();
            Registry::default()
                .with(filter)
                .with(fmt_layer)
                .with(otel_layer)
                .try_init()?;
        }
        TraceExporter::StdoutPlain => {
            let fmt_layer = tracing_subscriber::fmt::layer();
            Registry::default()
                .with(filter)
                .with(fmt_layer)
                .with(otel_layer)
                .try_init()?;
        }
        TraceExporter::Otlp => {
            let fmt_layer = tracing_subscriber::fmt::layer().json();
            Registry::default()
                .with(filter)
                .with(fmt_layer)
                .with(otel_layer)
                .try_init()?;
        }
    }

    Ok(TracingGuard { _otlp: otlp_provider })
}

fn build_otlp_provider(config: &TracingConfig) -> anyhow::Result<opentelemetry_sdk::trace::TracerProvider> {
    let endpoint = config
        .otlp_endpoint
        .clone()
        .unwrap_or_else(|| "http://localhost:4317".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .build();

    Ok(provider)
}
