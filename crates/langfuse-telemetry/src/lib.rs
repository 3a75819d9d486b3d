//! Logging and trace export for the LLM adapter layer
//!
//! Log lines always go to stderr through `tracing-subscriber`. When an OTLP
//! exporter is configured, spans are exported as well.

mod metadata;

use langfuse_config::telemetry::{ExportProtocol, ExporterConfig, LogFormat};
use langfuse_config::TelemetryConfig;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Keeps the tracer provider alive; flushes pending spans on drop
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("failed to shutdown tracer provider: {e}");
        }
    }
}

/// Initialize logging and optional span export
///
/// `log_filter` uses `EnvFilter` syntax and falls back to `info` when it
/// cannot be parsed. The returned guard must be held until shutdown.
///
/// # Errors
///
/// Returns an error if the OTLP exporter cannot be built or a global
/// subscriber is already installed
pub fn init(config: Option<&TelemetryConfig>, log_filter: &str) -> anyhow::Result<TelemetryGuard> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = config.map(|c| c.log_format).unwrap_or_default();

    let mut guard = TelemetryGuard { tracer_provider: None };

    match config.and_then(|c| c.span_exporter().map(|exporter| (c, exporter))) {
        Some((telemetry_config, exporter_config)) => {
            let tracer_provider = init_tracer(telemetry_config, exporter_config)?;
            let tracer = tracer_provider.tracer("langfuse-llm");
            global::set_tracer_provider(tracer_provider.clone());
            guard.tracer_provider = Some(tracer_provider);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer(log_format))
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?;
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer(log_format))
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?;
        }
    }

    Ok(guard)
}

fn fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

fn sampler(config: &TelemetryConfig) -> Sampler {
    let sampling_rate = config.tracing.as_ref().map_or(1.0, |t| t.sampling_rate);

    let sampler = if sampling_rate >= 1.0 {
        Sampler::AlwaysOn
    } else if sampling_rate <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(sampling_rate)
    };

    if config.tracing.as_ref().is_none_or(|t| t.parent_based) {
        Sampler::ParentBased(Box::new(sampler))
    } else {
        sampler
    }
}

fn init_tracer(config: &TelemetryConfig, exporter_config: &ExporterConfig) -> anyhow::Result<SdkTracerProvider> {
    let exporter = build_span_exporter(exporter_config)?;

    Ok(SdkTracerProvider::builder()
        .with_resource(metadata::build_resource(config))
        .with_sampler(sampler(config))
        .with_batch_exporter(exporter)
        .build())
}

fn build_span_exporter(config: &ExporterConfig) -> anyhow::Result<opentelemetry_otlp::SpanExporter> {
    use opentelemetry_otlp::SpanExporter;

    let exporter = match config.protocol {
        ExportProtocol::Grpc => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(config.endpoint.as_str())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build gRPC span exporter: {e}"))?,
        ExportProtocol::HttpProto => SpanExporter::builder()
            .with_http()
            .with_endpoint(config.endpoint.as_str())
            .with_headers(config.headers.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP span exporter: {e}"))?,
    };

    Ok(exporter)
}
