use std::collections::HashMap;

use serde::Deserialize;
use url::Url;

/// Telemetry configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Service name reported with exported spans
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Additional resource attributes
    #[serde(default)]
    pub resource_attributes: HashMap<String, String>,
    /// Log line format
    #[serde(default)]
    pub log_format: LogFormat,
    /// Default OTLP exporter
    #[serde(default)]
    pub exporter: Option<ExporterConfig>,
    /// Span sampling and exporter override
    #[serde(default)]
    pub tracing: Option<SamplingConfig>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            resource_attributes: HashMap::new(),
            log_format: LogFormat::default(),
            exporter: None,
            tracing: None,
        }
    }
}

impl TelemetryConfig {
    /// Exporter for spans: the sampling override, else the default
    pub fn span_exporter(&self) -> Option<&ExporterConfig> {
        self.tracing
            .as_ref()
            .and_then(|t| t.exporter.as_ref())
            .or(self.exporter.as_ref())
    }
}

/// Format of log lines written to stderr
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Where spans are shipped
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    /// Collector endpoint
    pub endpoint: Url,
    #[serde(default)]
    pub protocol: ExportProtocol,
    /// Sent with HTTP/protobuf exports only
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// OTLP transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportProtocol {
    #[default]
    Grpc,
    HttpProto,
}

/// `[telemetry.tracing]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplingConfig {
    /// Fraction of root spans kept, 0.0 to 1.0
    #[serde(default = "full_sampling")]
    pub sampling_rate: f64,
    /// Follow the parent span's decision
    #[serde(default = "parent_based_default")]
    pub parent_based: bool,
    /// Overrides the telemetry-wide exporter
    #[serde(default)]
    pub exporter: Option<ExporterConfig>,
}

const fn full_sampling() -> f64 {
    1.0
}

const fn parent_based_default() -> bool {
    true
}

fn default_service_name() -> String {
    "langfuse-llm".to_owned()
}
