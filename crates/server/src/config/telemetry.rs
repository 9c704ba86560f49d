use std::collections::HashMap;
use std::time::Duration;

use opentelemetry_sdk::trace::Sampler;
use serde::Deserialize;

/// OTLP transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    Http,
}

impl std::fmt::Display for OtlpProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Grpc => "grpc",
            Self::Http => "http",
        })
    }
}

/// Logging and span export.
///
/// `log_filter` is an `EnvFilter` directive used when `RUST_LOG` is unset.
/// Span export is off unless `enabled` is set; proxy calls then carry the
/// admission check and the forwarded request as child spans.
///
/// ```toml
/// [telemetry]
/// log_filter = "info,tracktags_engine=debug"
/// enabled = true
/// endpoint = "http://localhost:4317"
/// sample_ratio = 0.1
/// ```
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_filter: String,
    pub enabled: bool,
    pub endpoint: String,
    pub protocol: OtlpProtocol,
    pub service_name: String,
    /// Fraction of traces kept, clamped to `0.0..=1.0`.
    pub sample_ratio: f64,
    pub timeout_seconds: u64,
    pub resource_attributes: HashMap<String, String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_owned(),
            enabled: false,
            endpoint: "http://localhost:4317".to_owned(),
            protocol: OtlpProtocol::Grpc,
            service_name: "tracktags".to_owned(),
            sample_ratio: 1.0,
            timeout_seconds: 10,
            resource_attributes: HashMap::new(),
        }
    }
}

impl TelemetryConfig {
    pub fn sampler(&self) -> Sampler {
        if self.sample_ratio >= 1.0 {
            Sampler::AlwaysOn
        } else if self.sample_ratio <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::TraceIdRatioBased(self.sample_ratio)
        }
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
