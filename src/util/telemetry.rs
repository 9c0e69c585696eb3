//! Log subscriber and OpenTelemetry export.
//!
//! Logs always go to stdout through `tracing-subscriber`, filtered by `RUST_LOG` (default
//! `info`). With the `telemetry` feature, traces and metrics are also exported over OTLP
//! when any `OTEL_EXPORTER_OTLP_*` variable is set.

use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[cfg(feature = "telemetry")]
use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
#[cfg(feature = "telemetry")]
use opentelemetry_sdk::{
    Resource,
    metrics::{MeterProviderBuilder, PeriodicReader, SdkMeterProvider},
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
#[cfg(feature = "telemetry")]
use opentelemetry_semantic_conventions::{
    SCHEMA_URL,
    attribute::{DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION},
};
#[cfg(feature = "telemetry")]
use std::env;
#[cfg(feature = "telemetry")]
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(feature = "telemetry")]
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TelemetryProtocol {
    HTTP,
    GRPC,
}

#[cfg(feature = "telemetry")]
impl TelemetryProtocol {
    /// `None` unless OTLP export is configured through the environment.
    fn from_env() -> Option<Self> {
        let is_enabled = ["ENDPOINT", "HEADERS", "PROTOCOL"]
            .iter()
            .any(|suffix| env::var(format!("OTEL_EXPORTER_OTLP_{suffix}")).is_ok());
        if !is_enabled {
            return None;
        }
        let protocol = match env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
            Ok("grpc") => TelemetryProtocol::GRPC,
            _ => TelemetryProtocol::HTTP,
        };
        Some(protocol)
    }
}

#[cfg(feature = "telemetry")]
fn resource() -> Resource {
    let deployment_env = env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "develop".to_string());
    Resource::builder()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_schema_url(
            [
                KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, deployment_env),
            ],
            SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "telemetry")]
fn init_meter_provider(
    protocol: TelemetryProtocol,
) -> Result<SdkMeterProvider, opentelemetry_otlp::ExporterBuildError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder();
    let exporter = match protocol {
        TelemetryProtocol::HTTP => exporter.with_http().build()?,
        TelemetryProtocol::GRPC => exporter.with_tonic().build()?,
    };
    let reader = PeriodicReader::builder(exporter)
        .with_interval(std::time::Duration::from_secs(30))
        .build();
    let meter_provider = MeterProviderBuilder::default()
        .with_resource(resource())
        .with_reader(reader)
        .build();
    global::set_meter_provider(meter_provider.clone());
    Ok(meter_provider)
}

#[cfg(feature = "telemetry")]
fn init_tracer_provider(
    protocol: TelemetryProtocol,
) -> Result<SdkTracerProvider, opentelemetry_otlp::ExporterBuildError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder();
    let exporter = match protocol {
        TelemetryProtocol::HTTP => exporter.with_http().build()?,
        TelemetryProtocol::GRPC => exporter.with_tonic().build()?,
    };
    Ok(SdkTracerProvider::builder()
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
            1.0,
        ))))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource())
        .with_batch_exporter(exporter)
        .build())
}

/// Installed global subscriber. Dropping it flushes and shuts down the OTLP providers.
pub struct Telemetry {
    #[cfg(feature = "telemetry")]
    tracer_provider: Option<SdkTracerProvider>,
    #[cfg(feature = "telemetry")]
    meter_provider: Option<SdkMeterProvider>,
}

impl Telemetry {
    /// Installs the global subscriber. Call once, before anything logs.
    #[cfg(not(feature = "telemetry"))]
    pub fn init() -> Self {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer())
            .init();
        Telemetry {}
    }

    /// Installs the global subscriber, with OTLP export when configured.
    ///
    /// A failing exporter is reported and the gateway continues with local logs only.
    #[cfg(feature = "telemetry")]
    pub fn init() -> Self {
        let Some(protocol) = TelemetryProtocol::from_env() else {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(tracing_subscriber::fmt::layer())
                .init();
            tracing::info!("OpenTelemetry is not enabled");
            return Self {
                tracer_provider: None,
                meter_provider: None,
            };
        };

        let providers = init_tracer_provider(protocol)
            .and_then(|tracer| init_meter_provider(protocol).map(|meter| (tracer, meter)));
        match providers {
            Ok((tracer_provider, meter_provider)) => {
                let tracer = tracer_provider.tracer("x402-paygate");
                tracing_subscriber::registry()
                    .with(env_filter())
                    .with(tracing_subscriber::fmt::layer())
                    .with(MetricsLayer::new(meter_provider.clone()))
                    .with(OpenTelemetryLayer::new(tracer))
                    .init();
                tracing::info!(?protocol, "OpenTelemetry export is enabled");
                Self {
                    tracer_provider: Some(tracer_provider),
                    meter_provider: Some(meter_provider),
                }
            }
            Err(err) => {
                tracing_subscriber::registry()
                    .with(env_filter())
                    .with(tracing_subscriber::fmt::layer())
                    .init();
                tracing::error!(error = %err, "Failed to build OTLP exporters");
                Self {
                    tracer_provider: None,
                    meter_provider: None,
                }
            }
        }
    }

    /// One span per HTTP request, with the response status logged at `INFO`.
    pub fn http_tracing(&self) -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO))
    }
}

#[cfg(feature = "telemetry")]
impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(tracer_provider) = self.tracer_provider.as_ref() {
            if let Err(err) = tracer_provider.shutdown() {
                eprintln!("{err:?}");
            }
        }
        if let Some(meter_provider) = self.meter_provider.as_ref() {
            if let Err(err) = meter_provider.shutdown() {
                eprintln!("{err:?}");
            }
        }
    }
}
