//! Tracing setup: console logs plus optional OTLP span export.
//!
//! [`Telemetry`] installs the global subscriber and returns a
//! [`TelemetryGuard`] that flushes pending spans on drop. The guard also
//! hands out the HTTP tracing layer. Request spans carry the `chain` and
//! `network` query parameters, so every log line of a request can be filtered
//! by the chain it addressed. Only available with the `telemetry` feature.

use std::env;
use std::time::Duration;

use axum::http::{Request, Response, Uri, header};
use opentelemetry::KeyValue;
use opentelemetry::trace::{Status, TracerProvider};
use opentelemetry_otlp::SpanExporter;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_semantic_conventions::{
    SCHEMA_URL,
    attribute::{DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION},
};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultOnRequest, MakeSpan, OnResponse, TraceLayer};
use tracing::Span;
use tracing::field::Empty;
use tracing_opentelemetry::{OpenTelemetryLayer, OpenTelemetrySpanExt};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info";

/// Env vars whose presence turns span export on.
const OTLP_TRIGGERS: [&str; 3] = [
    "OTEL_EXPORTER_OTLP_ENDPOINT",
    "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT",
    "OTEL_EXPORTER_OTLP_PROTOCOL",
];

/// OTLP transports the exporter can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OtlpProtocol {
    HttpProtobuf,
    Grpc,
}

impl OtlpProtocol {
    /// `None` unless one of [`OTLP_TRIGGERS`] is set.
    fn from_env() -> Option<Self> {
        OTLP_TRIGGERS
            .iter()
            .any(|key| env::var_os(key).is_some())
            .then(|| Self::parse(env::var("OTEL_EXPORTER_OTLP_PROTOCOL").ok().as_deref()))
    }

    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("grpc") => Self::Grpc,
            _ => Self::HttpProtobuf,
        }
    }

    fn exporter(self) -> Result<SpanExporter, String> {
        let built = match self {
            Self::HttpProtobuf => SpanExporter::builder().with_http().build(),
            Self::Grpc => SpanExporter::builder().with_tonic().build(),
        };
        built.map_err(|e| e.to_string())
    }
}

/// Subscriber settings and the service identity reported with spans.
///
/// `OTEL_SERVICE_NAME` and `OTEL_SERVICE_DEPLOYMENT` override the values set
/// here. `RUST_LOG` sets the log filter.
#[derive(Debug, Clone)]
pub struct Telemetry {
    service: String,
    version: String,
}

impl Telemetry {
    #[must_use]
    pub fn new(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            version: version.into(),
        }
    }

    fn resource(&self) -> Resource {
        let service = env::var("OTEL_SERVICE_NAME")
            .ok()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.service.clone());
        let mut attributes = vec![KeyValue::new(SERVICE_VERSION, self.version.clone())];
        if let Ok(deployment) = env::var("OTEL_SERVICE_DEPLOYMENT") {
            attributes.push(KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, deployment));
        }
        Resource::builder()
            .with_service_name(service)
            .with_schema_url(attributes, SCHEMA_URL)
            .build()
    }

    fn tracer_provider(&self, exporter: SpanExporter) -> SdkTracerProvider {
        SdkTracerProvider::builder()
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
            .with_resource(self.resource())
            .with_batch_exporter(exporter)
            .build()
    }

    /// Installs the global subscriber.
    ///
    /// Console logging is always on. Spans are additionally exported over
    /// OTLP when the exporter env vars are present and the exporter builds.
    pub fn register(self) -> TelemetryGuard {
        let mut export_error = None;
        let protocol = OtlpProtocol::from_env();
        let tracer_provider = protocol.and_then(|protocol| match protocol.exporter() {
            Ok(exporter) => Some(self.tracer_provider(exporter)),
            Err(error) => {
                export_error = Some(error);
                None
            }
        });
        let otel_layer = tracer_provider
            .as_ref()
            .map(|provider| OpenTelemetryLayer::new(provider.tracer(self.service.clone())));

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .with(otel_layer)
            .init();

        match (protocol, export_error) {
            (Some(protocol), None) => tracing::info!(?protocol, "exporting spans over OTLP"),
            (Some(protocol), Some(error)) => {
                tracing::warn!(?protocol, %error, "OTLP exporter unavailable, console logging only");
            }
            (None, _) => tracing::debug!("OTLP not configured, console logging only"),
        }
        TelemetryGuard { tracer_provider }
    }
}

/// Flushes and shuts the tracer provider down on drop.
#[derive(Debug)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(err) = provider.shutdown()
        {
            tracing::error!(%err, "tracer provider shutdown failed");
        }
    }
}

/// Tower layer that opens a span per HTTP request.
pub type HttpTraceLayer =
    TraceLayer<SharedClassifier<ServerErrorsAsFailures>, HttpMakeSpan, DefaultOnRequest, HttpOnResponse>;

impl TelemetryGuard {
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn http_tracing(&self) -> HttpTraceLayer {
        TraceLayer::new_for_http()
            .make_span_with(HttpMakeSpan)
            .on_response(HttpOnResponse)
    }
}

/// First value of `key` in the query string of `uri`, undecoded.
fn query_value<'a>(uri: &'a Uri, key: &str) -> Option<&'a str> {
    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find_map(|(k, v)| (k == key).then_some(v))
}

/// Opens the request span, tagged with the addressed chain and network.
#[derive(Clone, Copy, Debug)]
pub struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let uri = request.uri();
        tracing::info_span!(
            "http_request",
            otel.kind = "server",
            otel.name = %format!("{} {}", request.method(), uri.path()),
            method = %request.method(),
            path = uri.path(),
            chain = query_value(uri, "chain").unwrap_or_default(),
            network = query_value(uri, "network").unwrap_or_default(),
            status = Empty,
            cached = Empty,
        )
    }
}

/// Records status and cache outcome on the request span.
#[derive(Clone, Copy, Debug)]
pub struct HttpOnResponse;

impl<B> OnResponse<B> for HttpOnResponse {
    fn on_response(self, response: &Response<B>, latency: Duration, span: &Span) {
        let status = response.status();
        span.record("status", status.as_u16());
        span.record(
            "cached",
            response.headers().contains_key(header::CACHE_CONTROL),
        );

        // Client errors are the caller's problem, not a failed server span.
        if status.is_server_error() {
            span.set_status(Status::error(
                status.canonical_reason().unwrap_or("server error"),
            ));
        } else {
            span.set_status(Status::Ok);
        }

        tracing::info!(
            status = status.as_u16(),
            latency_ms = latency.as_millis(),
            "request finished"
        );
    }
}
