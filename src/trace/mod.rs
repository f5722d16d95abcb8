//! OpenTelemetry wiring for pipeline runs.
//!
//! [`otlp_tracer_provider`] builds an [`SdkTracerProvider`] that batches
//! finished spans to an OTLP/HTTP collector under a [`Resource`] describing
//! this service. The provider is never installed as the global provider:
//! callers take a [`Tracer`] from it with [`tracer`] and hand that to the
//! pipeline, and shut the provider down themselves once the run is over.
//!
//! # Example
//!
//! ```rust
//! use opentelemetry::trace::{Span as _, Tracer as _};
//! use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
//!
//! let exporter = InMemorySpanExporter::default();
//! let provider = SdkTracerProvider::builder()
//!     .with_simple_exporter(exporter.clone())
//!     .build();
//!
//! let tracer = prompt_chain::trace::tracer(&provider);
//! tracer.start("Prompt Chain").end();
//!
//! let spans = exporter.get_finished_spans().unwrap();
//! assert_eq!(spans.len(), 1);
//! assert_eq!(spans[0].name, "Prompt Chain");
//! ```

use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use std::time::Duration;
use tracing::debug;

use crate::config::TelemetryConfig;
use crate::{Error, Result};

/// The tracer type handed out by an [`SdkTracerProvider`].
pub type Tracer = <SdkTracerProvider as TracerProvider>::Tracer;

/// Instrumentation scope name on every span this crate creates.
pub const INSTRUMENTATION_SCOPE: &str = "prompt-chain";

const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Resource labels attached to every exported batch.
pub fn resource(config: &TelemetryConfig) -> Resource {
    Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes([
            KeyValue::new("service.version", config.service_version.clone()),
            KeyValue::new("deployment.environment.name", config.environment.clone()),
        ])
        .build()
}

/// A provider that batches spans to `{endpoint}/v1/traces` over OTLP/HTTP.
///
/// Export failures are reported by the SDK's own diagnostics and never reach
/// the pipeline. Call [`SdkTracerProvider::shutdown`] before exit to flush
/// whatever is still queued.
pub fn otlp_tracer_provider(config: &TelemetryConfig) -> Result<SdkTracerProvider> {
    let url = config.traces_url();
    let exporter = SpanExporter::builder()
        .with_http()
        .with_endpoint(url.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .map_err(|e| Error::Export(e.to_string()))?;

    let batch_config = BatchConfigBuilder::default()
        .with_max_export_batch_size(config.export_batch_size())
        .with_scheduled_delay(config.scheduled_delay())
        .build();
    let processor = BatchSpanProcessor::builder(exporter)
        .with_batch_config(batch_config)
        .build();

    debug!(url = %url, service = %config.service_name, "built OTLP tracer provider");
    Ok(SdkTracerProvider::builder()
        .with_span_processor(processor)
        .with_resource(resource(config))
        .build())
}

/// The tracer pipelines should record into.
pub fn tracer(provider: &SdkTracerProvider) -> Tracer {
    provider.tracer(INSTRUMENTATION_SCOPE)
}

/// Saturating conversion for counts recorded as `i64` attributes.
pub(crate) fn int<N: TryInto<i64>>(n: N) -> i64 {
    n.try_into().unwrap_or(i64::MAX)
}
