//! # prompt-chain
//!
//! Traced prompt chaining: a fixed list of natural-language instructions is
//! applied one after another to a document through a text-generation
//! backend, each step's output becoming the next step's input.
//!
//! Every run is recorded as an OpenTelemetry span tree (one root span, one
//! child span per attempted step) through a [`Tracer`](trace::Tracer) that the
//! pipeline receives at construction time. Nothing is registered globally.
//!
//! ## Core Concepts
//!
//! - **PipelineStep**: One instruction and the request it builds
//! - **SequentialPipeline**: Runs steps in order, fail-fast
//! - **TextGenerationClient**: The backend seam (OpenAI, or a closure)
//! - **trace**: The OTLP tracer provider, its resource and batching
//! - **Propagation**: How the trace context moves between steps
//! - **RunMetrics**: Token usage and step counts for one run
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
//! use prompt_chain::{trace, GenerationError, SequentialPipeline};
//! use prompt_chain::generation::{from_fn, Generation, TokenUsage};
//!
//! # tokio_test::block_on(async {
//! let client = from_fn(|_model, request| {
//!     if request.starts_with("fail") {
//!         return Err(GenerationError::new("backend unavailable"));
//!     }
//!     Ok(Generation::new(format!("<{}>", request.len()), TokenUsage::new(4, 2)))
//! });
//!
//! let exporter = InMemorySpanExporter::default();
//! let provider = SdkTracerProvider::builder()
//!     .with_simple_exporter(exporter.clone())
//!     .build();
//! let pipeline = SequentialPipeline::new(Arc::new(client), trace::tracer(&provider), "demo-model")
//!     .with_steps(["first", "fail here", "never runs"]);
//!
//! let result = pipeline.run("document").await;
//! assert_eq!(result.stopped_at(), Some(1));
//!
//! // Root span plus, for each attempted step, a step span and a call span.
//! assert_eq!(exporter.get_finished_spans().unwrap().len(), 5);
//! # });
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod generation;
pub mod metrics;
pub mod pipeline;
pub mod step;
pub mod trace;

pub use config::{ChainConfig, TelemetryConfig};
pub use context::Propagation;
pub use error::{Error, GenerationError, Result};
pub use generation::{Generation, LambdaClient, OpenAiClient, TextGenerationClient, TokenUsage};
pub use metrics::RunMetrics;
pub use pipeline::{ExecutionResult, RunReport, SequentialPipeline};
pub use step::PipelineStep;
pub use trace::Tracer;
