//! The traced sequential pipeline executor.
//!
//! [`SequentialPipeline`] applies its steps in order, feeding each step's
//! output into the next. Every run produces one root span, one child span per
//! attempted step and, nested under each step span, one client span for the
//! backend call. The first failing step aborts the run.

use opentelemetry::trace::{
    SpanContext, SpanKind, SpanRef, Status, TraceContextExt, Tracer as _,
};
use opentelemetry::{Context, KeyValue};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ChainConfig;
use crate::context::{ContextSlot, Propagation};
use crate::generation::{Generation, TextGenerationClient, TokenUsage};
use crate::metrics::RunMetrics;
use crate::step::PipelineStep;
use crate::trace::{int, Tracer};
use crate::{Error, GenerationError, Result};

/// Name of the client span wrapped around each backend call.
pub const GENERATION_SPAN_NAME: &str = "Calling LLM API";

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Every step succeeded; holds the final state.
    Success(String),
    /// Step `step` failed; no later step ran.
    Failure {
        /// Zero-based index of the failing step.
        step: usize,
        /// The backend failure.
        cause: GenerationError,
    },
    /// The run was cancelled before or during step `step`.
    Cancelled {
        /// Zero-based index of the step that was pending or in flight.
        step: usize,
    },
}

impl ExecutionResult {
    /// Whether the run completed every step.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success(_))
    }

    /// The final state of a successful run.
    pub fn final_state(&self) -> Option<&str> {
        match self {
            ExecutionResult::Success(state) => Some(state),
            _ => None,
        }
    }

    /// Index of the step that stopped the run, if it did not succeed.
    pub fn stopped_at(&self) -> Option<usize> {
        match self {
            ExecutionResult::Success(_) => None,
            ExecutionResult::Failure { step, .. } | ExecutionResult::Cancelled { step } => {
                Some(*step)
            }
        }
    }

    /// Convert into a `Result`, mapping failures onto [`Error`].
    pub fn into_result(self) -> Result<String> {
        match self {
            ExecutionResult::Success(state) => Ok(state),
            ExecutionResult::Failure { step, cause } => Err(Error::StepFailed {
                step,
                source: cause,
            }),
            ExecutionResult::Cancelled { step } => Err(Error::Cancelled { step }),
        }
    }
}

/// Result, metrics and trace linkage of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The run's outcome.
    pub result: ExecutionResult,
    /// Token usage and step counts.
    pub metrics: RunMetrics,
    /// Context of the run's root span; its trace id names the whole run.
    pub trace: SpanContext,
}

struct StepAttempt<'a> {
    index: usize,
    step: &'a PipelineStep,
    request: String,
    cancel: Option<&'a CancellationToken>,
}

enum StepOutcome {
    Completed(Generation),
    Failed(GenerationError),
    Cancelled,
}

impl From<std::result::Result<Generation, GenerationError>> for StepOutcome {
    fn from(result: std::result::Result<Generation, GenerationError>) -> Self {
        match result {
            Ok(generation) => StepOutcome::Completed(generation),
            Err(cause) => StepOutcome::Failed(cause),
        }
    }
}

/// Runs an ordered list of [`PipelineStep`]s against evolving state.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
/// use prompt_chain::{trace, ExecutionResult, SequentialPipeline};
/// use prompt_chain::generation::{from_fn, Generation, TokenUsage};
///
/// # tokio_test::block_on(async {
/// let client = from_fn(|_model, request| {
///     let state = request.rsplit("\nInput: ").next().unwrap_or_default();
///     Ok(Generation::new(state.to_uppercase(), TokenUsage::new(5, 1)))
/// });
/// let exporter = InMemorySpanExporter::default();
/// let provider = SdkTracerProvider::builder()
///     .with_simple_exporter(exporter.clone())
///     .build();
/// let pipeline = SequentialPipeline::new(Arc::new(client), trace::tracer(&provider), "demo-model")
///     .with_steps(["uppercase the text"]);
///
/// assert_eq!(pipeline.run("hello").await, ExecutionResult::Success("HELLO".to_string()));
/// # });
/// ```
pub struct SequentialPipeline {
    name: String,
    model: String,
    steps: Vec<PipelineStep>,
    client: Arc<dyn TextGenerationClient>,
    tracer: Tracer,
    propagation: Propagation,
    generation_spans: bool,
}

impl SequentialPipeline {
    /// Create an empty pipeline calling `client` with `model` and recording into `tracer`.
    pub fn new(
        client: Arc<dyn TextGenerationClient>,
        tracer: Tracer,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: "Prompt Chain".to_string(),
            model: model.into(),
            steps: Vec::new(),
            client,
            tracer,
            propagation: Propagation::default(),
            generation_spans: true,
        }
    }

    /// Build a pipeline from the name, model and steps in `config`.
    pub fn from_config(
        config: &ChainConfig,
        client: Arc<dyn TextGenerationClient>,
        tracer: Tracer,
    ) -> Self {
        Self::new(client, tracer, config.model.clone())
            .with_name(config.name.clone())
            .with_steps(config.steps.iter().map(String::as_str))
    }

    /// Set the root span name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append one step.
    pub fn with_step(mut self, step: impl Into<PipelineStep>) -> Self {
        self.steps.push(step.into());
        self
    }

    /// Append several steps, in order.
    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PipelineStep>,
    {
        self.steps.extend(steps.into_iter().map(Into::into));
        self
    }

    /// Choose how the trace context is threaded between steps.
    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Enable or disable the nested client span around each backend call.
    pub fn with_generation_spans(mut self, enabled: bool) -> Self {
        self.generation_spans = enabled;
        self
    }

    /// Root span name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Model identifier sent with every request.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The steps, in execution order.
    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Run every step against `initial_state`.
    pub async fn run(&self, initial_state: impl Into<String>) -> ExecutionResult {
        self.execute(initial_state.into(), None).await.result
    }

    /// Run every step, returning metrics and the root span context alongside the result.
    pub async fn run_with_report(&self, initial_state: impl Into<String>) -> RunReport {
        self.execute(initial_state.into(), None).await
    }

    /// Run every step unless `token` is cancelled first.
    ///
    /// Cancellation is checked before each step and raced against each
    /// backend call; an in-flight call is dropped when the token fires.
    pub async fn run_until_cancelled(
        &self,
        initial_state: impl Into<String>,
        token: &CancellationToken,
    ) -> RunReport {
        self.execute(initial_state.into(), Some(token)).await
    }

    async fn execute(&self, initial_state: String, cancel: Option<&CancellationToken>) -> RunReport {
        let root = self
            .tracer
            .span_builder(self.name.clone())
            .with_attributes([
                KeyValue::new("prompt_chain.input", initial_state.clone()),
                KeyValue::new("prompt_chain.step_count", int(self.steps.len())),
                KeyValue::new("prompt_chain.model", self.model.clone()),
            ])
            .start_with_context(&self.tracer, &Context::new());
        let root = Context::new().with_span(root);
        let trace = root.span().span_context().clone();
        info!(
            pipeline = %self.name,
            steps = self.steps.len(),
            trace_id = %trace.trace_id(),
            "starting prompt chain"
        );

        let mut metrics = RunMetrics::default();
        let mut current = root.clone();
        let mut slot = ContextSlot::new(root.clone());
        let mut state = initial_state;

        for (index, step) in self.steps.iter().enumerate() {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                warn!(step = index, "run cancelled before step");
                let reason = format!("cancelled before step {index}");
                metrics.record_failure(reason.clone());
                end_with(&root, Status::error(reason));
                return RunReport {
                    result: ExecutionResult::Cancelled { step: index },
                    metrics,
                    trace,
                };
            }

            let attempt = StepAttempt {
                index,
                step,
                request: step.build_request(&state),
                cancel,
            };
            let outcome = match self.propagation {
                Propagation::Explicit => {
                    let (next, outcome) = self.attempt_explicit(current, attempt).await;
                    current = next;
                    outcome
                }
                Propagation::SharedRef => self.attempt_shared(&mut slot, attempt).await,
                Propagation::ByValue => self.attempt_by_value(current.clone(), attempt).await,
            };

            match outcome {
                StepOutcome::Completed(generation) => {
                    metrics.record_usage(generation.usage);
                    metrics.record_step();
                    state = generation.text;
                }
                StepOutcome::Failed(cause) => {
                    warn!(step = index, error = %cause, "prompt chain failed");
                    metrics.record_failure(format!("step {index}: {cause}"));
                    root.span().record_error(&cause);
                    end_with(&root, Status::error(format!("chain failed at step {index}")));
                    return RunReport {
                        result: ExecutionResult::Failure { step: index, cause },
                        metrics,
                        trace,
                    };
                }
                StepOutcome::Cancelled => {
                    warn!(step = index, "run cancelled during step");
                    let reason = format!("cancelled during step {index}");
                    metrics.record_failure(reason.clone());
                    end_with(&root, Status::error(reason));
                    return RunReport {
                        result: ExecutionResult::Cancelled { step: index },
                        metrics,
                        trace,
                    };
                }
            }
        }

        info!(
            steps = metrics.steps_completed,
            total_tokens = metrics.total_tokens,
            "prompt chain finished"
        );
        root.span()
            .set_attribute(KeyValue::new("prompt_chain.final_output", state.clone()));
        end_with(&root, Status::Ok);
        RunReport {
            result: ExecutionResult::Success(state),
            metrics,
            trace,
        }
    }

    async fn attempt_explicit(
        &self,
        context: Context,
        attempt: StepAttempt<'_>,
    ) -> (Context, StepOutcome) {
        let scope = self.open_step_span(&context, &attempt);
        let outcome = self.drive_step(&scope, attempt).await;
        (context, outcome)
    }

    async fn attempt_shared(&self, slot: &mut ContextSlot, attempt: StepAttempt<'_>) -> StepOutcome {
        let scope = self.open_step_span(slot.current(), &attempt);
        let parent = slot.enter(scope);
        let outcome = self.drive_step(slot.current(), attempt).await;
        slot.restore(parent);
        outcome
    }

    async fn attempt_by_value(&self, mut context: Context, attempt: StepAttempt<'_>) -> StepOutcome {
        context = self.open_step_span(&context, &attempt);
        self.drive_step(&context, attempt).await
    }

    /// Start the step's span under `parent`, returning a context scoped to it.
    fn open_step_span(&self, parent: &Context, attempt: &StepAttempt<'_>) -> Context {
        let span = self
            .tracer
            .span_builder(format!("Step {}", attempt.index))
            .with_attributes([
                KeyValue::new("step.index", int(attempt.index)),
                KeyValue::new("step.prompt", attempt.step.instruction().to_string()),
                KeyValue::new("step.input_message", attempt.request.clone()),
                KeyValue::new("step.model", self.model.clone()),
            ])
            .start_with_context(&self.tracer, parent);
        parent.with_span(span)
    }

    async fn drive_step(&self, scope: &Context, attempt: StepAttempt<'_>) -> StepOutcome {
        debug!(step = attempt.index, request_len = attempt.request.len(), "running step");
        let outcome = self.call_backend(scope, &attempt).await;

        let span = scope.span();
        match &outcome {
            StepOutcome::Completed(generation) => {
                span.set_attribute(KeyValue::new("step.output", generation.text.clone()));
                span.set_attribute(KeyValue::new(
                    "step.output_length",
                    int(generation.text.chars().count()),
                ));
                record_usage(&span, generation.usage);
                span.set_status(Status::Ok);
            }
            StepOutcome::Failed(cause) => {
                span.record_error(cause);
                span.set_status(Status::error(cause.to_string()));
            }
            StepOutcome::Cancelled => span.set_status(Status::error("cancelled")),
        }
        span.end();
        outcome
    }

    async fn call_backend(&self, scope: &Context, attempt: &StepAttempt<'_>) -> StepOutcome {
        let call = self.generation_spans.then(|| {
            let span = self
                .tracer
                .span_builder(GENERATION_SPAN_NAME)
                .with_kind(SpanKind::Client)
                .with_attributes([
                    KeyValue::new("gen_ai.system", self.client.system().to_string()),
                    KeyValue::new("gen_ai.request.model", self.model.clone()),
                ])
                .start_with_context(&self.tracer, scope);
            scope.with_span(span)
        });

        let generate = self.client.generate(&self.model, &attempt.request);
        let outcome = match attempt.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => StepOutcome::Cancelled,
                result = generate => StepOutcome::from(result),
            },
            None => StepOutcome::from(generate.await),
        };

        if let Some(call) = call {
            let span = call.span();
            match &outcome {
                StepOutcome::Completed(generation) => {
                    record_usage(&span, generation.usage);
                    span.set_status(Status::Ok);
                }
                StepOutcome::Failed(cause) => {
                    record_usage(&span, TokenUsage::default());
                    span.record_error(cause);
                    span.set_status(Status::error(cause.to_string()));
                }
                StepOutcome::Cancelled => {
                    record_usage(&span, TokenUsage::default());
                    span.set_status(Status::error("cancelled"));
                }
            }
            span.end();
        }
        outcome
    }
}

fn record_usage(span: &SpanRef<'_>, usage: TokenUsage) {
    span.set_attribute(KeyValue::new("gen_ai.usage.input_tokens", int(usage.input_tokens)));
    span.set_attribute(KeyValue::new("gen_ai.usage.output_tokens", int(usage.output_tokens)));
}

fn end_with(root: &Context, status: Status) {
    let span = root.span();
    span.set_status(status);
    span.end();
}
