use std::sync::{Arc, Mutex};

use opentelemetry::trace::{SpanId, Status};
use opentelemetry::{KeyValue, Value};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use prompt_chain::generation::{from_fn, Generation, TokenUsage};
use prompt_chain::{
    trace, ChainConfig, ExecutionResult, GenerationError, PipelineStep, Propagation,
    SequentialPipeline, Tracer,
};

type Requests = Arc<Mutex<Vec<String>>>;

fn in_memory_tracer() -> (Tracer, InMemorySpanExporter) {
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    (trace::tracer(&provider), exporter)
}

fn finished(exporter: &InMemorySpanExporter) -> Vec<SpanData> {
    exporter.get_finished_spans().unwrap()
}

fn attribute<'a>(span: &'a SpanData, key: &str) -> Option<&'a Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| &kv.value)
}

/// A backend that wraps the state in the instruction name and logs each request.
fn recording_pipeline(
    steps: &[&str],
    fail_on: Option<&'static str>,
) -> (SequentialPipeline, InMemorySpanExporter, Requests) {
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let log = requests.clone();
    let client = from_fn(move |_model, request| {
        log.lock().unwrap().push(request.to_string());
        let (instruction, state) = request.split_once("\nInput: ").unwrap();
        if Some(instruction) == fail_on {
            return Err(GenerationError::new(format!("{instruction} exploded")));
        }
        Ok(Generation::new(
            format!("{instruction}({state})"),
            TokenUsage::new(request.len() as u64, 1),
        ))
    });
    let (tracer, exporter) = in_memory_tracer();
    let pipeline = SequentialPipeline::new(Arc::new(client), tracer, "test-model")
        .with_steps(steps.iter().copied());
    (pipeline, exporter, requests)
}

/// Names, attributes and statuses, with ids and timestamps stripped.
fn shape(spans: &[SpanData]) -> Vec<(String, Vec<KeyValue>, Status, bool)> {
    spans
        .iter()
        .map(|s| {
            (
                s.name.to_string(),
                s.attributes.clone(),
                s.status.clone(),
                s.parent_span_id != SpanId::INVALID,
            )
        })
        .collect()
}

fn root_of(spans: &[SpanData]) -> &SpanData {
    spans
        .iter()
        .find(|s| s.parent_span_id == SpanId::INVALID)
        .unwrap()
}

fn children_of_root(spans: &[SpanData]) -> Vec<&SpanData> {
    let root = root_of(spans).span_context.span_id();
    spans
        .iter()
        .filter(|s| s.parent_span_id == root)
        .collect()
}

#[tokio::test]
async fn uppercase_scenario() {
    let client = from_fn(|_model, request| {
        assert_eq!(request, "uppercase the text\nInput: hello");
        Ok(Generation::new("HELLO", TokenUsage::new(8, 1)))
    });
    let (tracer, _exporter) = in_memory_tracer();
    let pipeline =
        SequentialPipeline::new(Arc::new(client), tracer, "test-model").with_step("uppercase the text");

    assert_eq!(
        pipeline.run("hello").await,
        ExecutionResult::Success("HELLO".to_string())
    );
}

#[tokio::test]
async fn success_equals_fold_over_steps() {
    let steps = ["a", "b", "c"];
    let (pipeline, exporter, requests) = recording_pipeline(&steps, None);

    let result = pipeline.run("doc").await;

    let expected = steps.iter().fold("doc".to_string(), |state, instruction| {
        format!("{instruction}({state})")
    });
    assert_eq!(result, ExecutionResult::Success(expected.clone()));
    assert_eq!(expected, "c(b(a(doc)))");

    let expected_requests: Vec<String> = vec![
        PipelineStep::new("a").build_request("doc"),
        PipelineStep::new("b").build_request("a(doc)"),
        PipelineStep::new("c").build_request("b(a(doc))"),
    ];
    assert_eq!(*requests.lock().unwrap(), expected_requests);

    let spans = finished(&exporter);
    let root = root_of(&spans);
    assert_eq!(root.status, Status::Ok);
    assert_eq!(
        attribute(root, "prompt_chain.final_output"),
        Some(&Value::from("c(b(a(doc)))"))
    );
}

#[tokio::test]
async fn failure_stops_before_later_steps() {
    let (pipeline, exporter, requests) = recording_pipeline(&["A", "B", "C"], Some("B"));

    let result = pipeline.run("x").await;

    assert_eq!(
        result,
        ExecutionResult::Failure {
            step: 1,
            cause: GenerationError::new("B exploded"),
        }
    );
    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| !r.starts_with("C\n")));

    let spans = finished(&exporter);
    let steps = children_of_root(&spans);
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].status, Status::Ok);
    assert_eq!(steps[1].status, Status::error("B exploded"));
    assert!(matches!(root_of(&spans).status, Status::Error { .. }));
}

#[tokio::test]
async fn one_closed_span_per_attempted_step() {
    for (fail_on, attempted) in [(None, 4), (Some("s0"), 1), (Some("s2"), 3)] {
        let (pipeline, exporter, _) = recording_pipeline(&["s0", "s1", "s2", "s3"], fail_on);
        let result = pipeline.run("in").await;

        let spans = finished(&exporter);
        let steps = children_of_root(&spans);
        assert_eq!(steps.len(), attempted);
        assert!(steps.iter().all(|s| s.status != Status::Unset));
        assert_eq!(
            spans
                .iter()
                .filter(|s| s.parent_span_id == SpanId::INVALID)
                .count(),
            1
        );
        assert_eq!(root_of(&spans).status == Status::Ok, result.is_success());
    }
}

#[tokio::test]
async fn empty_pipeline_emits_only_root() {
    let (pipeline, exporter, requests) = recording_pipeline(&[], None);

    assert_eq!(pipeline.run("X").await, ExecutionResult::Success("X".to_string()));
    assert!(requests.lock().unwrap().is_empty());

    let spans = finished(&exporter);
    assert_eq!(spans.len(), 1);
    assert_eq!(
        attribute(&spans[0], "prompt_chain.step_count"),
        Some(&Value::I64(0))
    );
}

#[tokio::test]
async fn empty_instruction_still_runs() {
    let (pipeline, _, requests) = recording_pipeline(&[""], None);

    assert_eq!(pipeline.run("s").await, ExecutionResult::Success("(s)".to_string()));
    assert_eq!(*requests.lock().unwrap(), vec!["\nInput: s".to_string()]);
}

#[tokio::test]
async fn repeated_runs_are_identical() {
    let (pipeline, exporter, _) = recording_pipeline(&["one", "two"], None);

    let first = pipeline.run("same").await;
    let first_spans = finished(&exporter);
    exporter.reset();
    let second = pipeline.run("same").await;
    let second_spans = finished(&exporter);

    assert_eq!(first, second);
    assert_eq!(shape(&first_spans), shape(&second_spans));
    assert_ne!(
        first_spans[0].span_context.trace_id(),
        second_spans[0].span_context.trace_id()
    );
}

#[tokio::test]
async fn propagation_policies_produce_the_same_tree() {
    let mut shapes = Vec::new();
    for propagation in [
        Propagation::Explicit,
        Propagation::SharedRef,
        Propagation::ByValue,
    ] {
        let (pipeline, exporter, _) = recording_pipeline(&["p", "q", "r"], Some("r"));
        let pipeline = pipeline.with_propagation(propagation);
        let result = pipeline.run("seed").await;
        assert_eq!(result.stopped_at(), Some(2));

        let spans = finished(&exporter);
        let root = root_of(&spans).span_context.span_id();
        // Every step is a direct child of the root, never of the previous step.
        let steps = children_of_root(&spans);
        assert_eq!(steps.len(), 3);
        assert!(spans
            .iter()
            .filter(|s| s.name.starts_with("Step "))
            .all(|s| s.parent_span_id == root));
        // Siblings never overlap in time.
        for pair in steps.windows(2) {
            assert!(pair[0].end_time <= pair[1].start_time);
        }
        shapes.push(shape(&spans));
    }
    assert_eq!(shapes[0], shapes[1]);
    assert_eq!(shapes[1], shapes[2]);
}

#[tokio::test]
async fn pipeline_from_config_uses_its_steps_and_model() {
    let models = Arc::new(Mutex::new(Vec::new()));
    let seen = models.clone();
    let client = from_fn(move |model, request| {
        seen.lock().unwrap().push(model.to_string());
        Ok(Generation::new(request.len().to_string(), TokenUsage::default()))
    });
    let config = ChainConfig::default()
        .with_model("configured-model")
        .with_steps(["first", "second"])
        .with_document("text");
    let (tracer, exporter) = in_memory_tracer();
    let pipeline = SequentialPipeline::from_config(&config, Arc::new(client), tracer);

    let report = pipeline.run_with_report(config.document.clone()).await;

    assert!(report.result.is_success());
    assert_eq!(report.metrics.steps_completed, 2);
    assert_eq!(*models.lock().unwrap(), vec!["configured-model"; 2]);
    let spans = finished(&exporter);
    assert_eq!(root_of(&spans).name, "Prompt Chain");
    assert_eq!(
        root_of(&spans).span_context.trace_id(),
        report.trace.trace_id()
    );
}
