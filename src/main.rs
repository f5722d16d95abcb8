use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use prompt_chain::trace::{self, Tracer};
use prompt_chain::{ChainConfig, OpenAiClient, RunReport, SequentialPipeline};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode> {
    // Logs go to stderr so stdout carries only the chain output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = ChainConfig::from_env();
    // The batch processor exports from its own thread with a blocking HTTP
    // client, so the provider is built and shut down outside the runtime.
    let provider = trace::otlp_tracer_provider(&config.telemetry)
        .context("Failed to build OTLP exporter")?;
    info!(
        url = %config.telemetry.traces_url(),
        service = %config.telemetry.service_name,
        "exporting traces"
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let report = runtime.block_on(run(&config, trace::tracer(&provider)));
    drop(runtime);

    if let Err(e) = provider.shutdown() {
        warn!(error = %e, "failed to flush traces");
    }

    match report?.result.into_result() {
        Ok(output) => {
            println!("Final Output: {output}");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("Error occurred\n {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(config: &ChainConfig, tracer: Tracer) -> Result<RunReport> {
    let client = OpenAiClient::from_env().context("Failed to create OpenAI client")?;
    let pipeline = SequentialPipeline::from_config(config, Arc::new(client), tracer);

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let report = pipeline
        .run_until_cancelled(config.document.clone(), &token)
        .await;
    info!(
        total_tokens = report.metrics.total_tokens,
        trace_id = %report.trace.trace_id(),
        "run complete"
    );
    Ok(report)
}
