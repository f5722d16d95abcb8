//! Run configuration.
//!
//! Everything here is plain data owned by the caller. [`ChainConfig::default`]
//! carries the quarterly-report example: four data-processing instructions
//! and the report they are applied to.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::Result;

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "gpt-5-mini";

/// Default OTLP/HTTP collector address.
pub const DEFAULT_OTLP_ENDPOINT: &str = "localhost:4318";

/// Largest export batch; the SDK's span queue holds 2048 spans.
pub const MAX_EXPORT_BATCH_SIZE: usize = 2048;

const DATA_PROCESSING_STEPS: [&str; 4] = [
    "Extract only the numerical values and their associated metrics from the text.
Format each as 'value: metric' on a new line.
Example format:
92: customer satisfaction
45%: revenue growth",
    "Convert all numerical values to percentages where possible.
If not a percentage or points, convert to decimal (e.g., 92 points -> 92%).
Keep one number per line.
Example format:
92%: customer satisfaction
45%: revenue growth",
    "Sort all lines in descending order by numerical value.
Keep the format 'value: metric' on each line.
Example:
92%: customer satisfaction
87%: employee satisfaction",
    "Format the sorted data as a markdown table with columns:
| Metric | Value |
|:--|--:|
| Customer Satisfaction | 92% |",
];

const QUARTERLY_REPORT: &str = "Q3 Performance Summary:
Our customer satisfaction score rose to 92 points this quarter.
Revenue grew by 45% compared to last year.
Market share is now at 23% in our primary market.
Customer churn decreased to 5% from 8%.
New user acquisition cost is $43 per user.
Product adoption rate increased to 78%.
Employee satisfaction is at 87 points.
Operating margin improved to 34%.";

/// Where and how spans are exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Collector `host:port`.
    pub endpoint: String,
    /// `service.name` resource attribute.
    pub service_name: String,
    /// `service.version` resource attribute.
    pub service_version: String,
    /// `deployment.environment.name` resource attribute.
    pub environment: String,
    /// Spans per export request.
    pub max_batch_size: usize,
    /// Milliseconds between scheduled flushes.
    pub scheduled_delay_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: "prompt-chain".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "staging".to_string(),
            max_batch_size: 512,
            scheduled_delay_ms: 5_000,
        }
    }
}

impl TelemetryConfig {
    /// Set the collector endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the service name.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the deployment environment label.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Full URL of the OTLP traces endpoint.
    ///
    /// A bare `host:port` is assumed to be plain HTTP.
    pub fn traces_url(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{base}/v1/traces")
        } else {
            format!("http://{base}/v1/traces")
        }
    }

    /// Spans per export request, clamped to `1..=MAX_EXPORT_BATCH_SIZE`.
    pub fn export_batch_size(&self) -> usize {
        self.max_batch_size.clamp(1, MAX_EXPORT_BATCH_SIZE)
    }

    /// Interval between scheduled exports; never shorter than one millisecond.
    pub fn scheduled_delay(&self) -> Duration {
        Duration::from_millis(self.scheduled_delay_ms.max(1))
    }
}

/// Everything a single pipeline run needs, apart from the backend client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Root span name.
    pub name: String,
    /// Model identifier passed to the backend on every step.
    pub model: String,
    /// Instructions, applied in order.
    pub steps: Vec<String>,
    /// The initial document.
    pub document: String,
    /// Telemetry export settings.
    pub telemetry: TelemetryConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            name: "Prompt Chain".to_string(),
            model: DEFAULT_MODEL.to_string(),
            steps: DATA_PROCESSING_STEPS.iter().map(|s| s.to_string()).collect(),
            document: QUARTERLY_REPORT.to_string(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl ChainConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Defaults overridden by process environment variables.
    pub fn from_env() -> Self {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`.
    ///
    /// Recognised keys: `PROMPT_CHAIN_MODEL`, `PROMPT_CHAIN_ENVIRONMENT`,
    /// `OTEL_EXPORTER_OTLP_ENDPOINT` and `OTEL_SERVICE_NAME`. Empty values
    /// are ignored.
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(model) = get("PROMPT_CHAIN_MODEL") {
            self.model = model;
        }
        if let Some(environment) = get("PROMPT_CHAIN_ENVIRONMENT") {
            self.telemetry.environment = environment;
        }
        if let Some(endpoint) = get("OTEL_EXPORTER_OTLP_ENDPOINT") {
            self.telemetry.endpoint = endpoint;
        }
        if let Some(service) = get("OTEL_SERVICE_NAME") {
            self.telemetry.service_name = service;
        }
        self
    }

    /// Set the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Replace the step instructions.
    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the initial document.
    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = document.into();
        self
    }
}
