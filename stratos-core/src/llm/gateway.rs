//! The LLM Gateway: the single seam through which every other component
//! talks to the configured generative model.
//!
//! Callers never see HTTP, retries, or provider quirks — they pick a
//! [`TaskKind`], hand over a prompt, and get back response text (or,
//! via [`extract_json`], a parsed JSON value). The gateway itself never
//! retries: a failed call is a failed call, and it is the caller's job to
//! decide whether to fall back or surface the error.

use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::error::{Error, Result};

use super::client::LLMClient;
use super::types::{ChatMessage, CompletionRequest, Provider};

/// One of the six kinds of LLM call the orchestrator facade makes. Each
/// carries its own sampling temperature, since extraction and filtering
/// tasks want near-deterministic output while insight/brief generation
/// wants a little more variety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Features,
    Insights,
    Patch,
    Edit,
    Brief,
    Analyze,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Features => "extract_features",
            TaskKind::Insights => "generate_insights",
            TaskKind::Patch => "generate_patch",
            TaskKind::Edit => "edit_patch",
            TaskKind::Brief => "compile_brief",
            TaskKind::Analyze => "analyze_performance",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sampling temperature for a task. Extraction/patch tasks want the model
/// to stay close to the data; insight/brief generation gets a little more
/// room to phrase things well.
pub fn task_temperature(task: TaskKind) -> f64 {
    match task {
        TaskKind::Features => 0.2,
        TaskKind::Insights => 0.35,
        TaskKind::Patch => 0.2,
        TaskKind::Edit => 0.2,
        TaskKind::Brief => 0.3,
        TaskKind::Analyze => 0.35,
    }
}

/// A single gateway call, emitted after every `call()` whether it
/// succeeded or not. The host application decides where this goes
/// (metrics backend, log aggregator, nowhere); this crate just produces
/// the record.
#[derive(Debug, Clone)]
pub struct LlmCallMetric {
    pub task: TaskKind,
    pub provider: Provider,
    pub model: String,
    pub temperature: f64,
    pub latency_ms: u64,
    pub prompt_length: usize,
    pub response_length: usize,
    pub success: bool,
    pub error: Option<String>,
}

/// Destination for [`LlmCallMetric`] records. Kept as a trait, mirroring
/// how this crate never assumes a concrete logging/metrics backend.
pub trait MetricsSink: Send + Sync {
    fn record(&self, metric: LlmCallMetric);
}

/// A `MetricsSink` that discards everything; the default for callers who
/// don't need call-level metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record(&self, _metric: LlmCallMetric) {}
}

/// The LLM Gateway. Wraps a single `LLMClient` (the provider selected at
/// process start) and layers the task/temperature contract and metrics
/// emission on top of it.
pub struct LlmGateway {
    client: Arc<dyn LLMClient>,
    metrics: Arc<dyn MetricsSink>,
    debug: bool,
    config: Option<Config>,
}

impl LlmGateway {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            metrics: Arc::new(NoopMetricsSink),
            debug: false,
            config: None,
        }
    }

    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    /// Log full prompt/response text instead of just lengths.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Apply `config.model_for(task)` to every call this gateway makes.
    /// Without a config, each call uses the client's default model.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Make a single completion call for `task` with `prompt`, at the
    /// task's configured temperature. Does not retry.
    #[instrument(skip(self, prompt), fields(task = %task))]
    pub async fn call(&self, task: TaskKind, prompt: &str) -> Result<String> {
        let temperature = task_temperature(task);
        let mut request = CompletionRequest::new()
            .with_message(ChatMessage::user(prompt))
            .with_temperature(temperature);
        if let Some(model) = self.config.as_ref().and_then(|c| c.model_for(task)) {
            request = request.with_model(model);
        }

        if self.debug {
            debug!(%task, prompt, "llm gateway call");
        } else {
            debug!(%task, prompt_length = prompt.len(), "llm gateway call");
        }

        let started = Instant::now();
        let result = self.client.complete(request).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                if self.debug {
                    debug!(%task, response = %response.content, "llm gateway response");
                }
                self.metrics.record(LlmCallMetric {
                    task,
                    provider: self.client.provider(),
                    model: response.model.clone(),
                    temperature,
                    latency_ms,
                    prompt_length: prompt.len(),
                    response_length: response.content.len(),
                    success: true,
                    error: None,
                });
                Ok(response.content)
            }
            Err(err) => {
                warn!(%task, error = %err, "llm gateway call failed");
                self.metrics.record(LlmCallMetric {
                    task,
                    provider: self.client.provider(),
                    model: String::new(),
                    temperature,
                    latency_ms,
                    prompt_length: prompt.len(),
                    response_length: 0,
                    success: false,
                    error: Some(err.to_string()),
                });
                Err(err)
            }
        }
    }
}

/// Tolerantly extract a JSON value from LLM response text.
///
/// LLMs rarely return bare JSON reliably; this tries, in order:
/// 1. A fenced code block (```json ... ``` or ``` ... ```).
/// 2. The whole trimmed text parsed as-is.
/// 3. A balanced-brace scan that finds the largest `{...}` span and
///    parses that.
///
/// Returns `Error::Parse` if none of the three strategies produce valid
/// JSON.
pub fn extract_json(text: &str) -> Result<Value> {
    if let Some(value) = extract_fenced_json(text) {
        return Ok(value);
    }

    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(value) = extract_largest_brace_span(text) {
        return Ok(value);
    }

    Err(Error::parse(
        "could not find a parseable JSON object in the LLM response",
    ))
}

fn fence_pattern() -> Regex {
    Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)```").expect("static regex is valid")
}

fn extract_fenced_json(text: &str) -> Option<Value> {
    let re = fence_pattern();
    for capture in re.captures_iter(text) {
        let candidate = capture.get(1)?.as_str().trim();
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return Some(value);
        }
    }
    None
}

/// Scan for the largest balanced `{...}` span and try to parse it. Falls
/// back to progressively smaller spans starting at each `{` if the
/// largest one doesn't parse (truncated output, trailing commentary).
fn extract_largest_brace_span(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut best: Option<Value> = None;
    let mut best_len = 0usize;

    for start in 0..bytes.len() {
        if bytes[start] != b'{' {
            continue;
        }
        let mut depth = 0i32;
        let mut in_string = false;
        let mut escaped = false;
        for (offset, &byte) in bytes[start..].iter().enumerate() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if byte == b'\\' {
                    escaped = true;
                } else if byte == b'"' {
                    in_string = false;
                }
                continue;
            }
            match byte {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let end = start + offset + 1;
                        let span = &text[start..end];
                        if span.len() > best_len {
                            if let Ok(value) = serde_json::from_str::<Value>(span) {
                                best = Some(value);
                                best_len = span.len();
                            }
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::{CompletionResponse, ModelSpec, StopReason, TokenUsage};
    use async_trait::async_trait;
    use chrono::Utc;

    /// Echoes the model the request was built with back as the response
    /// content, so the test can observe whether `Config::model_for` made it
    /// onto the wire.
    struct EchoModelClient;

    #[async_trait]
    impl LLMClient for EchoModelClient {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            Ok(CompletionResponse {
                id: "echo".to_string(),
                content: request.model.clone().unwrap_or_default(),
                model: request.model.unwrap_or_default(),
                stop_reason: Some(StopReason::EndTurn),
                usage: TokenUsage {
                    input_tokens: 0,
                    output_tokens: 0,
                },
                timestamp: Utc::now(),
                cost: None,
            })
        }

        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        fn available_models(&self) -> Vec<ModelSpec> {
            vec![ModelSpec::claude_sonnet()]
        }
    }

    #[tokio::test]
    async fn config_model_override_is_applied_to_the_request() {
        let mut config = Config::default();
        config
            .task_models
            .insert(TaskKind::Insights.as_str().to_string(), "claude-haiku".to_string());

        let gateway = LlmGateway::new(Arc::new(EchoModelClient)).with_config(config);
        let model_used = gateway.call(TaskKind::Insights, "prompt").await.unwrap();
        assert_eq!(model_used, "claude-haiku");
    }

    #[tokio::test]
    async fn task_without_a_configured_model_leaves_the_request_unset() {
        let gateway = LlmGateway::new(Arc::new(EchoModelClient)).with_config(Config::default());
        let model_used = gateway.call(TaskKind::Brief, "prompt").await.unwrap();
        assert_eq!(model_used, "");
    }

    #[test]
    fn test_task_temperatures() {
        assert_eq!(task_temperature(TaskKind::Features), 0.2);
        assert_eq!(task_temperature(TaskKind::Insights), 0.35);
        assert_eq!(task_temperature(TaskKind::Patch), 0.2);
        assert_eq!(task_temperature(TaskKind::Edit), 0.2);
        assert_eq!(task_temperature(TaskKind::Brief), 0.3);
        assert_eq!(task_temperature(TaskKind::Analyze), 0.35);
    }

    #[test]
    fn test_extract_bare_json() {
        let text = r#"{"a": 1, "b": "two"}"#;
        let value = extract_json(text).unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(value["b"], "two");
    }

    #[test]
    fn test_extract_fenced_json() {
        let text = "Here is the result:\n```json\n{\"a\": 1}\n```\nHope that helps!";
        let value = extract_json(text).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_extract_fenced_json_no_language_tag() {
        let text = "```\n{\"ok\": true}\n```";
        let value = extract_json(text).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_extract_from_brace_scan_with_surrounding_prose() {
        let text = "Sure, here's my analysis: {\"score\": 7, \"notes\": \"good\"} let me know if you need more.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["score"], 7);
    }

    #[test]
    fn test_extract_prefers_largest_object() {
        let text = r#"junk {"small": 1} more junk {"big": {"nested": true}, "extra": 2} trailing"#;
        let value = extract_json(text).unwrap();
        assert_eq!(value["extra"], 2);
    }

    #[test]
    fn test_extract_json_fails_on_garbage() {
        let text = "I cannot help with that request.";
        assert!(extract_json(text).is_err());
    }

    #[test]
    fn test_task_kind_display() {
        assert_eq!(TaskKind::Features.to_string(), "extract_features");
        assert_eq!(TaskKind::Analyze.to_string(), "analyze_performance");
    }
}
