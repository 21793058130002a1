//! LLM client abstraction used by the gateway.
//!
//! This module provides a thin, provider-agnostic interface for making a
//! single completion call against whichever generative model the process
//! was configured with at startup. It does not attempt query routing,
//! multi-model cost optimization, or embeddings — those concerns belong to
//! a richer orchestration library, not to a single gateway component.
//!
//! ## Example
//!
//! ```rust,ignore
//! use stratos_core::llm::{AnthropicClient, ClientConfig, LlmGateway, TaskKind};
//!
//! let client = AnthropicClient::new(
//!     ClientConfig::new("your-api-key").with_default_model("claude-3-5-sonnet-20241022"),
//! );
//! let gateway = LlmGateway::new(Arc::new(client));
//! let text = gateway.call(TaskKind::Insights, "...").await?;
//! ```

mod client;
mod gateway;
mod types;

pub use client::{AnthropicClient, ClientConfig, LLMClient, MultiProviderClient, TrackedClient};
#[cfg(feature = "openai")]
pub use client::OpenAIClient;
pub use gateway::{
    extract_json, task_temperature, LlmCallMetric, LlmGateway, MetricsSink, NoopMetricsSink,
    TaskKind,
};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, CostTracker, ModelCosts,
    ModelSpec, Provider, StopReason, TokenUsage,
};
