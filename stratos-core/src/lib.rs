//! # stratos-core
//!
//! The LLM orchestration core for a marketing strategy system: it ingests
//! heterogeneous tabular artifacts and drives a multi-stage LLM pipeline
//! that produces a ranked set of strategic insights plus a validated,
//! annotated strategy patch awaiting human approval.
//!
//! ## Core components
//!
//! - [`schema`] — classifies tabular columns into dimensions and metric
//!   roles (C1).
//! - [`mechanics`] — static metric-to-lever reference injected into
//!   prompts (C2).
//! - [`llm`] — the gateway that makes per-task-temperature model calls and
//!   the tolerant JSON extractor every caller shares (C3).
//! - [`insights`] — deterministic rubric scoring and top-k selection over
//!   candidate insights (C4).
//! - [`patch`] — strategy patch types, heuristic filters with
//!   auto-downscope (C5), and the LLM sanity gate (C6).
//! - [`workflow`] — the 12-step state machine that drives a run and
//!   suspends at its two human-in-the-loop checkpoints (C7).
//! - [`orchestrator`] — the six-operation facade wiring the above.
//! - [`persistence`] — the durable-store contract the engine and
//!   orchestrator read and write through.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stratos_core::config::Config;
//! use stratos_core::llm::{AnthropicClient, ClientConfig, LlmGateway};
//! use stratos_core::orchestrator::StrategyOrchestrator;
//! use stratos_core::persistence::InMemoryPersistence;
//! use stratos_core::workflow::WorkflowEngine;
//!
//! let config = Config::default();
//! let client = AnthropicClient::new(ClientConfig::new("api-key"));
//! let gateway = LlmGateway::new(Arc::new(client)).with_config(config.clone());
//! let orchestrator = Arc::new(StrategyOrchestrator::new(gateway));
//! let persistence = Arc::new(InMemoryPersistence::new());
//! let engine = Arc::new(WorkflowEngine::new(orchestrator, persistence, config));
//! let run_id = engine.start("project-123");
//! ```

pub mod config;
pub mod error;
pub mod features;
pub mod insights;
pub mod llm;
pub mod mechanics;
pub mod orchestrator;
pub mod patch;
pub mod persistence;
pub mod schema;
pub mod validation;
pub mod workflow;

pub use config::Config;
pub use error::{Error, Result};
pub use features::FeaturesBundle;
pub use insights::{
    score, select_top, validate as validate_insight, DataSupport, Direction, ExpectedEffect,
    InsightCandidate, InsightsResult, Magnitude, PrimaryLever,
};
pub use llm::{
    extract_json, task_temperature, AnthropicClient, ClientConfig, LLMClient, LlmGateway,
    MetricsSink, MultiProviderClient, Provider, TaskKind, TrackedClient,
};
pub use mechanics::{get_mechanics_for_metric, validate_lever_choice};
pub use orchestrator::{Orchestrator, StrategyOrchestrator};
pub use patch::{
    downscope_if_needed, should_block, validate_patch, PatchRecord, PatchSource, PatchStatus,
    SanityFlag, SanityReview, StrategyPatch,
};
pub use persistence::{InMemoryPersistence, PersistenceClient};
pub use schema::{detect, DataSchema, Metric, MetricRole};
pub use workflow::{HitlAction, Run, RunStatus, StepEvent, WorkflowEngine, WorkflowState};
