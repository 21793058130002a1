//! Data types for the PATCH stage: `StrategyPatch`, the annotations the
//! pipeline attaches to it, and its persisted record shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Risk level attached to a sanity-gate finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    High,
    Medium,
    Low,
}

/// A single finding raised by the Sanity Gate (C6) about one action in
/// the patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanityFlag {
    pub action_id: String,
    pub reason: String,
    pub risk: Risk,
    pub recommendation: String,
}

/// The gate's overall read on the patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanityReview {
    Safe,
    ReviewRecommended,
    HighRisk,
}

/// An action the sanity gate explicitly approved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovedAction {
    pub action_id: String,
    pub reasoning: String,
}

/// Metadata the pipeline (not the LLM) attaches to a patch as it moves
/// through C5 and C6.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotations {
    #[serde(default)]
    pub heuristic_flags: Vec<String>,
    #[serde(default)]
    pub sanity_flags: Vec<SanityFlag>,
    #[serde(default)]
    pub approved_actions: Vec<ApprovedAction>,
    #[serde(default)]
    pub auto_downscoped: bool,
    #[serde(default)]
    pub requires_hitl_review: bool,
}

/// A proposed strategy patch: four recognized top-level sections (kept as
/// loosely-typed JSON since their interior shape is whatever the LLM
/// populated, following the schema's own framing of them as "recognized
/// sections" rather than fixed structs) plus pipeline-generated metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPatch {
    #[serde(default)]
    pub audience_targeting: Value,
    #[serde(default)]
    pub messaging_strategy: Value,
    #[serde(default)]
    pub channel_strategy: Value,
    #[serde(default)]
    pub budget_allocation: Value,
    #[serde(default)]
    pub annotations: Annotations,
    pub sanity_review: SanityReview,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insufficient_evidence: Option<bool>,
}

impl StrategyPatch {
    /// A fresh patch straight off the PATCH LLM call, before C5/C6 run.
    pub fn from_llm_sections(
        audience_targeting: Value,
        messaging_strategy: Value,
        channel_strategy: Value,
        budget_allocation: Value,
    ) -> Self {
        Self {
            audience_targeting,
            messaging_strategy,
            channel_strategy,
            budget_allocation,
            annotations: Annotations::default(),
            sanity_review: SanityReview::Safe,
            insufficient_evidence: None,
        }
    }
}

/// Where a persisted patch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchSource {
    Insights,
    Reflection,
    EditedLlm,
}

/// Lifecycle status of a persisted patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Proposed,
    Approved,
    Rejected,
    Superseded,
}

/// The persisted record for a patch, as the persistence collaborator
/// would store it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRecord {
    pub patch_id: Uuid,
    pub project_id: String,
    pub source: PatchSource,
    pub status: PatchStatus,
    pub patch_data: StrategyPatch,
    pub justification: String,
    pub annotations: Annotations,
    pub created_at: DateTime<Utc>,
}
