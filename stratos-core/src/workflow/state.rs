//! Run and StepEvent types: the durable shape of a single workflow run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The 12 steps of the workflow state machine, plus `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Ingest,
    Features,
    Insights,
    PatchGeneration,
    PatchProposed,
    HitlPatch,
    Apply,
    Brief,
    CampaignRun,
    Collect,
    Analyze,
    ReflectionPatch,
    HitlReflection,
    Completed,
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed)
    }

    pub fn is_hitl(&self) -> bool {
        matches!(self, WorkflowState::HitlPatch | WorkflowState::HitlReflection)
    }

    /// The step immediately following this one along the happy path. HITL
    /// states and terminal states have no successor here; resumption past
    /// them is driven by `continue()`, not by this table.
    pub fn next(&self) -> Option<WorkflowState> {
        use WorkflowState::*;
        match self {
            Ingest => Some(Features),
            Features => Some(Insights),
            Insights => Some(PatchGeneration),
            PatchGeneration => Some(PatchProposed),
            PatchProposed => Some(HitlPatch),
            Apply => Some(Brief),
            Brief => Some(CampaignRun),
            CampaignRun => Some(Collect),
            Collect => Some(Analyze),
            Analyze => Some(ReflectionPatch),
            ReflectionPatch => Some(HitlReflection),
            HitlPatch | HitlReflection | Completed | Failed => None,
        }
    }
}

/// Run status as observed from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    HitlRequired,
    Completed,
    Failed,
}

/// Step outcome recorded in a `StepEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
}

/// Append-only log entry for one step of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvent {
    pub run_id: Uuid,
    pub step_name: WorkflowState,
    pub status: StepStatus,
    #[serde(default)]
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

impl StepEvent {
    pub fn new(run_id: Uuid, step_name: WorkflowState, status: StepStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            run_id,
            step_name,
            status,
            metadata: Value::Null,
            timestamp,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Why a cancelled or failed run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Provider,
    Parse,
    Storage,
    Timeout,
    Cancelled,
}

/// One run of the 12-step pipeline for a single project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Uuid,
    pub project_id: String,
    pub status: RunStatus,
    pub current_step: WorkflowState,
    pub created_at: DateTime<Utc>,
    pub events: Vec<StepEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_patch_id: Option<Uuid>,
}

impl Run {
    pub fn new(run_id: Uuid, project_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            project_id: project_id.into(),
            status: RunStatus::Running,
            current_step: WorkflowState::Ingest,
            created_at,
            events: Vec::new(),
            error: None,
            error_type: None,
            pending_patch_id: None,
        }
    }

    pub fn record(&mut self, event: StepEvent) {
        self.events.push(event);
    }

    pub fn fail(&mut self, error: impl Into<String>, error_type: ErrorType) {
        self.status = RunStatus::Failed;
        self.current_step = WorkflowState::Failed;
        self.error = Some(error.into());
        self.error_type = Some(error_type);
    }
}
