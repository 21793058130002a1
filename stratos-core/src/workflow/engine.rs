//! Workflow Engine (C7): drives the 12-step state machine for a run,
//! suspending at the two HITL checkpoints and journaling every transition
//! as a `StepEvent`.
//!
//! Single-threaded cooperative execution per run; the engine awaits one
//! LLM step at a time and holds a coarse per-project mutex for the
//! duration of each active step so at most one run mutates a given
//! project concurrently. Many runs on different projects may proceed in
//! parallel tokio tasks.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::insights::{DataSupport, InsightsResult};
use crate::orchestrator::{Orchestrator, PatchOutcome};
use crate::patch::{PatchSource, PatchStatus};
use crate::persistence::PersistenceClient;

use super::state::{ErrorType, Run, RunStatus, StepEvent, StepStatus, WorkflowState};

/// Minimum number of selected insights below which a run is considered
/// evidence-starved; surfaced as `insufficient_insights` on the `Insights`
/// step's metadata so a host can flag the run for review.
const MIN_SUFFICIENT_INSIGHTS: usize = 3;

/// Metadata recorded on the `Insights` step's completion event: candidate
/// counts broken down by data support, plus the resulting evidence rate.
fn insights_metadata(insights: &InsightsResult) -> Value {
    let mut strong = 0usize;
    let mut moderate = 0usize;
    let mut weak = 0usize;
    for candidate in &insights.insights {
        match candidate.data_support {
            DataSupport::Strong => strong += 1,
            DataSupport::Moderate => moderate += 1,
            DataSupport::Weak => weak += 1,
        }
    }
    let total = insights.insights.len();
    let insufficient_evidence_rate = if total == 0 {
        0.0
    } else {
        weak as f64 / total as f64
    };
    let insufficient_insights = total < MIN_SUFFICIENT_INSIGHTS;
    if insufficient_insights {
        warn!(
            selected = total,
            "fewer than {MIN_SUFFICIENT_INSIGHTS} valid insights selected, flagging run"
        );
    }

    json!({
        "candidates_evaluated": insights.candidates_evaluated,
        "data_support_counts": {"strong": strong, "moderate": moderate, "weak": weak},
        "insufficient_evidence_rate": insufficient_evidence_rate,
        "insufficient_insights": insufficient_insights,
    })
}

/// Metadata recorded on the `PatchGeneration` step's completion event.
fn patch_metadata(outcome: &PatchOutcome) -> Value {
    json!({
        "heuristic_flags_count": outcome.heuristic_flags_count,
        "sanity_flags_count": outcome.sanity_flags_count,
        "passed_validation": outcome.passed_validation,
        "auto_downscoped": outcome.auto_downscoped,
        "requires_hitl_review": outcome.patch.annotations.requires_hitl_review,
    })
}

/// Action a human takes on an HITL-suspended run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitlAction {
    Approve,
    Reject,
    Edit,
}

/// A snapshot of run status, as returned by the run control surface.
#[derive(Debug, Clone)]
pub struct RunStatusView {
    pub run_status: RunStatus,
    pub current_step: WorkflowState,
    pub pending_patch_id: Option<Uuid>,
    pub error: Option<String>,
}

/// Drives runs forward through the state machine on behalf of a single
/// process. Holds the in-memory run table (the authoritative source of
/// transient state) plus references to the orchestrator and persistence
/// collaborators every step needs.
pub struct WorkflowEngine {
    orchestrator: Arc<dyn Orchestrator>,
    persistence: Arc<dyn PersistenceClient>,
    config: Config,
    runs: Mutex<HashMap<Uuid, Run>>,
    project_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkflowEngine {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        persistence: Arc<dyn PersistenceClient>,
        config: Config,
    ) -> Self {
        Self {
            orchestrator,
            persistence,
            config,
            runs: Mutex::new(HashMap::new()),
            project_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn project_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.project_locks.lock().await;
        locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn log_step(&self, run: &mut Run, step: WorkflowState, status: StepStatus, metadata: Value) {
        let event = StepEvent::new(run.run_id, step, status, Utc::now()).with_metadata(metadata);
        run.record(event.clone());
        if let Err(e) = self.persistence.log_step_event(&run.project_id, event).await {
            warn!(error = %e, "failed to journal step event");
        }
    }

    /// Create a new run in `INGEST` and drive it forward to the first
    /// suspend point or terminal state. Returns the new run's id
    /// immediately after that first pause; the caller observes progress
    /// through `status`/`events`.
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>, project_id: &str) -> Result<Uuid> {
        let run_id = Uuid::new_v4();
        let run = Run::new(run_id, project_id, Utc::now());
        self.runs.lock().await.insert(run_id, run);

        let engine = Arc::clone(self);
        let project_id = project_id.to_string();
        tokio::spawn(async move {
            engine.drive(run_id, &project_id).await;
        });

        Ok(run_id)
    }

    /// Resume an HITL-suspended run. Validates `patch_id` is the current
    /// pending patch before dispatching on `action`.
    ///
    /// If the run isn't in the in-memory table (e.g. after a process
    /// restart), it's rebuilt from the project's persisted `StepEvent`s and
    /// its pending patch record before validation — `continue_run` works on
    /// a fresh process exactly as it does on the one that suspended the run,
    /// provided the last step event and patch are durable.
    #[instrument(skip(self, edit_request))]
    pub async fn continue_run(
        self: &Arc<Self>,
        project_id: &str,
        patch_id: Uuid,
        action: HitlAction,
        edit_request: Option<String>,
    ) -> Result<()> {
        let found = {
            let runs = self.runs.lock().await;
            runs.values()
                .find(|r| r.project_id == project_id && r.status == RunStatus::HitlRequired)
                .cloned()
        };

        let run = match found {
            Some(run) => run,
            None => {
                let recovered = self
                    .recover_run(project_id)
                    .await?
                    .ok_or_else(|| Error::conflict("no run awaiting HITL input for this project"))?;
                info!(
                    run_id = %recovered.run_id,
                    project_id,
                    "recovered HITL-suspended run from persisted state"
                );
                self.runs.lock().await.insert(recovered.run_id, recovered.clone());
                recovered
            }
        };

        if run.pending_patch_id != Some(patch_id) {
            return Err(Error::conflict("patch_id does not match the pending patch"));
        }

        let engine = Arc::clone(self);
        let project_id = project_id.to_string();
        tokio::spawn(async move {
            engine
                .drive_from_hitl(&project_id, patch_id, action, edit_request)
                .await;
        });

        Ok(())
    }

    /// Reconstruct a suspended `Run` from persisted state when it's absent
    /// from the in-memory table. Only recovers runs genuinely awaiting HITL
    /// review: a project with no pending (`Proposed`) patch, or no logged
    /// step events, has nothing to resume.
    async fn recover_run(&self, project_id: &str) -> Result<Option<Run>> {
        let pending_patch = match self.persistence.get_active_patch(project_id).await? {
            Some(record) if record.status == PatchStatus::Proposed => record,
            _ => return Ok(None),
        };

        let all_events = self.persistence.get_step_events(project_id).await?;
        let Some(run_id) = all_events.last().map(|e| e.run_id) else {
            return Ok(None);
        };
        let events: Vec<StepEvent> = all_events
            .into_iter()
            .filter(|e| e.run_id == run_id)
            .collect();
        let created_at = events.first().map(|e| e.timestamp).unwrap_or_else(Utc::now);

        let mut run = Run::new(run_id, project_id, created_at);
        run.events = events;
        run.status = RunStatus::HitlRequired;
        run.current_step = WorkflowState::HitlPatch;
        run.pending_patch_id = Some(pending_patch.patch_id);
        Ok(Some(run))
    }

    pub async fn status(&self, run_id: Uuid) -> Option<RunStatusView> {
        let runs = self.runs.lock().await;
        runs.get(&run_id).map(|r| RunStatusView {
            run_status: r.status,
            current_step: r.current_step,
            pending_patch_id: r.pending_patch_id,
            error: r.error.clone(),
        })
    }

    pub async fn events(&self, run_id: Uuid) -> Vec<StepEvent> {
        let runs = self.runs.lock().await;
        runs.get(&run_id).map(|r| r.events.clone()).unwrap_or_default()
    }

    /// External cancellation: transitions the run to `failed` with
    /// `error_type=cancelled`. Any in-flight step is allowed to finish;
    /// its result is simply discarded since the run table already
    /// reflects `failed`.
    pub async fn cancel(&self, run_id: Uuid) -> Result<()> {
        let mut runs = self.runs.lock().await;
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| Error::conflict("unknown run"))?;
        run.fail("cancelled by caller", ErrorType::Cancelled);
        Ok(())
    }

    async fn drive(&self, run_id: Uuid, project_id: &str) {
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;

        if let Err(e) = self.run_ingest_through_hitl(run_id, project_id).await {
            self.fail_run(run_id, &e).await;
        }
    }

    async fn fail_run(&self, run_id: Uuid, error: &Error) {
        let mut runs = self.runs.lock().await;
        if let Some(run) = runs.get_mut(&run_id) {
            let error_type = match error {
                Error::Provider { .. } => ErrorType::Provider,
                Error::Parse(_) => ErrorType::Parse,
                Error::Storage(_) => ErrorType::Storage,
                Error::Timeout { .. } => ErrorType::Timeout,
                Error::Cancelled(_) => ErrorType::Cancelled,
                _ => ErrorType::Storage,
            };
            run.fail(error.to_string(), error_type);
            error!(run_id = %run_id, error = %error, "run failed");
        }
    }

    async fn run_step<F, T>(&self, run_id: Uuid, step: WorkflowState, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        self.run_step_with_metadata(run_id, step, fut, |_| Value::Null).await
    }

    /// Like `run_step`, but runs `metadata_fn` over the successful result to
    /// build the `Completed` event's metadata — used by steps whose wire
    /// contract requires structured bookkeeping (insights, patch generation)
    /// beyond a bare completion marker.
    async fn run_step_with_metadata<F, T, M>(
        &self,
        run_id: Uuid,
        step: WorkflowState,
        fut: F,
        metadata_fn: M,
    ) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
        M: FnOnce(&T) -> Value,
    {
        {
            let mut runs = self.runs.lock().await;
            let run = runs.get_mut(&run_id).expect("run exists for its own steps");
            run.current_step = step;
            log_started(run, step);
        }
        self.persist_last_event(run_id).await;

        let result = timeout(self.config.soft_step_timeout(), fut)
            .await
            .map_err(|_| Error::timeout(self.config.soft_step_timeout().as_millis() as u64))
            .and_then(|inner| inner);

        let mut runs = self.runs.lock().await;
        let run = runs.get_mut(&run_id).expect("run exists for its own steps");
        match &result {
            Ok(value) => run.record(
                StepEvent::new(run_id, step, StepStatus::Completed, Utc::now())
                    .with_metadata(metadata_fn(value)),
            ),
            Err(e) => run.record(
                StepEvent::new(run_id, step, StepStatus::Failed, Utc::now())
                    .with_metadata(json!({"error": e.to_string()})),
            ),
        }
        drop(runs);
        self.persist_last_event(run_id).await;

        result
    }

    async fn persist_last_event(&self, run_id: Uuid) {
        let (project_id, event) = {
            let runs = self.runs.lock().await;
            let run = runs.get(&run_id).expect("run exists for its own steps");
            (run.project_id.clone(), run.events.last().cloned())
        };
        if let Some(event) = event {
            if let Err(e) = self.persistence.log_step_event(&project_id, event).await {
                warn!(error = %e, "failed to journal step event");
            }
        }
    }

    async fn run_ingest_through_hitl(&self, run_id: Uuid, project_id: &str) -> Result<()> {
        let artifacts = self
            .run_step(run_id, WorkflowState::Ingest, async {
                self.persistence.get_artifacts(project_id).await
            })
            .await?;
        let features = self
            .run_step(run_id, WorkflowState::Features, async {
                self.orchestrator.extract_features(&artifacts).await
            })
            .await?;
        self.persistence
            .create_snapshot(project_id, features.as_value())
            .await?;

        let insights = self
            .run_step_with_metadata(
                run_id,
                WorkflowState::Insights,
                async { self.orchestrator.generate_insights(&features).await },
                insights_metadata,
            )
            .await?;

        let patch_outcome = self
            .run_step_with_metadata(
                run_id,
                WorkflowState::PatchGeneration,
                async { self.orchestrator.generate_patch(&insights).await },
                patch_metadata,
            )
            .await?;

        let justification = format!(
            "generated from {} insights",
            insights.insights.len()
        );
        let patch_id = self
            .run_step(run_id, WorkflowState::PatchProposed, async {
                self.persistence
                    .create_patch(
                        project_id,
                        PatchSource::Insights,
                        patch_outcome.patch.clone(),
                        justification,
                        patch_outcome.patch.annotations.clone(),
                    )
                    .await
            })
            .await?;

        let mut runs = self.runs.lock().await;
        let run = runs.get_mut(&run_id).expect("run exists for its own steps");
        run.current_step = WorkflowState::HitlPatch;
        run.status = RunStatus::HitlRequired;
        run.pending_patch_id = Some(patch_id);
        run.record(StepEvent::new(run_id, WorkflowState::HitlPatch, StepStatus::Started, Utc::now()));
        drop(runs);
        self.persist_last_event(run_id).await;

        info!(run_id = %run_id, %patch_id, "run suspended for HITL review");
        Ok(())
    }

    async fn drive_from_hitl(
        &self,
        project_id: &str,
        patch_id: Uuid,
        action: HitlAction,
        edit_request: Option<String>,
    ) {
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;

        let run_id = {
            let runs = self.runs.lock().await;
            match runs
                .values()
                .find(|r| r.project_id == project_id && r.pending_patch_id == Some(patch_id))
                .map(|r| r.run_id)
            {
                Some(id) => id,
                None => return,
            }
        };

        let outcome = match action {
            HitlAction::Approve => self.apply_approve(run_id, patch_id).await,
            HitlAction::Reject => self.apply_reject(run_id, patch_id).await,
            HitlAction::Edit => {
                self.apply_edit(run_id, project_id, patch_id, edit_request.unwrap_or_default())
                    .await
            }
        };

        if let Err(e) = outcome {
            self.fail_run(run_id, &e).await;
        }
    }

    async fn apply_reject(&self, run_id: Uuid, patch_id: Uuid) -> Result<()> {
        self.persistence
            .update_patch_status(patch_id, PatchStatus::Rejected)
            .await?;
        {
            let mut runs = self.runs.lock().await;
            let run = runs.get_mut(&run_id).expect("run exists");
            run.status = RunStatus::Completed;
            run.current_step = WorkflowState::Completed;
            run.record(StepEvent::new(run_id, WorkflowState::Completed, StepStatus::Completed, Utc::now()));
        }
        self.persist_last_event(run_id).await;
        Ok(())
    }

    async fn apply_approve(&self, run_id: Uuid, patch_id: Uuid) -> Result<()> {
        self.persistence
            .update_patch_status(patch_id, PatchStatus::Approved)
            .await?;
        {
            let mut runs = self.runs.lock().await;
            let run = runs.get_mut(&run_id).expect("run exists");
            run.current_step = WorkflowState::Apply;
            run.status = RunStatus::Running;
            run.record(StepEvent::new(run_id, WorkflowState::Apply, StepStatus::Completed, Utc::now()));
        }
        self.persist_last_event(run_id).await;
        Ok(())
    }

    async fn apply_edit(
        &self,
        run_id: Uuid,
        project_id: &str,
        patch_id: Uuid,
        edit_request: String,
    ) -> Result<()> {
        let original = self
            .persistence
            .get_active_patch(project_id)
            .await?
            .ok_or_else(|| Error::conflict("no active patch to edit"))?;

        self.persistence
            .update_patch_status(patch_id, PatchStatus::Superseded)
            .await?;

        let edit_outcome = self
            .orchestrator
            .edit_patch(&original.patch_data, &edit_request)
            .await?;

        let new_patch_id = self
            .persistence
            .create_patch(
                project_id,
                PatchSource::EditedLlm,
                edit_outcome.patch.clone(),
                edit_outcome.rationale.clone(),
                edit_outcome.patch.annotations.clone(),
            )
            .await?;
        self.persistence
            .update_patch_status(new_patch_id, PatchStatus::Approved)
            .await?;

        {
            let mut runs = self.runs.lock().await;
            let run = runs.get_mut(&run_id).expect("run exists");
            run.pending_patch_id = Some(new_patch_id);
            run.current_step = WorkflowState::Apply;
            run.status = RunStatus::Running;
            run.record(
                StepEvent::new(run_id, WorkflowState::Apply, StepStatus::Completed, Utc::now()).with_metadata(
                    json!({"delta_size": edit_outcome.delta_size, "delta_flagged": edit_outcome.delta_flagged}),
                ),
            );
        }
        self.persist_last_event(run_id).await;
        Ok(())
    }
}

fn log_started(run: &mut Run, step: WorkflowState) {
    run.record(StepEvent::new(run.run_id, step, StepStatus::Started, Utc::now()));
}
