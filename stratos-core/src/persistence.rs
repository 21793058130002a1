//! The persistence collaborator contract (see external interfaces) and an
//! in-memory reference implementation used by tests and by hosts that
//! haven't wired a real store yet.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::patch::{Annotations, PatchRecord, PatchSource, PatchStatus, StrategyPatch};
use crate::workflow::state::{StepEvent, WorkflowState};

/// A raw uploaded artifact.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub artifact_id: Uuid,
    pub project_id: String,
    pub mime: String,
    pub content: Vec<u8>,
    pub feature_summary: Option<Value>,
}

impl Artifact {
    /// Content hash used to detect a byte-identical re-upload of the same
    /// artifact to a project, so ingest doesn't reprocess it from scratch.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.content);
        format!("{:x}", hasher.finalize())
    }
}

/// A persisted features snapshot for a project.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub project_id: String,
    pub features: Value,
    pub created_at: DateTime<Utc>,
}

/// The durable store the workflow engine and orchestrator read and write
/// through. Implementations may back this with any storage; the core
/// never reaches into storage directly.
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    async fn create_artifact(&self, artifact: Artifact) -> Result<Uuid>;
    async fn get_artifacts(&self, project_id: &str) -> Result<Vec<Artifact>>;
    async fn create_snapshot(&self, project_id: &str, features: Value) -> Result<()>;
    async fn create_patch(
        &self,
        project_id: &str,
        source: PatchSource,
        patch_data: StrategyPatch,
        justification: String,
        annotations: Annotations,
    ) -> Result<Uuid>;
    async fn update_patch_status(&self, patch_id: Uuid, status: PatchStatus) -> Result<()>;
    async fn get_active_patch(&self, project_id: &str) -> Result<Option<PatchRecord>>;
    async fn log_step_event(&self, project_id: &str, event: StepEvent) -> Result<()>;
    /// All step events logged for a project, in the order they were
    /// recorded. Used to rebuild in-memory run state after a restart.
    async fn get_step_events(&self, project_id: &str) -> Result<Vec<StepEvent>>;
}

/// Reference implementation backed by in-process maps. Not durable across
/// restarts; suitable for tests and single-process demos.
#[derive(Default)]
pub struct InMemoryPersistence {
    artifacts: Mutex<HashMap<String, Vec<Artifact>>>,
    snapshots: Mutex<HashMap<String, Snapshot>>,
    patches: Mutex<HashMap<Uuid, PatchRecord>>,
    active_patch: Mutex<HashMap<String, Uuid>>,
    events: Mutex<HashMap<String, Vec<StepEvent>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err(what: &str) -> Error {
        Error::storage(format!("{what} lock poisoned"))
    }
}

#[async_trait]
impl PersistenceClient for InMemoryPersistence {
    async fn create_artifact(&self, artifact: Artifact) -> Result<Uuid> {
        let id = artifact.artifact_id;
        let hash = artifact.content_hash();
        let mut artifacts = self
            .artifacts
            .lock()
            .map_err(|_| Self::lock_err("artifacts"))?;
        let existing = artifacts.entry(artifact.project_id.clone()).or_default();
        if let Some(duplicate) = existing.iter().find(|a| a.content_hash() == hash) {
            return Ok(duplicate.artifact_id);
        }
        existing.push(artifact);
        Ok(id)
    }

    async fn get_artifacts(&self, project_id: &str) -> Result<Vec<Artifact>> {
        let artifacts = self
            .artifacts
            .lock()
            .map_err(|_| Self::lock_err("artifacts"))?;
        Ok(artifacts.get(project_id).cloned().unwrap_or_default())
    }

    async fn create_snapshot(&self, project_id: &str, features: Value) -> Result<()> {
        let mut snapshots = self
            .snapshots
            .lock()
            .map_err(|_| Self::lock_err("snapshots"))?;
        snapshots.insert(
            project_id.to_string(),
            Snapshot {
                project_id: project_id.to_string(),
                features,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn create_patch(
        &self,
        project_id: &str,
        source: PatchSource,
        patch_data: StrategyPatch,
        justification: String,
        annotations: Annotations,
    ) -> Result<Uuid> {
        let patch_id = Uuid::new_v4();
        let record = PatchRecord {
            patch_id,
            project_id: project_id.to_string(),
            source,
            status: PatchStatus::Proposed,
            patch_data,
            justification,
            annotations,
            created_at: Utc::now(),
        };
        let mut patches = self.patches.lock().map_err(|_| Self::lock_err("patches"))?;
        patches.insert(patch_id, record);
        drop(patches);

        let mut active = self
            .active_patch
            .lock()
            .map_err(|_| Self::lock_err("active_patch"))?;
        active.insert(project_id.to_string(), patch_id);
        Ok(patch_id)
    }

    async fn update_patch_status(&self, patch_id: Uuid, status: PatchStatus) -> Result<()> {
        let mut patches = self.patches.lock().map_err(|_| Self::lock_err("patches"))?;
        let record = patches
            .get_mut(&patch_id)
            .ok_or_else(|| Error::storage(format!("unknown patch {patch_id}")))?;
        record.status = status;
        Ok(())
    }

    async fn get_active_patch(&self, project_id: &str) -> Result<Option<PatchRecord>> {
        let active = self
            .active_patch
            .lock()
            .map_err(|_| Self::lock_err("active_patch"))?;
        let Some(patch_id) = active.get(project_id) else {
            return Ok(None);
        };
        let patches = self.patches.lock().map_err(|_| Self::lock_err("patches"))?;
        Ok(patches.get(patch_id).cloned())
    }

    async fn log_step_event(&self, project_id: &str, event: StepEvent) -> Result<()> {
        let mut events = self.events.lock().map_err(|_| Self::lock_err("events"))?;
        events.entry(project_id.to_string()).or_default().push(event);
        Ok(())
    }

    async fn get_step_events(&self, project_id: &str) -> Result<Vec<StepEvent>> {
        let events = self.events.lock().map_err(|_| Self::lock_err("events"))?;
        Ok(events.get(project_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state::StepStatus;
    use serde_json::json;

    fn patch() -> StrategyPatch {
        StrategyPatch::from_llm_sections(json!({}), json!({}), json!({}), json!({}))
    }

    fn artifact(project_id: &str, content: &[u8]) -> Artifact {
        Artifact {
            artifact_id: Uuid::new_v4(),
            project_id: project_id.to_string(),
            mime: "text/csv".to_string(),
            content: content.to_vec(),
            feature_summary: None,
        }
    }

    #[tokio::test]
    async fn duplicate_artifact_upload_returns_existing_id() {
        let store = InMemoryPersistence::new();
        let first = store.create_artifact(artifact("proj-1", b"a,b\n1,2\n")).await.unwrap();
        let second = store.create_artifact(artifact("proj-1", b"a,b\n1,2\n")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.get_artifacts("proj-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_and_fetch_active_patch_round_trips() {
        let store = InMemoryPersistence::new();
        let id = store
            .create_patch(
                "proj-1",
                PatchSource::Insights,
                patch(),
                "because".into(),
                Annotations::default(),
            )
            .await
            .unwrap();

        let active = store.get_active_patch("proj-1").await.unwrap().unwrap();
        assert_eq!(active.patch_id, id);
        assert_eq!(active.status, PatchStatus::Proposed);
    }

    #[tokio::test]
    async fn update_patch_status_persists() {
        let store = InMemoryPersistence::new();
        let id = store
            .create_patch(
                "proj-1",
                PatchSource::Insights,
                patch(),
                "because".into(),
                Annotations::default(),
            )
            .await
            .unwrap();
        store
            .update_patch_status(id, PatchStatus::Approved)
            .await
            .unwrap();
        let active = store.get_active_patch("proj-1").await.unwrap().unwrap();
        assert_eq!(active.status, PatchStatus::Approved);
    }

    #[tokio::test]
    async fn step_events_accumulate_in_order() {
        let store = InMemoryPersistence::new();
        let run_id = Uuid::new_v4();
        store
            .log_step_event(
                "proj-1",
                StepEvent::new(run_id, WorkflowState::Ingest, StepStatus::Started, Utc::now()),
            )
            .await
            .unwrap();
        store
            .log_step_event(
                "proj-1",
                StepEvent::new(run_id, WorkflowState::Ingest, StepStatus::Completed, Utc::now()),
            )
            .await
            .unwrap();
        let events = store.events.lock().unwrap();
        assert_eq!(events.get("proj-1").unwrap().len(), 2);
    }
}
