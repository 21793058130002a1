//! Workflow Engine (C7): the 12-step state machine, its Run/StepEvent
//! bookkeeping, and the HITL-aware driver that advances it.

pub mod engine;
pub mod state;

pub use engine::{HitlAction, RunStatusView, WorkflowEngine};
pub use state::{ErrorType, Run, RunStatus, StepEvent, StepStatus, WorkflowState};
