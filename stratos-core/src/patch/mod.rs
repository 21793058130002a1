//! Strategy patch types plus the Heuristic Filters (C5) and Sanity Gate
//! (C6) stages that run over them before a patch reaches a human.

mod filters;
mod sanity_gate;
mod types;

pub use filters::{downscope_if_needed, validate_patch, ValidationResult};
pub use sanity_gate::{apply as apply_sanity_gate, should_block};
pub use types::{
    Annotations, ApprovedAction, PatchRecord, PatchSource, PatchStatus, Risk, SanityFlag,
    SanityReview, StrategyPatch,
};
