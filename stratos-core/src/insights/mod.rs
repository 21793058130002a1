//! Insights Selector (C4): candidate types plus deterministic scoring and
//! selection.

mod selector;
mod types;

pub use selector::{score, select_top, validate};
pub use types::{
    DataSupport, Direction, ExpectedEffect, InsightCandidate, InsightsResult, Magnitude,
    PrimaryLever,
};
