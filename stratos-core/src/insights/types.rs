//! Data types for the INSIGHTS stage: `InsightCandidate` and the result
//! of selecting the top 3 from a larger generated set.

use serde::{Deserialize, Serialize};

/// The tactical axis a recommendation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryLever {
    Audience,
    Creative,
    Budget,
    Bidding,
    Funnel,
}

impl PrimaryLever {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimaryLever::Audience => "audience",
            PrimaryLever::Creative => "creative",
            PrimaryLever::Budget => "budget",
            PrimaryLever::Bidding => "bidding",
            PrimaryLever::Funnel => "funnel",
        }
    }
}

/// Direction of the predicted effect on the cited metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
}

/// Magnitude band for the predicted effect, per C2's bands (small
/// 5-15%, medium 15-30%, large >30%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Magnitude {
    Small,
    Medium,
    Large,
}

/// How strongly the evidence supports the candidate's claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSupport {
    Strong,
    Moderate,
    Weak,
}

/// The predicted effect of acting on a candidate's recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedEffect {
    pub direction: Direction,
    pub metric: String,
    pub magnitude: Magnitude,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
}

/// One of the five candidates an INSIGHTS call is asked to generate.
/// All eleven fields are required on output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightCandidate {
    pub insight: String,
    pub hypothesis: String,
    pub proposed_action: String,
    pub primary_lever: PrimaryLever,
    pub expected_effect: ExpectedEffect,
    pub confidence: f64,
    pub data_support: DataSupport,
    pub evidence_refs: Vec<String>,
    pub contrastive_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_rank: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_score: Option<u8>,
}

/// The result of `generate_insights`: exactly 3 selected candidates plus
/// bookkeeping about how many were generated and how selection was done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsResult {
    pub insights: Vec<InsightCandidate>,
    pub candidates_evaluated: usize,
    pub selection_method: String,
}

impl InsightsResult {
    pub const SELECTION_METHOD: &'static str = "deterministic_rubric";
}
