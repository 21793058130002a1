//! Sanity Gate (C6): an LLM self-reflection pass over a candidate patch.
//!
//! Mirrors the teacher's adversarial validator shape (build prompt, call
//! the model, parse a fixed review schema, merge findings back in) but
//! never fails the pipeline — a gate error degrades to a conservative
//! marker instead of propagating.

use serde::Deserialize;
use serde_json::json;
use tracing::{instrument, warn};

use super::types::{ApprovedAction, Risk, SanityFlag, SanityReview, StrategyPatch};
use crate::llm::{extract_json, LlmGateway, TaskKind};

const EVIDENCE_KEYWORDS: &[&str] = &["evidence", "data support", "insufficient", "unsupported"];

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    #[serde(default)]
    approved_actions: Vec<ApprovedAction>,
    #[serde(default)]
    flagged: Vec<SanityFlag>,
    overall_assessment: SanityReview,
}

fn build_prompt(patch: &StrategyPatch) -> String {
    let reviewable = json!({
        "audience_targeting": patch.audience_targeting,
        "messaging_strategy": patch.messaging_strategy,
        "channel_strategy": patch.channel_strategy,
        "budget_allocation": patch.budget_allocation,
    });

    format!(
        "Review the following proposed marketing strategy patch for risk. \
         Consider whether each action is justified by evidence, whether budget \
         shifts are prudent, and whether audience or creative choices are sound.\n\n\
         Patch:\n{}\n\n\
         Respond with JSON of exactly this shape:\n\
         {{\"approved_actions\": [{{\"action_id\": string, \"reasoning\": string}}], \
         \"flagged\": [{{\"action_id\": string, \"reason\": string, \"risk\": \"high\"|\"medium\"|\"low\", \
         \"recommendation\": string}}], \
         \"overall_assessment\": \"safe\"|\"review_recommended\"|\"high_risk\"}}",
        serde_json::to_string_pretty(&reviewable).unwrap_or_default()
    )
}

fn mentions_evidence_gap(flags: &[SanityFlag]) -> bool {
    flags.iter().any(|flag| {
        let reason = flag.reason.to_lowercase();
        EVIDENCE_KEYWORDS.iter().any(|kw| reason.contains(kw))
    })
}

fn fallback_flag() -> SanityFlag {
    SanityFlag {
        action_id: "*".to_string(),
        reason: "sanity_gate_error".to_string(),
        risk: Risk::Low,
        recommendation: "manual review recommended; gate could not complete".to_string(),
    }
}

/// Run the sanity gate over `patch`, merging its findings into a copy.
/// Never returns an error: on LLM or parse failure the patch is marked
/// `review_recommended` with a single low-risk `sanity_gate_error` flag
/// and the pipeline continues.
#[instrument(skip(gateway, patch))]
pub async fn apply(gateway: &LlmGateway, patch: StrategyPatch) -> StrategyPatch {
    let prompt = build_prompt(&patch);
    let mut patch = patch;

    let review = match gateway.call(TaskKind::Patch, &prompt).await {
        Ok(raw) => extract_json(&raw).and_then(|value| {
            serde_json::from_value::<ReviewResponse>(value).map_err(crate::error::Error::from)
        }),
        Err(err) => Err(err),
    };

    match review {
        Ok(review) => {
            patch.annotations.sanity_flags = review.flagged.clone();
            patch.annotations.approved_actions = review.approved_actions;
            patch.sanity_review = review.overall_assessment;
            if mentions_evidence_gap(&review.flagged) {
                patch.insufficient_evidence = Some(true);
            }
        }
        Err(err) => {
            warn!(error = %err, "sanity gate failed, falling back to conservative marker");
            patch.annotations.sanity_flags = vec![fallback_flag()];
            patch.sanity_review = SanityReview::ReviewRecommended;
        }
    }

    patch
}

/// Advisory hint for the workflow engine: true iff at least two flags are
/// high risk. The human still decides; the engine does not act on this
/// alone.
pub fn should_block(patch: &StrategyPatch) -> bool {
    patch
        .annotations
        .sanity_flags
        .iter()
        .filter(|f| f.risk == Risk::High)
        .count()
        >= 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmCallMetric, MetricsSink};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    use crate::error::Result;
    use crate::llm::{CompletionRequest, CompletionResponse, LLMClient, ModelSpec, Provider, StopReason, TokenUsage};
    use chrono::Utc;

    struct StubClient {
        response: String,
    }

    #[async_trait]
    impl LLMClient for StubClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            Ok(CompletionResponse {
                id: "stub-1".to_string(),
                content: self.response.clone(),
                model: "stub".to_string(),
                stop_reason: Some(StopReason::EndTurn),
                usage: TokenUsage {
                    input_tokens: 1,
                    output_tokens: 1,
                },
                timestamp: Utc::now(),
                cost: None,
            })
        }

        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        fn available_models(&self) -> Vec<ModelSpec> {
            vec![ModelSpec::claude_sonnet()]
        }
    }

    struct NoopSink;
    impl MetricsSink for NoopSink {
        fn record(&self, _metric: LlmCallMetric) {}
    }

    fn patch() -> StrategyPatch {
        StrategyPatch::from_llm_sections(json!({}), json!({}), json!({}), json!({}))
    }

    fn gateway_with_response(response: &str) -> LlmGateway {
        LlmGateway::new(Arc::new(StubClient {
            response: response.to_string(),
        }))
        .with_metrics(Arc::new(NoopSink))
    }

    #[tokio::test]
    async fn merges_review_into_patch() {
        let gateway = gateway_with_response(
            r#"{"approved_actions": [{"action_id": "a1", "reasoning": "fine"}],
                "flagged": [], "overall_assessment": "safe"}"#,
        );
        let result = apply(&gateway, patch()).await;
        assert_eq!(result.sanity_review, SanityReview::Safe);
        assert_eq!(result.annotations.approved_actions.len(), 1);
    }

    #[tokio::test]
    async fn sets_insufficient_evidence_on_evidence_flag() {
        let gateway = gateway_with_response(
            r#"{"approved_actions": [],
                "flagged": [{"action_id": "a1", "reason": "insufficient evidence for this claim",
                             "risk": "medium", "recommendation": "gather more data"}],
                "overall_assessment": "review_recommended"}"#,
        );
        let result = apply(&gateway, patch()).await;
        assert_eq!(result.insufficient_evidence, Some(true));
    }

    #[tokio::test]
    async fn falls_back_on_garbage_response() {
        let gateway = gateway_with_response("not json at all");
        let result = apply(&gateway, patch()).await;
        assert_eq!(result.sanity_review, SanityReview::ReviewRecommended);
        assert_eq!(result.annotations.sanity_flags.len(), 1);
        assert_eq!(result.annotations.sanity_flags[0].reason, "sanity_gate_error");
    }

    #[test]
    fn should_block_requires_two_high_risk_flags() {
        let mut p = patch();
        p.annotations.sanity_flags = vec![SanityFlag {
            action_id: "a1".into(),
            reason: "r".into(),
            risk: Risk::High,
            recommendation: "x".into(),
        }];
        assert!(!should_block(&p));

        p.annotations.sanity_flags.push(SanityFlag {
            action_id: "a2".into(),
            reason: "r".into(),
            risk: Risk::High,
            recommendation: "x".into(),
        });
        assert!(should_block(&p));
    }
}
