//! The orchestrator facade: six async operations that wire C1-C6 into the
//! pipeline the workflow engine drives one step at a time.
//!
//! Each operation is a pure function of its inputs plus one LLM call (two
//! for `generate_patch` and `edit_patch`, which also run the patch through
//! the heuristic filters and sanity gate).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::error::{Error, Result};
use crate::features::FeaturesBundle;
use crate::insights::{select_top, validate, InsightCandidate, InsightsResult};
use crate::llm::{extract_json, LlmGateway, TaskKind};
use crate::mechanics::{MECHANICS_CHEAT_SHEET, UNIVERSAL_MECHANICS};
use crate::patch::{apply_sanity_gate, downscope_if_needed, validate_patch, StrategyPatch};
use crate::persistence::Artifact;
use crate::schema::{self, DataSchema, TabularInput};

const CANDIDATES_REQUESTED: usize = 5;
const INSIGHTS_SELECTED: usize = 3;

/// Straightforward creative brief, out of this crate's depth: the LLM's
/// free-form text plus the section headers it was asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brief {
    pub content: String,
}

/// Straightforward performance analysis, out of this crate's depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub content: String,
}

/// Result of generating a patch, bundled with the metrics the caller logs
/// alongside the `PATCH_JOB` record.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub patch: StrategyPatch,
    pub heuristic_flags_count: usize,
    pub sanity_flags_count: usize,
    pub passed_validation: bool,
    pub auto_downscoped: bool,
}

/// Result of editing a patch: the merged patch plus bookkeeping about how
/// large the requested delta actually was.
#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub patch: StrategyPatch,
    pub changes_made: Vec<String>,
    pub rationale: String,
    pub delta_size: usize,
    pub delta_flagged: bool,
}

/// The six operations the workflow engine drives. Extracted as a trait so
/// the engine can be tested against a stub without a live LLM.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn extract_features(&self, artifacts: &[Artifact]) -> Result<FeaturesBundle>;
    async fn generate_insights(&self, features: &FeaturesBundle) -> Result<InsightsResult>;
    async fn generate_patch(&self, insights: &InsightsResult) -> Result<PatchOutcome>;
    async fn edit_patch(&self, original: &StrategyPatch, edit_request: &str) -> Result<EditOutcome>;
    async fn compile_brief(&self, strategy: &StrategyPatch) -> Result<Brief>;
    async fn analyze_performance(&self, metrics: &Value) -> Result<AnalysisReport>;
}

/// Concrete orchestrator wired to a single `LlmGateway`.
pub struct StrategyOrchestrator {
    gateway: LlmGateway,
}

impl StrategyOrchestrator {
    pub fn new(gateway: LlmGateway) -> Self {
        Self { gateway }
    }

    fn artifacts_to_tabular(artifacts: &[Artifact]) -> Result<TabularInput> {
        if artifacts.is_empty() {
            return Ok(TabularInput::new(Vec::new(), Vec::new()));
        }
        let first = &artifacts[0];
        let text = std::str::from_utf8(&first.content)
            .map_err(|e| Error::parse(format!("artifact is not valid utf-8: {e}")))?;
        schema::parse_csv(text)
    }
}

#[async_trait]
impl Orchestrator for StrategyOrchestrator {
    #[instrument(skip(self, artifacts))]
    async fn extract_features(&self, artifacts: &[Artifact]) -> Result<FeaturesBundle> {
        let tabular = Self::artifacts_to_tabular(artifacts)?;
        let data_schema: DataSchema = schema::detect(&tabular);
        let dictionary = data_schema.to_dictionary_string(&tabular.examples());

        let prompt = format!(
            "Extract marketing performance features from this data.\n\n\
             Data dictionary:\n{dictionary}\n\n\
             Use the actual column names shown above. If data is insufficient for a \
             claim, set the field to \"insufficient_evidence\". DO NOT speculate.\n\n\
             Respond with JSON containing at least metrics_summary and \
             segment_performance.by_{}.", data_schema.primary_dimension
        );

        let raw = self.gateway.call(TaskKind::Features, &prompt).await?;
        let value = extract_json(&raw)?;
        Ok(FeaturesBundle::from_value(value, &data_schema))
    }

    #[instrument(skip(self, features))]
    async fn generate_insights(&self, features: &FeaturesBundle) -> Result<InsightsResult> {
        let schema = features.data_schema().unwrap_or_default();
        let segment_sample = features
            .segments_by_dimension(&schema.primary_dimension)
            .cloned()
            .unwrap_or(Value::Null);

        let prompt = format!(
            "{MECHANICS_CHEAT_SHEET}\n\n{UNIVERSAL_MECHANICS}\n\n\
             Primary dimension: {}\n\
             Sample segment performance:\n{}\n\n\
             Generate exactly {CANDIDATES_REQUESTED} insight candidates, each with all 11 fields \
             (insight, hypothesis, proposed_action, primary_lever, expected_effect, confidence, \
             data_support, evidence_refs, contrastive_reason, impact_rank, impact_score). \
             DO NOT include a patch field. Respond with JSON: {{\"candidates\": [...]}}.",
            schema.primary_dimension,
            serde_json::to_string_pretty(&segment_sample).unwrap_or_default(),
        );

        let raw = self.gateway.call(TaskKind::Insights, &prompt).await?;
        let value = extract_json(&raw)?;
        let candidates: Vec<InsightCandidate> = value
            .get("candidates")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        let candidates_evaluated = candidates.len().max(INSIGHTS_SELECTED);
        let valid_count = candidates.iter().filter(|c| validate(c)).count();
        let selected = select_top(candidates, INSIGHTS_SELECTED);

        info!(
            candidates_evaluated,
            valid_count,
            selected = selected.len(),
            "INSIGHTS_JOB"
        );

        Ok(InsightsResult {
            insights: selected,
            candidates_evaluated,
            selection_method: InsightsResult::SELECTION_METHOD.to_string(),
        })
    }

    #[instrument(skip(self, insights))]
    async fn generate_patch(&self, insights: &InsightsResult) -> Result<PatchOutcome> {
        let prompt = format!(
            "Given these three insights, draft a strategy patch.\n\n{}\n\n\
             Constraints: total budget shift across channels must not exceed 25%; \
             at most 3 creative themes per audience segment; no two audience segments \
             may share the same (location, age) pair; every change must be justified by \
             insight evidence.\n\n\
             Respond with JSON: {{\"audience_targeting\": {{...}}, \"messaging_strategy\": {{...}}, \
             \"channel_strategy\": {{...}}, \"budget_allocation\": {{...}}}}.",
            serde_json::to_string_pretty(&insights.insights).unwrap_or_default(),
        );

        let raw = self.gateway.call(TaskKind::Patch, &prompt).await?;
        let value = extract_json(&raw)?;
        let patch = StrategyPatch::from_llm_sections(
            value.get("audience_targeting").cloned().unwrap_or(json!({})),
            value.get("messaging_strategy").cloned().unwrap_or(json!({})),
            value.get("channel_strategy").cloned().unwrap_or(json!({})),
            value.get("budget_allocation").cloned().unwrap_or(json!({})),
        );

        let validation = validate_patch(&patch);
        let heuristic_flags_count = validation.heuristic_flags.len();
        let (mut patch, auto_downscoped, revalidated) = downscope_if_needed(patch, validation);
        patch.annotations.heuristic_flags = revalidated.heuristic_flags.clone();
        let passed_validation = revalidated.passed;

        let patch = apply_sanity_gate(&self.gateway, patch).await;
        let sanity_flags_count = patch.annotations.sanity_flags.len();

        info!(
            heuristic_flags_count,
            sanity_flags_count, passed_validation, auto_downscoped, "PATCH_JOB"
        );

        Ok(PatchOutcome {
            patch,
            heuristic_flags_count,
            sanity_flags_count,
            passed_validation,
            auto_downscoped,
        })
    }

    #[instrument(skip(self, original, edit_request))]
    async fn edit_patch(&self, original: &StrategyPatch, edit_request: &str) -> Result<EditOutcome> {
        let prompt = format!(
            "Here is the current strategy patch:\n{}\n\n\
             The user requested: \"{edit_request}\"\n\n\
             Change ONLY what the user requested, keep all other structure. \
             Respond with JSON: {{\"updated_patch\": {{...}}, \"changes_made\": [string], \
             \"rationale\": string, \"impact_assessment\": string}}.",
            serde_json::to_string_pretty(original).unwrap_or_default(),
        );

        let raw = self.gateway.call(TaskKind::Edit, &prompt).await?;
        let value = extract_json(&raw)?;

        let updated_sections = value.get("updated_patch").cloned().unwrap_or(json!({}));
        let mut merged = original.clone();
        let mut delta_size = 0;
        if let Some(obj) = updated_sections.as_object() {
            for (key, new_value) in obj {
                let changed = match key.as_str() {
                    "audience_targeting" => {
                        let changed = &merged.audience_targeting != new_value;
                        merged.audience_targeting = new_value.clone();
                        changed
                    }
                    "messaging_strategy" => {
                        let changed = &merged.messaging_strategy != new_value;
                        merged.messaging_strategy = new_value.clone();
                        changed
                    }
                    "channel_strategy" => {
                        let changed = &merged.channel_strategy != new_value;
                        merged.channel_strategy = new_value.clone();
                        changed
                    }
                    "budget_allocation" => {
                        let changed = &merged.budget_allocation != new_value;
                        merged.budget_allocation = new_value.clone();
                        changed
                    }
                    _ => false,
                };
                if changed {
                    delta_size += 1;
                }
            }
        }

        let changes_made: Vec<String> = value
            .get("changes_made")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let rationale = value
            .get("rationale")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // The check that a delta "touches unrelated fields" is advisory in
        // the source material; we surface it as a flag, not a failure.
        let delta_flagged = delta_size == 0 && !edit_request.is_empty();

        let validation = validate_patch(&merged);
        let (merged, _auto_downscoped, _revalidated) = downscope_if_needed(merged, validation);
        let merged = apply_sanity_gate(&self.gateway, merged).await;

        Ok(EditOutcome {
            patch: merged,
            changes_made,
            rationale,
            delta_size,
            delta_flagged,
        })
    }

    #[instrument(skip(self, strategy))]
    async fn compile_brief(&self, strategy: &StrategyPatch) -> Result<Brief> {
        let prompt = format!(
            "Compile a creative brief from this approved strategy patch:\n{}",
            serde_json::to_string_pretty(strategy).unwrap_or_default(),
        );
        let content = self.gateway.call(TaskKind::Brief, &prompt).await?;
        Ok(Brief { content })
    }

    #[instrument(skip(self, metrics))]
    async fn analyze_performance(&self, metrics: &Value) -> Result<AnalysisReport> {
        let prompt = format!(
            "Analyze this campaign performance data and summarize what worked:\n{}",
            serde_json::to_string_pretty(metrics).unwrap_or_default(),
        );
        let content = self.gateway.call(TaskKind::Analyze, &prompt).await?;
        Ok(AnalysisReport { content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        CompletionRequest, CompletionResponse, LLMClient, LlmCallMetric, MetricsSink, ModelSpec,
        Provider, StopReason, TokenUsage,
    };
    use chrono::Utc;
    use std::sync::Arc;

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

    fn orchestrator_with_response(response: &str) -> StrategyOrchestrator {
        let gateway = LlmGateway::new(Arc::new(StubClient {
            response: response.to_string(),
        }))
        .with_metrics(Arc::new(NoopSink));
        StrategyOrchestrator::new(gateway)
    }

    #[tokio::test]
    async fn extract_features_attaches_computed_schema() {
        let orchestrator = orchestrator_with_response(r#"{"metrics_summary": {}}"#);
        let artifact = Artifact {
            artifact_id: uuid::Uuid::new_v4(),
            project_id: "proj-1".into(),
            mime: "text/csv".into(),
            content: b"keyword,roas\nfanny pack men,3.74\nwidgets,1.2\n".to_vec(),
            feature_summary: None,
        };
        let bundle = orchestrator.extract_features(&[artifact]).await.unwrap();
        let schema = bundle.data_schema().unwrap();
        assert_eq!(schema.primary_dimension, "keyword");
    }

    #[tokio::test]
    async fn generate_insights_drops_invalid_and_selects_three() {
        let candidates_json = serde_json::json!({
            "candidates": (0..5).map(|i| serde_json::json!({
                "insight": format!("insight {i}"),
                "hypothesis": "h",
                "proposed_action": "increase bid",
                "primary_lever": "bidding",
                "expected_effect": {"direction": "increase", "metric": "roas", "magnitude": "medium"},
                "confidence": 0.8,
                "data_support": "strong",
                "evidence_refs": ["a.b.c"],
                "contrastive_reason": "r",
            })).collect::<Vec<_>>()
        });
        let orchestrator = orchestrator_with_response(&candidates_json.to_string());
        let schema = DataSchema::default();
        let features = FeaturesBundle::from_value(serde_json::json!({}), &schema);
        let result = orchestrator.generate_insights(&features).await.unwrap();
        assert_eq!(result.insights.len(), 3);
        assert_eq!(result.selection_method, "deterministic_rubric");
    }
}
