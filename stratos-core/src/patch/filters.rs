//! Heuristic Filters (C5): pure, deterministic rule checks over a
//! `StrategyPatch`, plus the auto-downscope routine that tries to bring a
//! failing patch back into bounds before handing it to a human.

use serde_json::Value;

use super::types::StrategyPatch;

const MAX_BUDGET_SHIFT_PERCENT: f64 = 25.0;
const DOWNSCOPE_SCALE: f64 = 0.8;
const MAX_DOWNSCOPE_ITERATIONS: u32 = 3;
const CREATIVES_PER_SEGMENT: usize = 3;

/// Result of running the heuristic checks once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub passed: bool,
    pub heuristic_flags: Vec<String>,
    pub budget_flags: Vec<String>,
    pub audience_flags: Vec<String>,
    pub creative_flags: Vec<String>,
}

impl ValidationResult {
    fn merge_flags(&mut self) {
        self.heuristic_flags = self
            .budget_flags
            .iter()
            .chain(self.audience_flags.iter())
            .chain(self.creative_flags.iter())
            .cloned()
            .collect();
        self.passed = self.heuristic_flags.is_empty();
    }
}

fn channel_shifts(patch: &StrategyPatch) -> Vec<(String, f64)> {
    let breakdown = patch
        .budget_allocation
        .get("channel_breakdown")
        .and_then(Value::as_object);
    let Some(breakdown) = breakdown else {
        return Vec::new();
    };

    let channels: Vec<(String, f64)> = breakdown
        .iter()
        .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
        .collect();
    if channels.is_empty() {
        return Vec::new();
    }

    // Baseline: the patch's own `baseline_allocation` if present, else an
    // equal distribution across the channels named in channel_breakdown.
    let baseline = patch
        .budget_allocation
        .get("baseline_allocation")
        .and_then(Value::as_object);

    let equal_share = 100.0 / channels.len() as f64;
    channels
        .into_iter()
        .map(|(name, new_value)| {
            let base = baseline
                .and_then(|b| b.get(&name))
                .and_then(Value::as_f64)
                .unwrap_or(equal_share);
            (name, new_value - base)
        })
        .collect()
}

fn budget_check(patch: &StrategyPatch) -> Vec<String> {
    let shifts = channel_shifts(patch);
    let total_shift: f64 = shifts.iter().map(|(_, delta)| delta.abs()).sum();
    if total_shift > MAX_BUDGET_SHIFT_PERCENT {
        vec![format!(
            "budget_shift_exceeds_25_percent: total_shift={total_shift:.1}%"
        )]
    } else {
        Vec::new()
    }
}

fn audience_segments(patch: &StrategyPatch) -> Vec<(String, String)> {
    patch
        .audience_targeting
        .get("segments")
        .and_then(Value::as_array)
        .map(|segments| {
            segments
                .iter()
                .filter_map(|segment| {
                    let location = segment.get("location")?.as_str()?.to_string();
                    let age = segment.get("age")?.as_str()?.to_string();
                    Some((location, age))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn audience_check(patch: &StrategyPatch) -> Vec<String> {
    let tuples = audience_segments(patch);
    let mut seen = std::collections::HashSet::new();
    let mut flags = Vec::new();
    for (location, age) in &tuples {
        if !seen.insert((location.clone(), age.clone())) {
            flags.push(format!(
                "overlapping_segment: location='{location}', age='{age}'"
            ));
        }
    }
    flags
}

fn key_themes(patch: &StrategyPatch) -> Vec<Value> {
    patch
        .messaging_strategy
        .get("key_themes")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn max_allowed_creatives(patch: &StrategyPatch) -> usize {
    let segment_count = patch
        .audience_targeting
        .get("segments")
        .and_then(Value::as_array)
        .map(|s| s.len())
        .unwrap_or(0);
    segment_count * CREATIVES_PER_SEGMENT
}

fn creative_check(patch: &StrategyPatch) -> Vec<String> {
    let themes = key_themes(patch);
    let max_allowed = max_allowed_creatives(patch);
    let segment_count = max_allowed / CREATIVES_PER_SEGMENT.max(1);
    if themes.len() > max_allowed {
        vec![format!(
            "excessive_creatives: {} themes for {} segments",
            themes.len(),
            segment_count
        )]
    } else {
        Vec::new()
    }
}

/// Run all three heuristic checks over `patch`. Pure, no I/O.
pub fn validate_patch(patch: &StrategyPatch) -> ValidationResult {
    let mut result = ValidationResult {
        budget_flags: budget_check(patch),
        audience_flags: audience_check(patch),
        creative_flags: creative_check(patch),
        ..Default::default()
    };
    result.merge_flags();
    result
}

fn scale_budget_shifts(patch: &mut StrategyPatch) {
    let Some(breakdown) = patch
        .budget_allocation
        .get("channel_breakdown")
        .and_then(Value::as_object)
        .cloned()
    else {
        return;
    };
    let baseline = patch
        .budget_allocation
        .get("baseline_allocation")
        .and_then(Value::as_object)
        .cloned();

    let equal_share = 100.0 / breakdown.len().max(1) as f64;
    let mut scaled = serde_json::Map::new();
    for (name, value) in breakdown {
        let Some(new_value) = value.as_f64() else {
            scaled.insert(name, value);
            continue;
        };
        let base = baseline
            .as_ref()
            .and_then(|b| b.get(&name))
            .and_then(Value::as_f64)
            .unwrap_or(equal_share);
        let shifted = base + (new_value - base) * DOWNSCOPE_SCALE;
        scaled.insert(name, Value::from(shifted));
    }

    if let Some(obj) = patch.budget_allocation.as_object_mut() {
        obj.insert("channel_breakdown".to_string(), Value::Object(scaled));
    }
}

fn truncate_key_themes(patch: &mut StrategyPatch) {
    let max_allowed = max_allowed_creatives(patch);
    if let Some(obj) = patch.messaging_strategy.as_object_mut() {
        if let Some(Value::Array(themes)) = obj.get_mut("key_themes") {
            themes.truncate(max_allowed);
        }
    }
}

/// Attempt to bring a failing patch back into bounds in place. Returns the
/// (possibly mutated) patch, whether it was modified, and the validation
/// result after the attempt.
pub fn downscope_if_needed(
    mut patch: StrategyPatch,
    validation: ValidationResult,
) -> (StrategyPatch, bool, ValidationResult) {
    if validation.passed {
        return (patch, false, validation);
    }

    let mut modified = false;

    if !validation.budget_flags.is_empty() {
        for _ in 0..MAX_DOWNSCOPE_ITERATIONS {
            scale_budget_shifts(&mut patch);
            modified = true;
            if budget_check(&patch).is_empty() {
                break;
            }
        }
    }

    if !validation.creative_flags.is_empty() {
        truncate_key_themes(&mut patch);
        modified = true;
    }

    let revalidated = validate_patch(&patch);
    // Audience overlaps are never auto-resolved; their presence alone
    // forces HITL review even if budget/creative checks now pass.
    let requires_review = !revalidated.passed || !audience_check(&patch).is_empty();

    patch.annotations.auto_downscoped = modified;
    patch.annotations.requires_hitl_review = requires_review;

    (patch, modified, revalidated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_patch() -> StrategyPatch {
        StrategyPatch::from_llm_sections(
            json!({"segments": [{"location": "US", "age": "25-34"}]}),
            json!({"key_themes": ["a", "b"]}),
            json!({}),
            json!({"channel_breakdown": {"search": 50.0, "social": 50.0}}),
        )
    }

    #[test]
    fn passes_when_within_bounds() {
        let patch = base_patch();
        let result = validate_patch(&patch);
        assert!(result.passed);
    }

    #[test]
    fn flags_excessive_budget_shift() {
        let mut patch = base_patch();
        patch.budget_allocation = json!({
            "baseline_allocation": {"search": 50.0, "social": 50.0},
            "channel_breakdown": {"search": 90.0, "social": 10.0},
        });
        let result = validate_patch(&patch);
        assert!(!result.passed);
        assert!(result.budget_flags[0].starts_with("budget_shift_exceeds_25_percent"));
    }

    #[test]
    fn flags_overlapping_segments() {
        let mut patch = base_patch();
        patch.audience_targeting = json!({
            "segments": [
                {"location": "US", "age": "25-34"},
                {"location": "US", "age": "25-34"},
            ]
        });
        let result = validate_patch(&patch);
        assert!(!result.passed);
        assert!(result.audience_flags[0].contains("location='US'"));
    }

    #[test]
    fn flags_excessive_creatives() {
        let mut patch = base_patch();
        patch.messaging_strategy = json!({"key_themes": ["a", "b", "c", "d"]});
        let result = validate_patch(&patch);
        assert!(!result.passed);
        assert!(result.creative_flags[0].starts_with("excessive_creatives"));
    }

    #[test]
    fn downscope_scales_budget_until_within_bound() {
        let mut patch = base_patch();
        // Total shift from baseline is |15| + |-15| = 30%, which a single
        // 0.8x downscope pass brings to 24%, within MAX_DOWNSCOPE_ITERATIONS.
        // A larger starting overshoot would not converge in 3 iterations at
        // this decay rate (total_shift_n = total_shift_0 * 0.8^n).
        patch.budget_allocation = json!({
            "baseline_allocation": {"search": 50.0, "social": 50.0},
            "channel_breakdown": {"search": 65.0, "social": 35.0},
        });
        let validation = validate_patch(&patch);
        let (patch, modified, revalidated) = downscope_if_needed(patch, validation);
        assert!(modified);
        assert!(revalidated.passed);
        assert!(patch.annotations.auto_downscoped);
        assert!(!patch.annotations.requires_hitl_review);
    }

    #[test]
    fn downscope_truncates_themes_to_max_allowed() {
        let mut patch = base_patch();
        patch.messaging_strategy = json!({"key_themes": ["a", "b", "c", "d"]});
        let validation = validate_patch(&patch);
        let (patch, modified, revalidated) = downscope_if_needed(patch, validation);
        assert!(modified);
        assert!(revalidated.passed);
        let themes = patch.messaging_strategy.get("key_themes").unwrap().as_array().unwrap();
        assert_eq!(themes.len(), 3);
    }

    #[test]
    fn downscope_never_resolves_audience_overlap() {
        let mut patch = base_patch();
        patch.audience_targeting = json!({
            "segments": [
                {"location": "US", "age": "25-34"},
                {"location": "US", "age": "25-34"},
            ]
        });
        let validation = validate_patch(&patch);
        let (patch, _modified, revalidated) = downscope_if_needed(patch, validation);
        assert!(!revalidated.audience_flags.is_empty());
        assert!(patch.annotations.requires_hitl_review);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn in_bounds_shift() -> impl Strategy<Value = (f64, f64)> {
            (-10.0f64..10.0, -10.0f64..10.0)
        }

        proptest! {
            /// downscope_if_needed is a no-op whenever the patch already
            /// passes every heuristic: unmodified patch, `modified == false`.
            #[test]
            fn downscope_is_idempotent_when_already_in_bounds((search_shift, social_shift) in in_bounds_shift()) {
                let mut patch = base_patch();
                patch.budget_allocation = json!({
                    "baseline_allocation": {"search": 50.0, "social": 50.0},
                    "channel_breakdown": {
                        "search": 50.0 + search_shift,
                        "social": 50.0 + social_shift,
                    },
                });
                let validation = validate_patch(&patch);
                prop_assume!(validation.passed);

                let before = patch.clone();
                let (after, modified, revalidated) = downscope_if_needed(patch, validation);

                prop_assert!(!modified);
                prop_assert_eq!(after, before);
                prop_assert!(revalidated.passed);
            }
        }
    }
}
