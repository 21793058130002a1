//! Mechanics Reference (C2): static, read-only prompt assets describing
//! the metric→lever mapping and platform-agnostic performance patterns.
//!
//! Nothing here does any work beyond holding constants and the trivial
//! lookup helpers the orchestrator (and its prompts) rely on.

/// Metric→lever mapping, magnitude bands, and action rules. Injected
/// verbatim into INSIGHTS and PATCH prompts.
pub const MECHANICS_CHEAT_SHEET: &str = r#"
METRIC -> LEVER MAPPING
- ROAS, CTR, CVR (efficiency metrics): primary lever = bidding, secondary = audience
- CPC, CPA, CPM, spend (cost metrics): primary lever = budget, secondary = bidding
- impressions, clicks, orders, sales, revenue, conversions (volume metrics): primary lever = budget, secondary = audience
- suggested/recommended/target (comparative metrics): primary lever = bidding, secondary = budget

MAGNITUDE BANDS
- small: 5-15% change
- medium: 15-30% change
- large: >30% change

ACTION RULES
- Exactly one primary lever per recommendation.
- Lever choice must be justified by the evidence cited, not by convention.
- Weak evidence (data_support=weak) requires a learn/test action (pilot, test, experiment, A/B, validate, or trial).
"#;

/// Seven platform-agnostic patterns worth looking for in any performance
/// dataset, independent of the specific ad platform the data came from.
pub const UNIVERSAL_MECHANICS: &str = r#"
UNIVERSAL PERFORMANCE PATTERNS
1. Efficiency outliers: segments performing at >=2x the portfolio median on an efficiency metric.
2. Waste elimination: segments with poor efficiency AND high cost.
3. Comparative gap closure: meaningful gaps between a current value and its suggested/target counterpart.
4. Volume x efficiency matrix: classify segments into a 2x2 grid of high/low volume by high/low efficiency.
5. Pareto concentration: a small share of segments driving a disproportionate share of volume or cost.
6. Metric correlation: relationships between metrics that suggest a causal lever (e.g. cost driving efficiency down).
7. Low-data segments: segments with fewer than 10 observations, where conclusions should be treated as weak evidence.
"#;

/// Look up the cheat-sheet guidance relevant to a specific metric name, if
/// the metric is one of the well-known ones. Used in unit tests and for
/// building focused per-metric prompt snippets.
pub fn get_mechanics_for_metric(metric: &str) -> Option<&'static str> {
    let normalized = metric.to_lowercase();
    match normalized.as_str() {
        "roas" | "ctr" | "cvr" | "rate" => {
            Some("primary lever = bidding, secondary = audience")
        }
        "cpc" | "cpa" | "cpm" | "spend" | "cost" | "bid" => {
            Some("primary lever = budget, secondary = bidding")
        }
        "impressions" | "clicks" | "orders" | "sales" | "revenue" | "conversions" => {
            Some("primary lever = budget, secondary = audience")
        }
        "suggested" | "recommended" | "target" => {
            Some("primary lever = bidding, secondary = budget")
        }
        _ => None,
    }
}

/// Validate that `lever` is the mapping-recommended primary lever for
/// `metric`. Unknown metrics are considered valid against any lever since
/// the cheat sheet has no opinion on them.
pub fn validate_lever_choice(lever: &str, metric: &str) -> bool {
    let normalized_lever = lever.to_lowercase();
    match get_mechanics_for_metric(metric) {
        Some(guidance) => guidance.contains(&normalized_lever),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roas_maps_to_bidding() {
        assert!(validate_lever_choice("bidding", "roas"));
        assert!(!validate_lever_choice("audience", "roas"));
    }

    #[test]
    fn spend_maps_to_budget() {
        assert!(validate_lever_choice("budget", "spend"));
    }

    #[test]
    fn unknown_metric_is_permissive() {
        assert!(validate_lever_choice("creative", "some_unknown_metric"));
    }

    #[test]
    fn cheat_sheet_mentions_magnitude_bands() {
        assert!(MECHANICS_CHEAT_SHEET.contains("small: 5-15%"));
        assert!(UNIVERSAL_MECHANICS.contains("Pareto concentration"));
    }
}
