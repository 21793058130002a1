//! `FeaturesBundle`: the LLM-extracted feature set produced by
//! `extract_features`.
//!
//! The spec deliberately leaves this schema-flexible — the LLM populates
//! per-dimension keys (`segment_performance.by_{primary_dimension}`) whose
//! names come from the detected schema, not from a fixed Rust type. We
//! model it as a typed wrapper around a JSON object: the fields every
//! caller needs (`data_schema`, `metrics_summary`, `segment_performance`)
//! get real accessors, while the LLM-populated interior stays a
//! `serde_json::Value`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::DataSchema;

/// Sentinel value an LLM must use in place of fabricating a claim it has
/// insufficient evidence for.
pub const INSUFFICIENT_EVIDENCE: &str = "insufficient_evidence";

/// The LLM-extracted features bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesBundle {
    #[serde(flatten)]
    inner: Map<String, Value>,
}

impl FeaturesBundle {
    /// Build a bundle from raw LLM JSON output, attaching the schema the
    /// orchestrator computed independently via C1 (the LLM's own
    /// `data_schema` field, if any, is not trusted since we have the
    /// authoritative one already).
    pub fn from_value(mut value: Value, schema: &DataSchema) -> Self {
        let mut inner = value.as_object_mut().cloned().unwrap_or_default();
        inner.insert(
            "data_schema".to_string(),
            serde_json::to_value(schema).unwrap_or(Value::Null),
        );
        Self { inner }
    }

    pub fn data_schema(&self) -> Option<DataSchema> {
        self.inner
            .get("data_schema")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn metrics_summary(&self) -> Option<&Value> {
        self.inner.get("metrics_summary")
    }

    pub fn segment_performance(&self) -> Option<&Value> {
        self.inner.get("segment_performance")
    }

    /// Segment performance keyed under `by_{dimension}`, for the given
    /// primary dimension name.
    pub fn segments_by_dimension(&self, dimension: &str) -> Option<&Value> {
        self.segment_performance()?.get(format!("by_{dimension}"))
    }

    /// Resolve a dotted evidence path (e.g.
    /// `segment_performance.by_keyword.fanny_pack_men.metrics.roas`) to a
    /// value within the bundle. Used when building prompts that need to
    /// cite actual numbers, and in tests checking `evidence_refs`.
    pub fn resolve_path(&self, path: &str) -> Option<&Value> {
        let mut current = self.inner.get(path.split('.').next()?)?;
        for segment in path.split('.').skip(1) {
            current = current.get(segment)?;
        }
        Some(current)
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.inner.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attaches_authoritative_schema() {
        let schema = DataSchema {
            primary_dimension: "keyword".into(),
            row_count: 2,
            ..Default::default()
        };
        let bundle = FeaturesBundle::from_value(json!({"metrics_summary": {}}), &schema);
        let attached = bundle.data_schema().unwrap();
        assert_eq!(attached.primary_dimension, "keyword");
    }

    #[test]
    fn resolves_dotted_evidence_path() {
        let schema = DataSchema::default();
        let bundle = FeaturesBundle::from_value(
            json!({
                "segment_performance": {
                    "by_keyword": {
                        "fanny_pack_men": {
                            "metrics": {"roas": 3.74}
                        }
                    }
                }
            }),
            &schema,
        );
        let value = bundle
            .resolve_path("segment_performance.by_keyword.fanny_pack_men.metrics.roas")
            .unwrap();
        assert_eq!(value, &json!(3.74));
    }
}
