//! Validation errors produced while turning LLM JSON output into the
//! crate's concrete data types.
//!
//! Unlike a generic schema-walker, the shapes being validated here are
//! fixed (`InsightCandidate`, `StrategyPatch`), so this module is just the
//! error vocabulary and a couple of small helpers shared by `insights` and
//! `patch`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Error produced when a parsed LLM value does not satisfy the shape or
/// constraints required of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "error_type", rename_all = "snake_case")]
pub enum ValidationError {
    /// A required field is missing.
    MissingField { field: String },

    /// A field has the wrong type.
    TypeMismatch {
        field: String,
        expected: String,
        value_preview: String,
    },

    /// An enum-valued field has a value outside its allowed set.
    EnumInvalid {
        field: String,
        value: String,
        allowed: Vec<String>,
    },

    /// A cross-field constraint was violated (e.g. weak evidence without a
    /// learning-keyword action).
    ConstraintViolated { field: String, constraint: String },

    /// Catch-all for anything not covered above.
    Custom(String),
}

impl ValidationError {
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField { field: field.into() }
    }

    pub fn type_mismatch(field: impl Into<String>, expected: impl Into<String>, value: &Value) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected: expected.into(),
            value_preview: truncate_preview(&value.to_string(), 100),
        }
    }

    pub fn enum_invalid(field: impl Into<String>, value: impl Into<String>, allowed: Vec<String>) -> Self {
        Self::EnumInvalid {
            field: field.into(),
            value: value.into(),
            allowed,
        }
    }

    pub fn constraint_violated(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self::ConstraintViolated {
            field: field.into(),
            constraint: constraint.into(),
        }
    }

    pub fn to_user_message(&self) -> String {
        match self {
            Self::MissingField { field } => format!("missing required field '{field}'"),
            Self::TypeMismatch { field, expected, value_preview } => {
                format!("field '{field}' should be {expected}, got {value_preview}")
            }
            Self::EnumInvalid { field, value, allowed } => {
                format!("field '{field}' has invalid value '{value}'; allowed: {}", allowed.join(", "))
            }
            Self::ConstraintViolated { field, constraint } => {
                format!("field '{field}' violates constraint: {constraint}")
            }
            Self::Custom(msg) => msg.clone(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_user_message())
    }
}

impl std::error::Error for ValidationError {}

fn truncate_preview(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len])
    }
}

/// Words that mark an action as a learning/test action rather than a
/// direct change — required whenever `data_support = weak`.
pub const LEARNING_KEYWORDS: &[&str] = &["pilot", "test", "experiment", "a/b", "validate", "trial"];

/// True if `text` contains at least one learning keyword (case-insensitive).
pub fn contains_learning_keyword(text: &str) -> bool {
    let lowered = text.to_lowercase();
    LEARNING_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_learning_keywords_case_insensitively() {
        assert!(contains_learning_keyword("Run a PILOT on this segment"));
        assert!(contains_learning_keyword("set up an A/B test"));
        assert!(!contains_learning_keyword("increase budget by 20%"));
    }

    #[test]
    fn user_message_mentions_field_name() {
        let err = ValidationError::missing_field("confidence");
        assert!(err.to_user_message().contains("confidence"));
    }
}
