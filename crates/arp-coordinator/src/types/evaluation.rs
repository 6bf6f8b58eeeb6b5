//! Evaluation results attached to NodeRuns.

use serde::{Deserialize, Serialize};

/// Structured evaluation of a NodeRun's work.
///
/// Evaluation is independent of completion: it may be reported before,
/// after, or instead of outputs. Two results are the same report only if
/// every field matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Evaluator verdict, e.g. `pass`, `fail`, `needs_review`
    pub outcome: String,

    /// Optional numeric score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    /// Free-form feedback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,

    /// Evaluator-specific payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl EvaluationResult {
    pub fn new(outcome: impl Into<String>) -> Self {
        Self {
            outcome: outcome.into(),
            score: None,
            feedback: None,
            details: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
