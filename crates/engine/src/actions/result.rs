//! Action execution result types.

use serde::{Deserialize, Serialize};

/// Outcome of one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Succeeded,
    Failed,
    /// Not executed: the `when` guard was unmet, unparsable, or this was a dry run.
    Skipped,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Succeeded => write!(f, "succeeded"),
            ActionStatus::Failed => write!(f, "failed"),
            ActionStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Record of an attempted action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_type: String,

    pub status: ActionStatus,

    /// Handler output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Error message on failure, skip reason otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ActionResult {
    pub fn succeeded(action_type: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            action_type: action_type.into(),
            status: ActionStatus::Succeeded,
            output: Some(output),
            error: None,
            duration_ms: None,
        }
    }

    pub fn failed(action_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            status: ActionStatus::Failed,
            output: None,
            error: Some(error.into()),
            duration_ms: None,
        }
    }

    pub fn skipped(action_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            status: ActionStatus::Skipped,
            output: None,
            error: Some(reason.into()),
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Succeeded
    }

    pub fn is_failure(&self) -> bool {
        self.status == ActionStatus::Failed
    }
}
