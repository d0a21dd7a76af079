//! Error types for the Tramita engine.
//!
//! Action-level errors are converted into failure records by the rule
//! engine; coordination errors (illegal transitions, lock contention) are
//! returned to the caller unchanged.

use thiserror::Error;

/// Engine-level errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed conditional expression.
    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    /// Action type with no registered handler.
    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    /// Condition operator outside the supported set.
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// Illegal task or instance state change.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Referenced task, instance, workflow or entity does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Entity does not expose a capability the action requires.
    #[error("Missing capability: {0}")]
    MissingCapability(String),

    /// Action payload could not be decoded.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Rule set or input failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Concurrent modification detected.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Group lock could not be acquired in time.
    #[error("Lock contention on group '{0}'")]
    LockContention(String),

    /// Wait was abandoned because the awaited instance reached a terminal state.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Wait exceeded its deadline.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// Store collaborator failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Notification collaborator failure.
    #[error("Notification error: {0}")]
    Notification(String),

    /// Message template failed to render.
    #[error("Template error: {0}")]
    Template(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Build a parse error at the given byte offset.
    pub fn parse(offset: usize, message: impl Into<String>) -> Self {
        EngineError::Parse {
            offset,
            message: message.into(),
        }
    }

    /// Whether this error came from the expression parser.
    pub fn is_parse(&self) -> bool {
        matches!(self, EngineError::Parse { .. })
    }
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<envy::Error> for EngineError {
    fn from(err: envy::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<minijinja::Error> for EngineError {
    fn from(err: minijinja::Error) -> Self {
        EngineError::Template(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Validation(format!("Invalid rule set document: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = EngineError::NotFound("instance 42".to_string());
        assert_eq!(err.to_string(), "Resource not found: instance 42");
    }

    #[test]
    fn test_parse_error_display() {
        let err = EngineError::parse(3, "unexpected token '>'");
        assert!(err.is_parse());
        assert_eq!(
            err.to_string(),
            "Parse error at offset 3: unexpected token '>'"
        );
    }

    #[test]
    fn test_from_serde_json() {
        let err: EngineError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, EngineError::Serialization(_)));
    }
}
