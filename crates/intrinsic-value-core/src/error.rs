use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum IntrinsicValueError {
    #[error("Validation failed: {}", violations.join("; "))]
    Validation { violations: Vec<String> },

    #[error("Invalid assumption: {0}")]
    InvalidAssumption(String),

    #[error("Reentrant call: core DCF entered while already running (depth {depth})")]
    ReentrantCall { depth: u32 },

    #[error("Computation failure: {0}")]
    Computation(String),

    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Invalid configuration: {field} — {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl IntrinsicValueError {
    /// Errors that signal a programming bug rather than bad data. Recovery
    /// sites must re-raise these instead of degrading the result.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IntrinsicValueError::ReentrantCall { .. })
    }
}

impl From<serde_json::Error> for IntrinsicValueError {
    fn from(e: serde_json::Error) -> Self {
        IntrinsicValueError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_every_violation() {
        let err = IntrinsicValueError::Validation {
            violations: vec![
                "Shares outstanding must be positive".into(),
                "Revenue must be positive".into(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Validation failed: Shares outstanding must be positive; Revenue must be positive"
        );
    }

    #[test]
    fn test_only_reentrant_call_is_fatal() {
        assert!(IntrinsicValueError::ReentrantCall { depth: 1 }.is_fatal());
        assert!(!IntrinsicValueError::InvalidAssumption("wacc".into()).is_fatal());
        assert!(!IntrinsicValueError::Computation("nan".into()).is_fatal());
    }
}
