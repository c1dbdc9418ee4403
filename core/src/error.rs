use thiserror::Error;

use crate::models::EntityId;

/// Result type alias used throughout the workflow engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Closed error sum type for the workflow engine.
///
/// Every failure mode from the store up through the orchestrator is a value
/// of this type, never a panic or an ad-hoc string. Each variant maps to one
/// of the error codes in the tool-facing contract via [`EngineError::error_code`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// User-recoverable: bad status string, bad id, malformed criteria JSON,
    /// backward transition disabled, sequential skip.
    #[error("validation error: {0}")]
    Validation(String),

    /// Entity id does not resolve to a row.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic lock lost; caller may re-read and retry.
    #[error("version conflict on {entity_id}: expected version {expected}, found {actual}")]
    VersionConflict {
        entity_id: EntityId,
        expected: i64,
        actual: i64,
    },

    /// A prerequisite for the requested transition was not met.
    #[error("dependency failure: {0}")]
    DependencyFailure(String),

    /// Verification gate blocked a `complete` trigger.
    #[error("verification gate blocked: {failing:?}")]
    GateBlocked { failing: Vec<String> },

    /// Underlying storage error. Fatal to the operation, not the process.
    #[error("database error: {0}")]
    Database(String),

    /// Unexpected internal error; always logged.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(entity_type: &str, id: EntityId) -> Self {
        Self::NotFound(format!("{entity_type} {id} not found"))
    }

    pub fn empty_field(field: &str) -> Self {
        Self::Validation(format!("field '{field}' cannot be empty"))
    }

    pub fn version_conflict(entity_id: EntityId, expected: i64, actual: i64) -> Self {
        Self::VersionConflict {
            entity_id,
            expected,
            actual,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, EngineError::VersionConflict { .. })
    }

    /// The closed error code from the tool-facing contract.
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::NotFound(_) => "RESOURCE_NOT_FOUND",
            EngineError::DependencyFailure(_) => "DEPENDENCY_ERROR",
            EngineError::VersionConflict { .. } => "CONFLICT_ERROR",
            EngineError::GateBlocked { .. } => "DEPENDENCY_ERROR",
            EngineError::Database(_) => "DATABASE_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP-status-equivalent, kept for parity with the ambient error model
    /// the rest of the collaborator layer (out of scope here) expects.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_) => 400,
            EngineError::NotFound(_) => 404,
            EngineError::DependencyFailure(_) => 422,
            EngineError::VersionConflict { .. } => 409,
            EngineError::GateBlocked { .. } => 422,
            EngineError::Database(_) => 500,
            EngineError::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_mapping() {
        assert_eq!(EngineError::Validation("x".into()).error_code(), "VALIDATION_ERROR");
        assert_eq!(EngineError::NotFound("x".into()).error_code(), "RESOURCE_NOT_FOUND");
        assert_eq!(
            EngineError::version_conflict(EntityId::new(), 1, 2).error_code(),
            "CONFLICT_ERROR"
        );
        assert_eq!(
            EngineError::GateBlocked { failing: vec!["tests pass".into()] }.error_code(),
            "DEPENDENCY_ERROR"
        );
    }

    #[test]
    fn predicates() {
        assert!(EngineError::NotFound("x".into()).is_not_found());
        assert!(!EngineError::Validation("x".into()).is_not_found());
        assert!(EngineError::Validation("x".into()).is_validation());
        assert!(EngineError::version_conflict(EntityId::new(), 1, 2).is_version_conflict());
    }
}
