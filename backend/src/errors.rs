//! Error taxonomy for the ledger engine.
//!
//! Every engine operation fails fast: an `Err` is returned before any output
//! list is produced, so callers never see partially-built series.

use crate::domain::models::validation::{InstallmentConfigError, RecurrenceRuleError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Caller-supplied input is invalid; surface it to the user before writing
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid recurrence rule: {}", join_messages(.0))]
    InvalidRecurrenceRule(Vec<RecurrenceRuleError>),

    #[error("Invalid installment configuration: {}", join_messages(.0))]
    InvalidInstallmentConfig(Vec<InstallmentConfigError>),

    /// A card, category or record referenced by id is missing from the snapshot
    #[error("{kind} not found: {id}")]
    Reference { kind: &'static str, id: String },

    /// The snapshot contradicts itself (e.g. a series that cannot be found)
    #[error("Inconsistent ledger data: {0}")]
    Consistency(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn card_not_found(id: &str) -> Self {
        EngineError::Reference {
            kind: "Credit card",
            id: id.to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::InvalidRecurrenceRule(_)
                | EngineError::InvalidInstallmentConfig(_)
        )
    }
}

fn join_messages<E: std::fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
