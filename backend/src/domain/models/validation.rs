//! Validation reports for recurrence rules and installment configurations.
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

/// Outcome of validating caller input before any series is built
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport<E> {
    pub is_valid: bool,
    pub errors: Vec<E>,
}

impl<E> ValidationReport<E> {
    pub fn from_errors(errors: Vec<E>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
pub enum RecurrenceRuleError {
    #[error("Unsupported recurrence type")]
    UnsupportedType,
    #[error("Interval must be greater than zero")]
    NonPositiveInterval,
    #[error("Either an end date or a number of occurrences is required")]
    MissingEnd,
    #[error("Specify only an end date or a number of occurrences, not both")]
    BothEndsSet,
    #[error("End date {0} must be in the future")]
    EndDateNotInFuture(NaiveDate),
    #[error("Number of occurrences ({0}) must be at least 2")]
    CountTooSmall(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
pub enum InstallmentConfigError {
    #[error("Total value must be greater than zero")]
    NonPositiveTotal,
    #[error("Total value {0} has more than 2 decimal places")]
    SubCentPrecision(Decimal),
    #[error("Number of installments must be between {min} and {max} (got {got})")]
    InstallmentCountOutOfRange { got: u32, min: u32, max: u32 },
    #[error("Each installment must be at least {minimum} (got {per_installment})")]
    BelowMinimumInstallment {
        per_installment: Decimal,
        minimum: Decimal,
    },
    #[error("Select a valid credit card")]
    MissingCard,
    #[error("Purchase date {0} cannot be in the future")]
    PurchaseDateInFuture(NaiveDate),
}
