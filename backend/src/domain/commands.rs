//! Domain-level command and result types.
//!
//! Services never write anything themselves. They return these batches and
//! plans, and the caller persists each one atomically.

pub mod series {
    use shared::Transaction;

    /// What to do with the instances selected by an edit scope
    #[derive(Debug, Clone, PartialEq)]
    pub enum SeriesOperation {
        /// Apply the edited fields across the scope, keeping series membership
        Edit(Transaction),
        /// Apply the edited fields and detach the scope from its series
        Break(Transaction),
        Delete,
    }

    /// Records to write back after a series change.
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct SeriesWriteBatch {
        /// Full next state of each changed record
        pub updates: Vec<Transaction>,
        /// Ids of records to remove
        pub deletions: Vec<String>,
    }

    impl SeriesWriteBatch {
        pub fn is_empty(&self) -> bool {
            self.updates.is_empty() && self.deletions.is_empty()
        }
    }
}

pub mod installments {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use shared::{CreditCard, Transaction};

    /// Transient input for splitting a card purchase.
    #[derive(Debug, Clone, PartialEq)]
    pub struct InstallmentConfig {
        pub total_value: Decimal,
        pub installments: u32,
        pub card: Option<CreditCard>,
        pub purchase_date: NaiveDate,
    }

    /// Cent-exact split of a total.
    #[derive(Debug, Clone, PartialEq)]
    pub struct SplitAmount {
        /// Base amount before the remainder cents are distributed
        pub per_installment: Decimal,
        pub values: Vec<Decimal>,
    }

    /// Summary record plus the dated installments, ready to be written together.
    #[derive(Debug, Clone, PartialEq)]
    pub struct InstallmentSeries {
        pub master: Transaction,
        pub installments: Vec<Transaction>,
    }

    impl InstallmentSeries {
        /// Every record of the series, master first
        pub fn into_records(self) -> Vec<Transaction> {
            let mut records = Vec::with_capacity(self.installments.len() + 1);
            records.push(self.master);
            records.extend(self.installments);
            records
        }
    }

    /// Result of cancelling the remaining installments of a purchase.
    #[derive(Debug, Clone, PartialEq)]
    pub struct CancellationPlan {
        pub installment_id: String,
        /// Ids to delete
        pub removed_ids: Vec<String>,
        /// The cancelled records as they were, for an optional invoice reconciliation
        pub removed: Vec<Transaction>,
    }
}

pub use installments::*;
pub use series::*;
