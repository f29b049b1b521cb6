//! # Domain Module
//!
//! Fiscal accounting and series-expansion engine for the ledger calendar.
//!
//! Every service here is a pure transform over records handed in by the
//! caller. Nothing reads from or writes to storage: operations return complete
//! write batches that the caller persists atomically.
//!
//! ## Module Organization
//!
//! - **fiscal_calendar**: Assigns dates to fiscal months (global close rule or card cycle)
//! - **recurrence_service**: Expands recurrence rules and propagates scoped edits/deletes
//! - **installment_service**: Splits card purchases into cent-exact installment series
//! - **invoice_aggregator**: Accumulates card charges into monthly invoices
//! - **balance_service**: Daily running balances under the fiscal and cashflow views
//! - **calendar**: Calendar month grid built on top of the balance service
//!
//! ## Business Rules
//!
//! - A transaction's fiscal month is computed once and persisted, never on read
//! - Installment values always sum to the purchase total, to the cent
//! - Installment summary records are informational and never summed
//! - Card charges move balances only through their invoice's due date
//! - Invoices are created by the first charge and never deleted by the engine

pub mod balance_service;
pub mod calendar;
pub mod commands;
pub mod fiscal_calendar;
pub mod installment_service;
pub mod invoice_aggregator;
pub mod models;
pub mod recurrence_service;

pub use balance_service::*;
pub use calendar::*;
pub use commands::*;
pub use fiscal_calendar::*;
pub use installment_service::*;
pub use invoice_aggregator::*;
pub use recurrence_service::*;
