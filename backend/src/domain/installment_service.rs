//! Installment engine: splits a card purchase into a cent-exact series of
//! charges, one per invoice.

use chrono::{NaiveDate, Utc};
use log::{debug, info, warn};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use shared::{
    CreditCard, InstallmentLink, InstallmentSummary, PaymentMethod, SeriesLink, Transaction,
};

use crate::config::EngineConfig;
use crate::domain::commands::installments::{
    CancellationPlan, InstallmentConfig, InstallmentSeries, SplitAmount,
};
use crate::domain::fiscal_calendar::{card_fiscal_month, FiscalCalendar};
use crate::domain::invoice_aggregator::InvoiceAggregator;
use crate::domain::models::validation::{InstallmentConfigError, ValidationReport};
use crate::errors::{EngineError, EngineResult};

const CENT: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

fn has_sub_cent_precision(value: Decimal) -> bool {
    value.normalize().scale() > 2
}

/// Split `total` into `installments` values that sum to it exactly.
///
/// Every value starts at `total / installments` truncated to the cent; the
/// leftover cents go one each to the last entries.
pub fn split_amount(total: Decimal, installments: u32) -> EngineResult<SplitAmount> {
    if installments == 0 {
        return Err(EngineError::Validation(
            "Number of installments must be greater than zero".to_string(),
        ));
    }
    if total < Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "Total value cannot be negative (got {})",
            total
        )));
    }
    if has_sub_cent_precision(total) {
        return Err(EngineError::Validation(format!(
            "Total value {} has more than 2 decimal places",
            total
        )));
    }

    let count = Decimal::from(installments);
    let per_installment = (total / count).round_dp_with_strategy(2, RoundingStrategy::ToZero);
    let leftover_cents = ((total - per_installment * count) / CENT)
        .to_u32()
        .ok_or_else(|| EngineError::Validation(format!("Cannot split {} into {} parts", total, installments)))?;

    let first_adjusted = installments - leftover_cents;
    let values = (0..installments)
        .map(|i| {
            if i >= first_adjusted {
                per_installment + CENT
            } else {
                per_installment
            }
        })
        .collect();

    Ok(SplitAmount {
        per_installment,
        values,
    })
}

/// Close date of each installment's invoice.
///
/// The first lands on the invoice covering the purchase; each following one
/// is a month later, always on the card's close day clamped to the month end.
pub fn invoice_dates_for_installments(purchase_date: NaiveDate, card: &CreditCard, installments: u32) -> Vec<NaiveDate> {
    let first = card_fiscal_month(purchase_date, card);
    (0..installments)
        .map(|i| first.plus_months(i as i32).day_clamped(card.invoice_close_day))
        .collect()
}

/// Only description and category may change on a single installment
pub fn validate_installment_edit(original: &Transaction, edited: &Transaction) -> EngineResult<()> {
    let mut changed = Vec::new();
    if original.value != edited.value {
        changed.push("value");
    }
    if original.date != edited.date {
        changed.push("date");
    }
    if original.card_id != edited.card_id {
        changed.push("card");
    }
    if original.payment_method != edited.payment_method {
        changed.push("payment method");
    }
    if original.transaction_type != edited.transaction_type {
        changed.push("type");
    }

    if changed.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "Installments only allow description and category changes (attempted: {}); cancel and recreate the purchase instead",
            changed.join(", ")
        )))
    }
}

/// Plan removal of every installment from `from_index` (1-based) onwards.
///
/// The summary record and invoice totals are left as they are; see
/// [`reconcile_cancellation`] for the explicit invoice reversal.
pub fn cancel_remaining(installment_id: &str, from_index: u32, all: &[Transaction]) -> EngineResult<CancellationPlan> {
    if !all.iter().any(|t| t.installment_id() == Some(installment_id)) {
        return Err(EngineError::Consistency(format!(
            "Installment series {} not found",
            installment_id
        )));
    }

    let mut removed: Vec<Transaction> = all
        .iter()
        .filter(|t| {
            t.installment()
                .map(|link| link.installment_id == installment_id && link.installment_index >= from_index)
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    removed.sort_by_key(|t| t.installment().map(|link| link.installment_index).unwrap_or(0));

    let removed_ids = removed
        .iter()
        .filter_map(|t| {
            if t.id.is_none() {
                warn!("Unsaved installment '{}' skipped during cancellation", t.description);
            }
            t.id.clone()
        })
        .collect::<Vec<_>>();

    info!(
        "Cancelling {} installment(s) of {} from index {}",
        removed_ids.len(),
        installment_id,
        from_index
    );
    Ok(CancellationPlan {
        installment_id: installment_id.to_string(),
        removed_ids,
        removed,
    })
}

/// Subtract cancelled installments from their invoices.
///
/// Opt-in: cancellation never touches invoices on its own. Either every
/// reversal applies or the aggregator is left unchanged.
pub fn reconcile_cancellation(
    plan: &CancellationPlan,
    cards: &[CreditCard],
    aggregator: &mut InvoiceAggregator,
) -> EngineResult<()> {
    let mut staged = aggregator.clone();
    for transaction in plan.removed.iter().filter(|t| t.invoice_id.is_some()) {
        staged.reverse_transaction(transaction, cards)?;
    }
    *aggregator = staged;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InstallmentService {
    calendar: FiscalCalendar,
    min_installments: u32,
    max_installments: u32,
    min_installment_value: Decimal,
}

impl InstallmentService {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            calendar: FiscalCalendar::new(config.month_close_rule),
            min_installments: config.min_installments,
            max_installments: config.max_installments,
            min_installment_value: config.min_installment_value,
        }
    }

    pub fn validate_config(
        &self,
        config: &InstallmentConfig,
        today: NaiveDate,
    ) -> ValidationReport<InstallmentConfigError> {
        let mut errors = Vec::new();

        if config.total_value <= Decimal::ZERO {
            errors.push(InstallmentConfigError::NonPositiveTotal);
        }
        if has_sub_cent_precision(config.total_value) {
            errors.push(InstallmentConfigError::SubCentPrecision(config.total_value));
        }

        let count_in_range = (self.min_installments..=self.max_installments).contains(&config.installments);
        if !count_in_range {
            errors.push(InstallmentConfigError::InstallmentCountOutOfRange {
                got: config.installments,
                min: self.min_installments,
                max: self.max_installments,
            });
        }

        if config.installments > 0 && config.total_value > Decimal::ZERO {
            let per_installment = (config.total_value / Decimal::from(config.installments))
                .round_dp_with_strategy(2, RoundingStrategy::ToZero);
            if per_installment < self.min_installment_value {
                errors.push(InstallmentConfigError::BelowMinimumInstallment {
                    per_installment,
                    minimum: self.min_installment_value,
                });
            }
        }

        if config.card.is_none() {
            errors.push(InstallmentConfigError::MissingCard);
        }
        if config.purchase_date > today {
            errors.push(InstallmentConfigError::PurchaseDateInFuture(config.purchase_date));
        }

        ValidationReport::from_errors(errors)
    }

    /// Build the summary record and every installment of a purchase
    pub fn build_series(
        &self,
        base: &Transaction,
        config: &InstallmentConfig,
        today: NaiveDate,
    ) -> EngineResult<InstallmentSeries> {
        let report = self.validate_config(config, today);
        if !report.is_valid {
            return Err(EngineError::InvalidInstallmentConfig(report.errors));
        }
        let card = config
            .card
            .as_ref()
            .ok_or_else(|| EngineError::InvalidInstallmentConfig(vec![InstallmentConfigError::MissingCard]))?;

        let split = split_amount(config.total_value, config.installments)?;
        let dates = invoice_dates_for_installments(config.purchase_date, card, config.installments);
        let installment_id = InstallmentLink::generate_id();
        let created_at = Some(Utc::now());
        let total = config.installments;

        let master = Transaction {
            id: None,
            description: format!(
                "{} - {:.2} in {}x of {:.2}",
                base.description, config.total_value, total, split.per_installment
            ),
            value: Decimal::ZERO,
            date: config.purchase_date,
            fiscal_month: self
                .calendar
                .assign(config.purchase_date, PaymentMethod::Credit, Some(card)),
            payment_method: PaymentMethod::Credit,
            card_id: Some(card.id.clone()),
            invoice_id: None,
            series: SeriesLink::InstallmentMaster(InstallmentSummary {
                installment_id: installment_id.clone(),
                installment_total: total,
                total_value: config.total_value,
                per_installment: split.per_installment,
                original_purchase_date: config.purchase_date,
            }),
            created_at,
            ..base.clone()
        };

        let installments = split
            .values
            .iter()
            .zip(dates)
            .enumerate()
            .map(|(i, (value, date))| {
                let index = i as u32 + 1;
                debug!("Installment {}/{} of {} on {}", index, total, value, date);
                Transaction {
                    id: None,
                    description: format!("{} ({}/{})", base.description, index, total),
                    value: *value,
                    date,
                    fiscal_month: self.calendar.assign(date, PaymentMethod::Credit, Some(card)),
                    payment_method: PaymentMethod::Credit,
                    card_id: Some(card.id.clone()),
                    invoice_id: None,
                    series: SeriesLink::Installment(InstallmentLink {
                        installment_id: installment_id.clone(),
                        installment_index: index,
                        installment_total: total,
                        installment_value: *value,
                        total_value: config.total_value,
                        original_purchase_date: config.purchase_date,
                    }),
                    created_at,
                    ..base.clone()
                }
            })
            .collect::<Vec<_>>();

        info!(
            "Created installment series {}: {} in {}x on card {}",
            installment_id, config.total_value, total, card.name
        );
        Ok(InstallmentSeries {
            master,
            installments,
        })
    }

    /// Same as [`build_series`](Self::build_series), also charging each
    /// installment to its invoice
    pub fn build_series_with_invoices(
        &self,
        base: &Transaction,
        config: &InstallmentConfig,
        today: NaiveDate,
        aggregator: &mut InvoiceAggregator,
    ) -> EngineResult<InstallmentSeries> {
        let mut series = self.build_series(base, config, today)?;
        let cards: Vec<CreditCard> = config.card.iter().cloned().collect();
        aggregator.charge_all(&mut series.installments, &cards)?;
        Ok(series)
    }
}

impl Default for InstallmentService {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
