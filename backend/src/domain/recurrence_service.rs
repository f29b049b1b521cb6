//! Recurrence engine.
//!
//! Expands a recurrence rule into dated instances and plans scoped changes
//! (this one, this and future, all) across an existing series. Instance `k`
//! is always computed from the series start, so month-end clamping never
//! drifts: a series starting Jan 31 goes Feb 28, Mar 31, Apr 30.

use chrono::{Duration, Months, NaiveDate, Utc};
use log::{debug, info, warn};
use shared::{
    CreditCard, EditScope, RecurrenceLink, RecurrenceRule, RecurrenceType, SeriesLink, Transaction,
};

use crate::config::EngineConfig;
use crate::domain::commands::series::{SeriesOperation, SeriesWriteBatch};
use crate::domain::fiscal_calendar::FiscalCalendar;
use crate::domain::installment_service::validate_installment_edit;
use crate::domain::models::validation::{RecurrenceRuleError, ValidationReport};
use crate::errors::{EngineError, EngineResult};

/// Check a rule before any instance is generated
pub fn validate_rule(rule: &RecurrenceRule, today: NaiveDate) -> ValidationReport<RecurrenceRuleError> {
    let mut errors = Vec::new();

    if rule.rule_type == RecurrenceType::Unsupported {
        errors.push(RecurrenceRuleError::UnsupportedType);
    }
    if rule.interval < 1 {
        errors.push(RecurrenceRuleError::NonPositiveInterval);
    }

    match (rule.end_date, rule.count) {
        (None, None) => errors.push(RecurrenceRuleError::MissingEnd),
        (Some(_), Some(_)) => errors.push(RecurrenceRuleError::BothEndsSet),
        _ => {}
    }
    if let Some(end_date) = rule.end_date {
        if end_date <= today {
            errors.push(RecurrenceRuleError::EndDateNotInFuture(end_date));
        }
    }
    if let Some(count) = rule.count {
        if count < 2 {
            errors.push(RecurrenceRuleError::CountTooSmall(count));
        }
    }

    ValidationReport::from_errors(errors)
}

/// `start` advanced by `steps` rule intervals, clamped to the month end
fn advance(start: NaiveDate, rule: &RecurrenceRule, steps: u32) -> EngineResult<NaiveDate> {
    let months = match rule.rule_type {
        RecurrenceType::Monthly | RecurrenceType::Custom => rule.interval.checked_mul(steps),
        RecurrenceType::Yearly => rule
            .interval
            .checked_mul(steps)
            .and_then(|years| years.checked_mul(12)),
        RecurrenceType::Unsupported => {
            return Err(EngineError::InvalidRecurrenceRule(vec![
                RecurrenceRuleError::UnsupportedType,
            ]))
        }
    };

    months
        .and_then(|months| start.checked_add_months(Months::new(months)))
        .ok_or_else(|| {
            EngineError::Validation(format!(
                "Recurrence date out of range ({} steps from {})",
                steps, start
            ))
        })
}

/// Date one interval after `date`
pub fn next_date(date: NaiveDate, rule: &RecurrenceRule) -> EngineResult<NaiveDate> {
    advance(date, rule, 1)
}

/// Every instance date of a series starting at `start`.
///
/// `count` bounds the series when set; otherwise `end_date` does, with
/// `max_instances` as a hard cap.
pub fn expand_series(
    start: NaiveDate,
    rule: &RecurrenceRule,
    today: NaiveDate,
    max_instances: usize,
) -> EngineResult<Vec<NaiveDate>> {
    let report = validate_rule(rule, today);
    if !report.is_valid {
        return Err(EngineError::InvalidRecurrenceRule(report.errors));
    }

    let limit = rule
        .count
        .map(|count| count as usize)
        .unwrap_or(max_instances);

    let mut dates = vec![start];
    let mut step = 1;
    while dates.len() < limit {
        let date = advance(start, rule, step)?;
        if let Some(end_date) = rule.end_date {
            if date > end_date {
                break;
            }
        }
        dates.push(date);
        step += 1;
    }

    debug!("Expanded {} instance(s) from {}", dates.len(), start);
    Ok(dates)
}

/// Short English summary of a rule, e.g. "Every 2 months, 6 times"
pub fn describe_rule(rule: &RecurrenceRule) -> String {
    let mut description = match (rule.rule_type, rule.interval) {
        (RecurrenceType::Monthly, 1) => "Monthly".to_string(),
        (RecurrenceType::Monthly, n) | (RecurrenceType::Custom, n) => format!("Every {} months", n),
        (RecurrenceType::Yearly, 1) => "Yearly".to_string(),
        (RecurrenceType::Yearly, n) => format!("Every {} years", n),
        (RecurrenceType::Unsupported, _) => "Custom recurrence".to_string(),
    };

    if let Some(end_date) = rule.end_date {
        description.push_str(&format!(" until {}", end_date));
    } else if let Some(count) = rule.count {
        description.push_str(&format!(", {} times", count));
    }
    description
}

/// Members of a recurrence series, ordered by index
fn series_members<'a>(recurrence_id: &str, all: &'a [Transaction]) -> Vec<&'a Transaction> {
    let mut members: Vec<&Transaction> = all
        .iter()
        .filter(|t| {
            t.recurrence()
                .map(|link| link.recurrence_id == recurrence_id)
                .unwrap_or(false)
        })
        .collect();
    members.sort_by_key(|t| t.recurrence().map(|link| link.recurrence_index).unwrap_or(0));
    members
}

/// Ids of the records a scoped change touches
pub fn affected_instances(target: &Transaction, scope: EditScope, all: &[Transaction]) -> Vec<String> {
    let Some(id) = target.id.clone() else {
        return Vec::new();
    };
    let Some(link) = target.recurrence() else {
        return vec![id];
    };

    if scope == EditScope::ThisOnly {
        return vec![id];
    }

    let series = series_members(&link.recurrence_id, all);
    if series.is_empty() {
        warn!(
            "Series {} not found for transaction {}, treating it as a single record",
            link.recurrence_id, id
        );
        return vec![id];
    }

    let mut members: Vec<(u32, String)> = series
        .into_iter()
        .filter_map(|t| Some((t.recurrence()?.recurrence_index, t.id.clone()?)))
        .filter(|(index, _)| scope == EditScope::All || *index >= link.recurrence_index)
        .collect();
    // The target always belongs to its own series, stored copy or not
    if !members.iter().any(|(_, member)| *member == id) {
        members.push((link.recurrence_index, id));
        members.sort_by_key(|(index, _)| *index);
    }
    members.into_iter().map(|(_, member)| member).collect()
}

/// Copy the ledger fields of `edited` onto `original`, keeping the record's
/// identity, series membership and invoice link
fn merge_ledger_fields(original: &Transaction, edited: &Transaction) -> Transaction {
    Transaction {
        id: original.id.clone(),
        invoice_id: original.invoice_id.clone(),
        series: original.series.clone(),
        created_at: original.created_at,
        ..edited.clone()
    }
}

fn shift_date(date: NaiveDate, delta_days: i64) -> EngineResult<NaiveDate> {
    date.checked_add_signed(Duration::days(delta_days))
        .ok_or_else(|| EngineError::Validation(format!("Cannot move {} by {} days", date, delta_days)))
}

#[derive(Debug, Clone)]
pub struct RecurrenceService {
    calendar: FiscalCalendar,
    max_instances: usize,
}

impl RecurrenceService {
    pub fn new(calendar: FiscalCalendar, max_instances: usize) -> Self {
        Self {
            calendar,
            max_instances,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            FiscalCalendar::new(config.month_close_rule),
            config.max_recurrence_instances,
        )
    }

    /// Build every instance of a new series from `base`
    pub fn create_series(
        &self,
        base: &Transaction,
        rule: &RecurrenceRule,
        today: NaiveDate,
        cards: &[CreditCard],
    ) -> EngineResult<Vec<Transaction>> {
        if base.series != SeriesLink::Plain {
            return Err(EngineError::Validation(
                "Transaction already belongs to a series".to_string(),
            ));
        }

        let dates = expand_series(base.date, rule, today, self.max_instances)?;
        let recurrence_id = RecurrenceLink::generate_id();
        let created_at = Utc::now();

        let mut instances = Vec::with_capacity(dates.len());
        for (index, date) in dates.into_iter().enumerate() {
            let mut instance = Transaction {
                id: None,
                date,
                invoice_id: None,
                series: SeriesLink::Recurring(RecurrenceLink {
                    recurrence_id: recurrence_id.clone(),
                    recurrence_index: index as u32,
                    rule: rule.clone(),
                }),
                created_at: Some(created_at),
                ..base.clone()
            };
            instance.fiscal_month = self.calendar.assign_for(&instance, cards)?;
            debug!("Instance {} on {} in {}", index, date, instance.fiscal_month);
            instances.push(instance);
        }

        info!(
            "Created recurrence series {} with {} instance(s) ({})",
            recurrence_id,
            instances.len(),
            describe_rule(rule)
        );
        Ok(instances)
    }

    /// Plan an edit, break or delete across `scope`.
    ///
    /// `target` is the stored record the user acted on; any edit payload is
    /// carried by `operation`.
    pub fn plan_series_change(
        &self,
        target: &Transaction,
        scope: EditScope,
        operation: &SeriesOperation,
        all: &[Transaction],
        cards: &[CreditCard],
    ) -> EngineResult<SeriesWriteBatch> {
        if target.id.is_none() {
            return Err(EngineError::Validation(
                "Cannot change a transaction that has not been saved".to_string(),
            ));
        }

        let batch = match operation {
            SeriesOperation::Edit(edited) => SeriesWriteBatch {
                updates: self.apply_edit_to_series(target, edited, scope, all, cards)?,
                deletions: Vec::new(),
            },
            SeriesOperation::Break(edited) => SeriesWriteBatch {
                updates: self.break_series(target, edited, scope, all, cards)?,
                deletions: Vec::new(),
            },
            SeriesOperation::Delete => SeriesWriteBatch {
                updates: Vec::new(),
                deletions: affected_instances(target, scope, all),
            },
        };

        info!(
            "Planned {:?} change: {} update(s), {} deletion(s)",
            scope,
            batch.updates.len(),
            batch.deletions.len()
        );
        Ok(batch)
    }

    /// Propagate an edit across `scope`, moving dates by the edit's offset
    pub fn apply_edit_to_series(
        &self,
        target: &Transaction,
        edited: &Transaction,
        scope: EditScope,
        all: &[Transaction],
        cards: &[CreditCard],
    ) -> EngineResult<Vec<Transaction>> {
        if target.installment().is_some() || target.is_installment_master() {
            validate_installment_edit(target, edited)?;
        }

        if scope == EditScope::ThisOnly || target.recurrence().is_none() {
            return Ok(vec![self.edit_single(target, edited, cards)?]);
        }

        let delta_days = (edited.date - target.date).num_days();
        let mut updates = Vec::new();
        for original in self.resolve_affected(target, scope, all) {
            let mut updated = merge_ledger_fields(original, edited);
            updated.date = shift_date(original.date, delta_days)?;
            updated.fiscal_month = self.refreshed_fiscal_month(original, &updated, cards)?;
            updates.push(updated);
        }

        debug!("Edit moved {} instance(s) by {} day(s)", updates.len(), delta_days);
        Ok(updates)
    }

    /// Detach `scope` from its series, applying the edited ledger fields
    pub fn break_series(
        &self,
        target: &Transaction,
        edited: &Transaction,
        scope: EditScope,
        all: &[Transaction],
        cards: &[CreditCard],
    ) -> EngineResult<Vec<Transaction>> {
        if target.installment().is_some() || target.is_installment_master() {
            return Err(EngineError::Validation(
                "Installments cannot be detached from their purchase".to_string(),
            ));
        }

        let Some(link) = target.recurrence() else {
            return Ok(vec![self.edit_single(target, edited, cards)?]);
        };

        match scope {
            EditScope::ThisOnly => {
                let mut updated = self.edit_single(target, edited, cards)?;
                updated.series = SeriesLink::Plain;
                Ok(vec![updated])
            }
            EditScope::ThisAndFuture => {
                let recurrence_id = RecurrenceLink::generate_id();
                let mut updates = Vec::new();
                for (index, original) in self.resolve_affected(target, scope, all).into_iter().enumerate() {
                    let mut updated = merge_ledger_fields(original, edited);
                    updated.date = original.date;
                    updated.series = SeriesLink::Recurring(RecurrenceLink {
                        recurrence_id: recurrence_id.clone(),
                        recurrence_index: index as u32,
                        rule: link.rule.clone(),
                    });
                    updated.fiscal_month = self.refreshed_fiscal_month(original, &updated, cards)?;
                    updates.push(updated);
                }
                info!(
                    "Split {} instance(s) off series {} into {}",
                    updates.len(),
                    link.recurrence_id,
                    recurrence_id
                );
                Ok(updates)
            }
            EditScope::All => self.apply_edit_to_series(target, edited, scope, all, cards),
        }
    }

    fn edit_single(
        &self,
        target: &Transaction,
        edited: &Transaction,
        cards: &[CreditCard],
    ) -> EngineResult<Transaction> {
        let mut updated = merge_ledger_fields(target, edited);
        // A fiscal month the user changed by hand wins over the suggestion
        if edited.fiscal_month == target.fiscal_month {
            updated.fiscal_month = self.refreshed_fiscal_month(target, &updated, cards)?;
        }
        Ok(updated)
    }

    /// Fiscal month after an edit: recomputed only when an input to the
    /// assignment changed
    fn refreshed_fiscal_month(
        &self,
        original: &Transaction,
        updated: &Transaction,
        cards: &[CreditCard],
    ) -> EngineResult<shared::FiscalMonth> {
        let inputs_changed = original.date != updated.date
            || original.payment_method != updated.payment_method
            || original.card_id != updated.card_id;
        if inputs_changed {
            self.calendar.assign_for(updated, cards)
        } else {
            Ok(original.fiscal_month)
        }
    }

    /// Stored records for the affected ids, in series order
    fn resolve_affected<'a>(
        &self,
        target: &'a Transaction,
        scope: EditScope,
        all: &'a [Transaction],
    ) -> Vec<&'a Transaction> {
        affected_instances(target, scope, all)
            .iter()
            .filter_map(|id| {
                let found = all.iter().find(|t| t.id.as_deref() == Some(id.as_str()));
                match found {
                    Some(record) => Some(record),
                    None if target.id.as_deref() == Some(id.as_str()) => Some(target),
                    None => {
                        warn!("Transaction {} listed in series but missing from snapshot", id);
                        None
                    }
                }
            })
            .collect()
    }
}

impl Default for RecurrenceService {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
