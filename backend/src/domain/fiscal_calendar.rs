//! Fiscal calendar: maps calendar dates onto fiscal-month buckets.
//!
//! Two rules decide the bucket. Credit-card charges follow the card's
//! `invoice_close_day`; everything else follows the global `MonthCloseRule`.
//! The result is a suggestion computed once at creation/edit time and then
//! persisted on the record, never recomputed on read.

use chrono::{Datelike, Duration, Local, NaiveDate, Weekday};
use log::warn;
use shared::{CreditCard, FiscalMonth, MonthCloseRule, PaymentMethod, Transaction};

use crate::errors::{EngineError, EngineResult};

/// Format a date as its "YYYY-MM" fiscal month key
pub fn fiscal_month_key(date: NaiveDate) -> String {
    FiscalMonth::of(date).to_string()
}

/// Fail-safe variant of [`fiscal_month_key`] for raw input.
///
/// Accepts "YYYY-MM-DD" or an RFC 3339 timestamp. Anything else yields the
/// current month's key, so this must not be used as validation.
pub fn fiscal_month_key_from_str(raw: &str) -> String {
    let date_part = raw.trim().split('T').next().unwrap_or_default();
    match NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        Ok(date) => fiscal_month_key(date),
        Err(_) => {
            warn!("Invalid date for fiscal month key: {:?}, falling back to current month", raw);
            fiscal_month_key(Local::now().date_naive())
        }
    }
}

/// Largest fixed close day
pub const MAX_CLOSE_DAY: u32 = 31;
/// Largest offset for `LastBusinessDay`
pub const MAX_BUSINESS_DAY_OFFSET: u32 = 20;

/// Reject close rules outside the supported bounds
pub fn validate_close_rule(rule: &MonthCloseRule) -> EngineResult<()> {
    match *rule {
        MonthCloseRule::Day(day) if !(1..=MAX_CLOSE_DAY).contains(&day) => Err(EngineError::Validation(
            format!("Month close day must be between 1 and {} (got {})", MAX_CLOSE_DAY, day),
        )),
        MonthCloseRule::LastBusinessDay(offset) if offset > MAX_BUSINESS_DAY_OFFSET => {
            Err(EngineError::Validation(format!(
                "Last-business-day offset must be at most {} (got {})",
                MAX_BUSINESS_DAY_OFFSET, offset
            )))
        }
        _ => Ok(()),
    }
}

/// Actual close date of `reference`'s month under `rule`.
///
/// `Day` is not clamped to the month length: a day beyond it rolls into the
/// next month. Values outside [`validate_close_rule`]'s bounds are pulled
/// back to the nearest bound.
pub fn close_date(rule: &MonthCloseRule, reference: NaiveDate) -> NaiveDate {
    if let Err(e) = validate_close_rule(rule) {
        warn!("{}, using the nearest supported value", e);
    }

    let month = FiscalMonth::of(reference);
    match *rule {
        MonthCloseRule::Day(day) => month.day_rolling(day.clamp(1, MAX_CLOSE_DAY)),
        MonthCloseRule::LastBusinessDay(offset) => {
            let offset = offset.min(MAX_BUSINESS_DAY_OFFSET);
            let mut date = month.last_day();
            let mut business_days_found = 0;
            loop {
                if is_business_day(date) {
                    business_days_found += 1;
                    if business_days_found > offset {
                        return date;
                    }
                }
                date -= Duration::days(1);
            }
        }
    }
}

fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Bucket of a credit charge: purchases after the close day belong to the
/// next month's invoice
pub fn card_fiscal_month(date: NaiveDate, card: &CreditCard) -> FiscalMonth {
    let month = FiscalMonth::of(date);
    if date.day() > card.invoice_close_day {
        month.next()
    } else {
        month
    }
}

/// Suggested fiscal month for a transaction
pub fn assign_fiscal_month(
    date: NaiveDate,
    payment_method: PaymentMethod,
    card: Option<&CreditCard>,
    rule: &MonthCloseRule,
) -> FiscalMonth {
    match (payment_method, card) {
        (PaymentMethod::Credit, Some(card)) => card_fiscal_month(date, card),
        _ => {
            let month = FiscalMonth::of(date);
            if date > close_date(rule, date) {
                month.next()
            } else {
                month
            }
        }
    }
}

/// Fiscal calendar bound to the configured global close rule
#[derive(Debug, Clone, PartialEq)]
pub struct FiscalCalendar {
    month_close_rule: MonthCloseRule,
}

impl FiscalCalendar {
    pub fn new(month_close_rule: MonthCloseRule) -> Self {
        Self { month_close_rule }
    }

    pub fn month_close_rule(&self) -> &MonthCloseRule {
        &self.month_close_rule
    }

    pub fn assign(
        &self,
        date: NaiveDate,
        payment_method: PaymentMethod,
        card: Option<&CreditCard>,
    ) -> FiscalMonth {
        assign_fiscal_month(date, payment_method, card, &self.month_close_rule)
    }

    /// Fiscal month for a record, resolving its card from `cards`
    pub fn assign_for(&self, transaction: &Transaction, cards: &[CreditCard]) -> EngineResult<FiscalMonth> {
        let card = match (transaction.payment_method, transaction.card_id.as_deref()) {
            (PaymentMethod::Credit, Some(card_id)) => Some(
                cards
                    .iter()
                    .find(|card| card.id == card_id)
                    .ok_or_else(|| EngineError::card_not_found(card_id))?,
            ),
            _ => None,
        };
        Ok(self.assign(transaction.date, transaction.payment_method, card))
    }
}

impl Default for FiscalCalendar {
    fn default() -> Self {
        Self::new(MonthCloseRule::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use shared::{SeriesLink, TransactionType};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn month(y: i32, m: u32) -> FiscalMonth {
        FiscalMonth::new(y, m).unwrap()
    }

    fn create_test_card(close_day: u32) -> CreditCard {
        CreditCard {
            id: "card-1".to_string(),
            name: "Test Card".to_string(),
            invoice_close_day: close_day,
            invoice_due_day: 20,
        }
    }

    #[test]
    fn test_fiscal_month_key() {
        assert_eq!(fiscal_month_key(date(2025, 1, 31)), "2025-01");
        assert_eq!(fiscal_month_key(date(2025, 12, 1)), "2025-12");
    }

    #[test]
    fn test_fiscal_month_key_from_str() {
        assert_eq!(fiscal_month_key_from_str("2025-06-13"), "2025-06");
        assert_eq!(fiscal_month_key_from_str("2025-06-13T09:00:00-04:00"), "2025-06");

        let current = fiscal_month_key(Local::now().date_naive());
        assert_eq!(fiscal_month_key_from_str("not a date"), current);
        assert_eq!(fiscal_month_key_from_str(""), current);
    }

    #[test]
    fn test_close_date_fixed_day() {
        let rule = MonthCloseRule::Day(25);
        assert_eq!(close_date(&rule, date(2025, 3, 2)), date(2025, 3, 25));

        // Not clamped: day 31 in April rolls into May
        let rule = MonthCloseRule::Day(31);
        assert_eq!(close_date(&rule, date(2025, 4, 10)), date(2025, 5, 1));
    }

    #[test]
    fn test_close_date_last_business_day() {
        // May 2025 ends on Saturday the 31st
        let rule = MonthCloseRule::LastBusinessDay(0);
        assert_eq!(close_date(&rule, date(2025, 5, 10)), date(2025, 5, 30));

        let rule = MonthCloseRule::LastBusinessDay(1);
        assert_eq!(close_date(&rule, date(2025, 5, 10)), date(2025, 5, 29));

        // August 2025 ends on Sunday the 31st; the 3rd-to-last business day is Wed 27th
        let rule = MonthCloseRule::LastBusinessDay(2);
        assert_eq!(close_date(&rule, date(2025, 8, 1)), date(2025, 8, 27));
    }

    #[test]
    fn test_close_date_bounds_out_of_range_rules() {
        assert!(validate_close_rule(&MonthCloseRule::Day(31)).is_ok());
        assert!(validate_close_rule(&MonthCloseRule::LastBusinessDay(20)).is_ok());
        assert!(matches!(
            validate_close_rule(&MonthCloseRule::Day(u32::MAX)),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_close_rule(&MonthCloseRule::Day(0)),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_close_rule(&MonthCloseRule::LastBusinessDay(u32::MAX)),
            Err(EngineError::Validation(_))
        ));

        // Pulled back to day 31 and offset 20 instead of overflowing
        assert_eq!(close_date(&MonthCloseRule::Day(u32::MAX), date(2025, 4, 10)), date(2025, 5, 1));
        assert_eq!(close_date(&MonthCloseRule::Day(0), date(2025, 4, 10)), date(2025, 4, 1));
        assert_eq!(
            close_date(&MonthCloseRule::LastBusinessDay(u32::MAX), date(2025, 5, 10)),
            close_date(&MonthCloseRule::LastBusinessDay(20), date(2025, 5, 10))
        );
        let calendar = FiscalCalendar::new(MonthCloseRule::Day(u32::MAX));
        assert_eq!(calendar.assign(date(2025, 4, 30), PaymentMethod::Cash, None), month(2025, 4));
    }

    #[test]
    fn test_assign_with_day_rule() {
        let rule = MonthCloseRule::Day(25);
        assert_eq!(
            assign_fiscal_month(date(2025, 3, 26), PaymentMethod::Cash, None, &rule),
            month(2025, 4)
        );
        assert_eq!(
            assign_fiscal_month(date(2025, 3, 24), PaymentMethod::Cash, None, &rule),
            month(2025, 3)
        );
        // The close day itself stays in the current month
        assert_eq!(
            assign_fiscal_month(date(2025, 3, 25), PaymentMethod::Debit, None, &rule),
            month(2025, 3)
        );
        // December rolls into the next year
        assert_eq!(
            assign_fiscal_month(date(2025, 12, 30), PaymentMethod::Cash, None, &rule),
            month(2026, 1)
        );
    }

    #[test]
    fn test_assign_with_card_close_day() {
        let card = create_test_card(10);
        let rule = MonthCloseRule::Day(25);
        assert_eq!(
            assign_fiscal_month(date(2025, 3, 15), PaymentMethod::Credit, Some(&card), &rule),
            month(2025, 4)
        );
        assert_eq!(
            assign_fiscal_month(date(2025, 3, 5), PaymentMethod::Credit, Some(&card), &rule),
            month(2025, 3)
        );
    }

    #[test]
    fn test_credit_without_card_uses_global_rule() {
        let rule = MonthCloseRule::Day(25);
        assert_eq!(
            assign_fiscal_month(date(2025, 3, 15), PaymentMethod::Credit, None, &rule),
            month(2025, 3)
        );
    }

    #[test]
    fn test_assignment_is_idempotent() {
        let calendar = FiscalCalendar::new(MonthCloseRule::LastBusinessDay(1));
        let card = create_test_card(28);
        for day in 1..=31 {
            let d = date(2025, 1, day);
            assert_eq!(
                calendar.assign(d, PaymentMethod::Cash, None),
                calendar.assign(d, PaymentMethod::Cash, None)
            );
            assert_eq!(
                calendar.assign(d, PaymentMethod::Credit, Some(&card)),
                calendar.assign(d, PaymentMethod::Credit, Some(&card))
            );
        }
    }

    #[test]
    fn test_assign_for_resolves_card() {
        let calendar = FiscalCalendar::default();
        let cards = vec![create_test_card(10)];
        let mut transaction = Transaction {
            id: Some("t1".to_string()),
            transaction_type: TransactionType::Expense,
            description: "Groceries".to_string(),
            value: Decimal::new(5000, 2),
            date: date(2025, 3, 15),
            fiscal_month: month(2025, 3),
            payment_method: PaymentMethod::Credit,
            category_id: Some("food".to_string()),
            card_id: Some("card-1".to_string()),
            invoice_id: None,
            series: SeriesLink::Plain,
            created_at: None,
        };
        assert_eq!(calendar.assign_for(&transaction, &cards).unwrap(), month(2025, 4));

        transaction.card_id = Some("missing".to_string());
        let result = calendar.assign_for(&transaction, &cards);
        assert_eq!(result, Err(EngineError::card_not_found("missing")));
    }
}
