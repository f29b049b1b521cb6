//! Calendar month view.
//!
//! Lays a month's balances out as a Monday-first grid: padding cells before
//! the 1st, then one cell per day carrying the entries and invoices that
//! moved the balance that day.

use chrono::Datelike;
use log::{debug, info};
use rust_decimal::Decimal;
use shared::{
    CalendarDay, CalendarDayType, CalendarMonth, FiscalMonth, Invoice, Transaction, ViewMode,
};
use std::collections::HashMap;

use crate::domain::balance_service::BalanceService;

/// Calendar service that builds month grids from a ledger snapshot
#[derive(Debug, Clone, Default)]
pub struct CalendarService {
    balance_service: BalanceService,
}

impl CalendarService {
    pub fn new() -> Self {
        Self {
            balance_service: BalanceService::new(),
        }
    }

    /// Generate the calendar grid for `month` under `view`
    pub fn generate_calendar_month(
        &self,
        month: FiscalMonth,
        transactions: &[Transaction],
        invoices: &[Invoice],
        view: ViewMode,
    ) -> CalendarMonth {
        let balances = self.balance_service.month_balances(transactions, invoices, view, month);
        let first_day = self.first_day_of_month(month);

        let mut transactions_by_day: HashMap<u32, Vec<Transaction>> = HashMap::new();
        for transaction in transactions
            .iter()
            .filter(|t| month.contains(t.date) && self.balance_service.counts_directly(t, view, month))
        {
            transactions_by_day
                .entry(transaction.date.day())
                .or_default()
                .push(transaction.clone());
        }

        let mut invoices_by_day: HashMap<u32, Vec<Invoice>> = HashMap::new();
        for invoice in invoices.iter().filter(|invoice| month.contains(invoice.due_date)) {
            invoices_by_day
                .entry(invoice.due_date.day())
                .or_default()
                .push(invoice.clone());
        }

        let mut days = Vec::with_capacity(first_day as usize + balances.days.len());
        for _ in 0..first_day {
            days.push(CalendarDay {
                day: 0,
                revenues: Decimal::ZERO,
                expenses: Decimal::ZERO,
                balance: Decimal::ZERO,
                transactions: Vec::new(),
                invoices_due: Vec::new(),
                day_type: CalendarDayType::PaddingBefore,
            });
        }

        for entry in &balances.days {
            let day = entry.date.day();
            days.push(CalendarDay {
                day,
                revenues: entry.revenues,
                expenses: entry.expenses,
                balance: entry.running_balance,
                transactions: transactions_by_day.remove(&day).unwrap_or_default(),
                invoices_due: invoices_by_day.remove(&day).unwrap_or_default(),
                day_type: CalendarDayType::MonthDay,
            });
        }

        debug!("Calendar {} has {} padding cell(s)", month, first_day);
        info!("Generated {:?} calendar for {} with {} cells", view, month, days.len());

        CalendarMonth {
            month,
            month_name: self.month_name(month.month()).to_string(),
            view_mode: view,
            opening_balance: balances.opening_balance,
            days,
            first_day_of_week: first_day,
        }
    }

    /// Weekday of the 1st (0 = Monday, ..., 6 = Sunday)
    pub fn first_day_of_month(&self, month: FiscalMonth) -> u32 {
        month.first_day().weekday().num_days_from_monday()
    }

    /// Get the human-readable name for a month number
    pub fn month_name(&self, month: u32) -> &'static str {
        match month {
            1 => "January",
            2 => "February",
            3 => "March",
            4 => "April",
            5 => "May",
            6 => "June",
            7 => "July",
            8 => "August",
            9 => "September",
            10 => "October",
            11 => "November",
            12 => "December",
            _ => "Invalid Month",
        }
    }

    pub fn previous_month(&self, month: FiscalMonth) -> FiscalMonth {
        month.previous()
    }

    pub fn next_month(&self, month: FiscalMonth) -> FiscalMonth {
        month.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use shared::{InvoiceStatus, PaymentMethod, SeriesLink, TransactionType};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn create_test_transaction(date: NaiveDate, cents: i64, payment_method: PaymentMethod) -> Transaction {
        Transaction {
            id: Some(format!("tx-{}", date)),
            transaction_type: TransactionType::Expense,
            description: "Coffee".to_string(),
            value: Decimal::new(cents, 2),
            date,
            fiscal_month: FiscalMonth::of(date),
            payment_method,
            category_id: None,
            card_id: None,
            invoice_id: None,
            series: SeriesLink::Plain,
            created_at: None,
        }
    }

    #[test]
    fn test_month_name() {
        let service = CalendarService::new();
        assert_eq!(service.month_name(1), "January");
        assert_eq!(service.month_name(12), "December");
        assert_eq!(service.month_name(13), "Invalid Month");
    }

    #[test]
    fn test_navigation() {
        let service = CalendarService::new();
        let january = FiscalMonth::new(2025, 1).unwrap();
        assert_eq!(service.previous_month(january), FiscalMonth::new(2024, 12).unwrap());
        assert_eq!(service.next_month(january), FiscalMonth::new(2025, 2).unwrap());
    }

    #[test]
    fn test_first_day_of_month_is_monday_based() {
        let service = CalendarService::new();
        // September 2025 starts on a Monday, June 2025 on a Sunday
        assert_eq!(service.first_day_of_month(FiscalMonth::new(2025, 9).unwrap()), 0);
        assert_eq!(service.first_day_of_month(FiscalMonth::new(2025, 6).unwrap()), 6);
    }

    #[test]
    fn test_generate_calendar_month() {
        let service = CalendarService::new();
        let june = FiscalMonth::new(2025, 6).unwrap();
        let transactions = vec![
            create_test_transaction(date(2025, 6, 3), 450, PaymentMethod::Cash),
            create_test_transaction(date(2025, 6, 4), 9900, PaymentMethod::Credit),
        ];
        let invoices = vec![Invoice {
            id: Invoice::generate_id("card-1", june),
            card_id: "card-1".to_string(),
            month: june,
            total: Decimal::new(9900, 2),
            close_date: date(2025, 6, 10),
            due_date: date(2025, 6, 20),
            status: InvoiceStatus::Open,
        }];

        let calendar = service.generate_calendar_month(june, &transactions, &invoices, ViewMode::Cashflow);
        assert_eq!(calendar.month_name, "June");
        assert_eq!(calendar.first_day_of_week, 6);
        assert_eq!(calendar.days.len(), 6 + 30);
        assert!(calendar.days[..6]
            .iter()
            .all(|d| d.day_type == CalendarDayType::PaddingBefore && d.day == 0));

        let third = &calendar.days[6 + 2];
        assert_eq!(third.day, 3);
        assert_eq!(third.transactions.len(), 1);
        assert_eq!(third.balance, Decimal::new(-450, 2));

        // Credit purchases only appear through their invoice
        let fourth = &calendar.days[6 + 3];
        assert!(fourth.transactions.is_empty());

        let twentieth = &calendar.days[6 + 19];
        assert_eq!(twentieth.invoices_due.len(), 1);
        assert_eq!(twentieth.balance, Decimal::new(-450 - 9900, 2));
    }
}
