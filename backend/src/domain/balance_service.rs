//! Running balances under the fiscal and cashflow views.
//!
//! Card charges never move the ledger twice: once rolled into an invoice,
//! only the invoice total counts, as a single expense on its due date.
//! Installment summary records are informational and are always skipped.

use chrono::NaiveDate;
use log::debug;
use rust_decimal::Decimal;
use shared::{
    DailyBalance, FiscalMonth, Invoice, MonthBalances, PaymentMethod, Transaction, TransactionType,
    ViewMode,
};
use std::collections::HashMap;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct DayTotals {
    revenues: Decimal,
    expenses: Decimal,
}

impl DayTotals {
    fn add_transaction(&mut self, transaction: &Transaction) {
        match transaction.transaction_type {
            TransactionType::Revenue => self.revenues += transaction.value,
            TransactionType::Expense => self.expenses += transaction.value,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceService;

impl BalanceService {
    pub fn new() -> Self {
        Self
    }

    /// Whether `transaction` moves the ledger directly when viewing `month`.
    /// Its date still has to fall on the day being computed.
    pub fn counts_directly(&self, transaction: &Transaction, view: ViewMode, month: FiscalMonth) -> bool {
        if transaction.is_installment_master() {
            return false;
        }
        match view {
            ViewMode::Fiscal => transaction.invoice_id.is_none() && transaction.fiscal_month == month,
            ViewMode::Cashflow => transaction.payment_method != PaymentMethod::Credit,
        }
    }

    /// Balance carried into the first day of `month`
    pub fn opening_balance(
        &self,
        transactions: &[Transaction],
        invoices: &[Invoice],
        view: ViewMode,
        month: FiscalMonth,
    ) -> Decimal {
        let first_day = month.first_day();
        let carried: Decimal = transactions
            .iter()
            .filter(|t| t.date < first_day && self.counts_directly(t, view, month))
            .map(|t| t.signed_value())
            .sum();

        match view {
            ViewMode::Fiscal => carried,
            ViewMode::Cashflow => {
                let invoices_due: Decimal = invoices
                    .iter()
                    .filter(|invoice| invoice.due_date < first_day)
                    .map(|invoice| invoice.total)
                    .sum();
                carried - invoices_due
            }
        }
    }

    /// Daily revenues, expenses and running balance for every day of `month`
    pub fn month_balances(
        &self,
        transactions: &[Transaction],
        invoices: &[Invoice],
        view: ViewMode,
        month: FiscalMonth,
    ) -> MonthBalances {
        let opening_balance = self.opening_balance(transactions, invoices, view, month);
        let totals = self.daily_totals(transactions, invoices, view, month);

        let mut running_balance = opening_balance;
        let days = month
            .dates()
            .map(|date| {
                let day = totals.get(&date).copied().unwrap_or_default();
                running_balance += day.revenues - day.expenses;
                DailyBalance {
                    date,
                    revenues: day.revenues,
                    expenses: day.expenses,
                    running_balance,
                }
            })
            .collect::<Vec<_>>();

        debug!(
            "{:?} balances for {}: opening {}, closing {}",
            view, month, opening_balance, running_balance
        );
        MonthBalances {
            month,
            view_mode: view,
            opening_balance,
            days,
        }
    }

    /// Entry for a single day; `None` when `date` is outside `month`
    pub fn day_balance(
        &self,
        transactions: &[Transaction],
        invoices: &[Invoice],
        view: ViewMode,
        month: FiscalMonth,
        date: NaiveDate,
    ) -> Option<DailyBalance> {
        if !month.contains(date) {
            return None;
        }
        self.month_balances(transactions, invoices, view, month)
            .days
            .into_iter()
            .find(|day| day.date == date)
    }

    fn daily_totals(
        &self,
        transactions: &[Transaction],
        invoices: &[Invoice],
        view: ViewMode,
        month: FiscalMonth,
    ) -> HashMap<NaiveDate, DayTotals> {
        let mut totals: HashMap<NaiveDate, DayTotals> = HashMap::new();

        for transaction in transactions
            .iter()
            .filter(|t| month.contains(t.date) && self.counts_directly(t, view, month))
        {
            totals.entry(transaction.date).or_default().add_transaction(transaction);
        }

        for invoice in invoices.iter().filter(|invoice| month.contains(invoice.due_date)) {
            totals.entry(invoice.due_date).or_default().expenses += invoice.total;
        }

        totals
    }
}
