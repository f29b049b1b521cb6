//! Invoice aggregation for credit-card charges.
//!
//! Invoices are keyed by `(card_id, fiscal month)`. The aggregator is seeded
//! from the caller's snapshot, collects charges during batch construction and
//! hands back the next state of every invoice it touched.

use chrono::NaiveDate;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use shared::{CreditCard, FiscalMonth, Invoice, InvoiceStatus, PaymentMethod, Transaction};
use std::collections::{BTreeSet, HashMap};

use crate::domain::fiscal_calendar::card_fiscal_month;
use crate::errors::{EngineError, EngineResult};

type InvoiceKey = (String, FiscalMonth);

/// Close date of a card's invoice for `month`, clamped to the month end
pub fn invoice_close_date(card: &CreditCard, month: FiscalMonth) -> NaiveDate {
    month.day_clamped(card.invoice_close_day)
}

/// Due date of a card's invoice for `month`.
///
/// A due day after the close day falls in the same month; otherwise the
/// invoice is paid in the following month.
pub fn invoice_due_date(card: &CreditCard, month: FiscalMonth) -> NaiveDate {
    if card.invoice_due_day > card.invoice_close_day {
        month.day_clamped(card.invoice_due_day)
    } else {
        month.next().day_clamped(card.invoice_due_day)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceAggregator {
    invoices: HashMap<InvoiceKey, Invoice>,
    touched: BTreeSet<InvoiceKey>,
}

impl InvoiceAggregator {
    /// Seed the aggregator with the caller's current invoices
    pub fn new(existing: &[Invoice]) -> Self {
        let mut invoices = HashMap::new();
        for invoice in existing {
            let key = (invoice.card_id.clone(), invoice.month);
            if invoices.insert(key, invoice.clone()).is_some() {
                warn!(
                    "Duplicate invoice for card {} in {}, keeping the last one ({})",
                    invoice.card_id, invoice.month, invoice.id
                );
            }
        }
        Self {
            invoices,
            touched: BTreeSet::new(),
        }
    }

    pub fn get(&self, card_id: &str, month: FiscalMonth) -> Option<&Invoice> {
        self.invoices.get(&(card_id.to_string(), month))
    }

    pub fn len(&self) -> usize {
        self.invoices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invoices.is_empty()
    }

    /// Add a charge to the card's invoice for the charge's fiscal month,
    /// creating the invoice on first use
    pub fn charge(&mut self, card: &CreditCard, date: NaiveDate, value: Decimal) -> EngineResult<Invoice> {
        if value < Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "Charge value cannot be negative (got {})",
                value
            )));
        }

        let month = card_fiscal_month(date, card);
        let key = (card.id.clone(), month);

        let invoice = match self.invoices.get_mut(&key) {
            Some(invoice) => {
                invoice.total += value;
                debug!("Added {} to invoice {} (total {})", value, invoice.id, invoice.total);
                invoice.clone()
            }
            None => {
                let invoice = Invoice {
                    id: Invoice::generate_id(&card.id, month),
                    card_id: card.id.clone(),
                    month,
                    total: value,
                    close_date: invoice_close_date(card, month),
                    due_date: invoice_due_date(card, month),
                    status: InvoiceStatus::Open,
                };
                info!(
                    "Created invoice {} for card {} (due {})",
                    invoice.id, card.name, invoice.due_date
                );
                self.invoices.insert(key.clone(), invoice.clone());
                invoice
            }
        };

        self.touched.insert(key);
        Ok(invoice)
    }

    /// Charge a credit record and link it to its invoice
    pub fn charge_transaction(
        &mut self,
        transaction: &mut Transaction,
        cards: &[CreditCard],
    ) -> EngineResult<Invoice> {
        if transaction.is_installment_master() {
            return Err(EngineError::Consistency(format!(
                "Installment summary '{}' cannot be charged to an invoice",
                transaction.description
            )));
        }

        if let Some(invoice_id) = &transaction.invoice_id {
            return Err(EngineError::Consistency(format!(
                "'{}' is already charged to invoice {}",
                transaction.description, invoice_id
            )));
        }

        let card_id = match (transaction.payment_method, transaction.card_id.as_deref()) {
            (PaymentMethod::Credit, Some(card_id)) => card_id,
            _ => {
                return Err(EngineError::Reference {
                    kind: "Credit card",
                    id: transaction.card_id.clone().unwrap_or_default(),
                })
            }
        };
        let card = cards
            .iter()
            .find(|card| card.id == card_id)
            .ok_or_else(|| EngineError::card_not_found(card_id))?;

        let invoice = self.charge(card, transaction.date, transaction.value)?;
        transaction.invoice_id = Some(invoice.id.clone());
        Ok(invoice)
    }

    /// Charge every record, or none of them.
    ///
    /// Both the aggregator and the records are left untouched when any
    /// charge fails.
    pub fn charge_all(&mut self, transactions: &mut [Transaction], cards: &[CreditCard]) -> EngineResult<()> {
        let mut staged = self.clone();
        let mut linked = transactions.to_vec();
        for transaction in linked.iter_mut() {
            staged.charge_transaction(transaction, cards)?;
        }

        *self = staged;
        transactions.clone_from_slice(&linked);
        Ok(())
    }

    /// Undo a previously charged record's contribution to its invoice.
    ///
    /// The invoice the record is linked to wins; the card's close day is
    /// only consulted for records without an `invoice_id`.
    pub fn reverse_transaction(&mut self, transaction: &Transaction, cards: &[CreditCard]) -> EngineResult<Invoice> {
        if let Some(invoice_id) = transaction.invoice_id.as_deref() {
            let key = self
                .key_for_invoice_id(invoice_id)
                .ok_or_else(|| EngineError::Consistency(format!("Invoice {} not found", invoice_id)))?;
            return self.reverse_key(key, transaction.value);
        }

        let card_id = transaction
            .card_id
            .as_deref()
            .ok_or_else(|| EngineError::Reference {
                kind: "Credit card",
                id: String::new(),
            })?;
        let card = cards
            .iter()
            .find(|card| card.id == card_id)
            .ok_or_else(|| EngineError::card_not_found(card_id))?;

        let month = card_fiscal_month(transaction.date, card);
        self.reverse(card_id, month, transaction.value)
    }

    /// Explicitly subtract `value` from an existing invoice
    pub fn reverse(&mut self, card_id: &str, month: FiscalMonth, value: Decimal) -> EngineResult<Invoice> {
        self.reverse_key((card_id.to_string(), month), value)
    }

    fn reverse_key(&mut self, key: InvoiceKey, value: Decimal) -> EngineResult<Invoice> {
        let invoice = self.invoices.get_mut(&key).ok_or_else(|| {
            EngineError::Consistency(format!("No invoice for card {} in {}", key.0, key.1))
        })?;

        let remaining = invoice.total - value;
        if remaining < Decimal::ZERO {
            return Err(EngineError::Consistency(format!(
                "Reversing {} would leave invoice {} negative (total {})",
                value, invoice.id, invoice.total
            )));
        }

        invoice.total = remaining;
        info!("Reversed {} from invoice {} (total {})", value, invoice.id, remaining);
        let invoice = invoice.clone();
        self.touched.insert(key);
        Ok(invoice)
    }

    fn key_for_invoice_id(&self, invoice_id: &str) -> Option<InvoiceKey> {
        self.invoices
            .iter()
            .find(|(_, invoice)| invoice.id == invoice_id)
            .map(|(key, _)| key.clone())
    }

    /// Next state of every invoice changed since seeding, ordered by card and month
    pub fn touched(&self) -> Vec<Invoice> {
        self.touched
            .iter()
            .filter_map(|key| self.invoices.get(key).cloned())
            .collect()
    }

    pub fn into_touched(mut self) -> Vec<Invoice> {
        self.touched
            .iter()
            .filter_map(|key| self.invoices.remove(key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{SeriesLink, TransactionType};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn month(y: i32, m: u32) -> FiscalMonth {
        FiscalMonth::new(y, m).unwrap()
    }

    fn create_test_card(close_day: u32, due_day: u32) -> CreditCard {
        CreditCard {
            id: "card-1".to_string(),
            name: "Visa".to_string(),
            invoice_close_day: close_day,
            invoice_due_day: due_day,
        }
    }

    fn create_test_transaction(date: NaiveDate, value: Decimal, method: PaymentMethod) -> Transaction {
        Transaction {
            id: Some(format!("tx-{}", date)),
            transaction_type: TransactionType::Expense,
            description: "Purchase".to_string(),
            value,
            date,
            fiscal_month: FiscalMonth::of(date),
            payment_method: method,
            category_id: None,
            card_id: match method {
                PaymentMethod::Credit => Some("card-1".to_string()),
                _ => None,
            },
            invoice_id: None,
            series: SeriesLink::Plain,
            created_at: None,
        }
    }

    #[test]
    fn test_first_charge_creates_invoice() {
        let card = create_test_card(10, 20);
        let mut aggregator = InvoiceAggregator::new(&[]);

        let invoice = aggregator.charge(&card, date(2025, 3, 5), Decimal::new(5000, 2)).unwrap();
        assert_eq!(invoice.id, "invoice::card-1::2025-03");
        assert_eq!(invoice.total, Decimal::new(5000, 2));
        assert_eq!(invoice.status, InvoiceStatus::Open);
        assert_eq!(invoice.close_date, date(2025, 3, 10));
        assert_eq!(invoice.due_date, date(2025, 3, 20));
    }

    #[test]
    fn test_charges_accumulate() {
        let card = create_test_card(10, 20);
        let mut aggregator = InvoiceAggregator::new(&[]);
        aggregator.charge(&card, date(2025, 3, 11), Decimal::new(5000, 2)).unwrap();
        let invoice = aggregator.charge(&card, date(2025, 4, 2), Decimal::new(3000, 2)).unwrap();

        // Both land in April: the first after the March close, the second before April's
        assert_eq!(invoice.month, month(2025, 4));
        assert_eq!(invoice.total, Decimal::new(8000, 2));
        assert_eq!(aggregator.len(), 1);
        assert_eq!(aggregator.touched().len(), 1);
    }

    #[test]
    fn test_seeded_invoice_is_extended() {
        let card = create_test_card(10, 20);
        let existing = Invoice {
            id: Invoice::generate_id("card-1", month(2025, 3)),
            card_id: "card-1".to_string(),
            month: month(2025, 3),
            total: Decimal::new(10000, 2),
            close_date: date(2025, 3, 10),
            due_date: date(2025, 3, 20),
            status: InvoiceStatus::Open,
        };
        let mut aggregator = InvoiceAggregator::new(&[existing]);
        assert!(aggregator.touched().is_empty());

        aggregator.charge(&card, date(2025, 3, 1), Decimal::new(2550, 2)).unwrap();
        let touched = aggregator.into_touched();
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].total, Decimal::new(12550, 2));
    }

    #[test]
    fn test_due_date_before_close_day_is_next_month() {
        let card = create_test_card(25, 5);
        assert_eq!(invoice_due_date(&card, month(2025, 12)), date(2026, 1, 5));
        assert_eq!(invoice_close_date(&card, month(2025, 12)), date(2025, 12, 25));

        let card = create_test_card(31, 31);
        assert_eq!(invoice_close_date(&card, month(2025, 2)), date(2025, 2, 28));
        assert_eq!(invoice_due_date(&card, month(2025, 2)), date(2025, 3, 31));
    }

    #[test]
    fn test_negative_charge_rejected() {
        let card = create_test_card(10, 20);
        let mut aggregator = InvoiceAggregator::default();
        let result = aggregator.charge(&card, date(2025, 3, 1), Decimal::new(-100, 2));
        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_charge_transaction_links_invoice() {
        let cards = vec![create_test_card(10, 20)];
        let mut aggregator = InvoiceAggregator::default();
        let mut transaction = create_test_transaction(date(2025, 3, 15), Decimal::new(4200, 2), PaymentMethod::Credit);

        let invoice = aggregator.charge_transaction(&mut transaction, &cards).unwrap();
        assert_eq!(transaction.invoice_id.as_deref(), Some("invoice::card-1::2025-04"));
        assert_eq!(invoice.month, month(2025, 4));
    }

    #[test]
    fn test_charge_transaction_rejects_non_credit_and_masters() {
        let cards = vec![create_test_card(10, 20)];
        let mut aggregator = InvoiceAggregator::default();

        let mut cash = create_test_transaction(date(2025, 3, 15), Decimal::new(4200, 2), PaymentMethod::Cash);
        let result = aggregator.charge_transaction(&mut cash, &cards);
        assert!(matches!(result, Err(EngineError::Reference { .. })));

        let mut unknown_card = create_test_transaction(date(2025, 3, 15), Decimal::new(4200, 2), PaymentMethod::Credit);
        unknown_card.card_id = Some("card-x".to_string());
        let result = aggregator.charge_transaction(&mut unknown_card, &cards);
        assert_eq!(result, Err(EngineError::card_not_found("card-x")));

        let mut master = create_test_transaction(date(2025, 3, 15), Decimal::ZERO, PaymentMethod::Credit);
        master.series = SeriesLink::InstallmentMaster(shared::InstallmentSummary {
            installment_id: "inst::1".to_string(),
            installment_total: 3,
            total_value: Decimal::new(3000, 2),
            per_installment: Decimal::new(1000, 2),
            original_purchase_date: date(2025, 3, 15),
        });
        let result = aggregator.charge_transaction(&mut master, &cards);
        assert!(matches!(result, Err(EngineError::Consistency(_))));
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_charge_all_is_atomic() {
        let cards = vec![create_test_card(10, 20)];
        let mut aggregator = InvoiceAggregator::default();
        let mut transactions = vec![
            create_test_transaction(date(2025, 3, 1), Decimal::new(1000, 2), PaymentMethod::Credit),
            create_test_transaction(date(2025, 3, 2), Decimal::new(1000, 2), PaymentMethod::Debit),
        ];

        assert!(aggregator.charge_all(&mut transactions, &cards).is_err());
        assert!(aggregator.is_empty());
        assert!(transactions.iter().all(|t| t.invoice_id.is_none()));

        transactions[1].payment_method = PaymentMethod::Credit;
        transactions[1].card_id = Some("card-1".to_string());
        aggregator.charge_all(&mut transactions, &cards).unwrap();
        assert_eq!(aggregator.get("card-1", month(2025, 3)).unwrap().total, Decimal::new(2000, 2));
        assert!(transactions.iter().all(|t| t.invoice_id.is_some()));
    }

    #[test]
    fn test_charge_transaction_rejects_already_linked_record() {
        let mut cards = vec![create_test_card(10, 20)];
        let mut aggregator = InvoiceAggregator::default();
        let mut transaction = create_test_transaction(date(2025, 3, 5), Decimal::new(5000, 2), PaymentMethod::Credit);
        aggregator.charge_transaction(&mut transaction, &cards).unwrap();

        let result = aggregator.charge_transaction(&mut transaction, &cards);
        assert!(matches!(result, Err(EngineError::Consistency(_))));
        assert_eq!(aggregator.get("card-1", month(2025, 3)).unwrap().total, Decimal::new(5000, 2));

        // Moving to another card does not re-link the record either
        cards.push(CreditCard {
            id: "card-2".to_string(),
            ..create_test_card(3, 15)
        });
        transaction.card_id = Some("card-2".to_string());
        let result = aggregator.charge_transaction(&mut transaction, &cards);
        assert!(matches!(result, Err(EngineError::Consistency(_))));
        assert_eq!(transaction.invoice_id.as_deref(), Some("invoice::card-1::2025-03"));
        assert_eq!(aggregator.len(), 1);
    }

    #[test]
    fn test_reverse_transaction_follows_invoice_link() {
        let mut aggregator = InvoiceAggregator::default();
        let mut transaction = create_test_transaction(date(2025, 3, 5), Decimal::new(5000, 2), PaymentMethod::Credit);
        aggregator
            .charge_transaction(&mut transaction, &[create_test_card(10, 20)])
            .unwrap();

        // The close day moved after the charge; the date rule alone would pick April
        let edited_cards = vec![create_test_card(3, 20)];
        let invoice = aggregator.reverse_transaction(&transaction, &edited_cards).unwrap();
        assert_eq!(invoice.id, "invoice::card-1::2025-03");
        assert_eq!(invoice.total, Decimal::ZERO);

        let mut dangling = transaction.clone();
        dangling.invoice_id = Some("invoice::card-1::2020-01".to_string());
        let result = aggregator.reverse_transaction(&dangling, &edited_cards);
        assert!(matches!(result, Err(EngineError::Consistency(_))));
    }

    #[test]
    fn test_reverse_transaction_without_link_uses_close_day() {
        let cards = vec![create_test_card(10, 20)];
        let mut aggregator = InvoiceAggregator::default();
        aggregator.charge(&cards[0], date(2025, 3, 15), Decimal::new(5000, 2)).unwrap();

        let unlinked = create_test_transaction(date(2025, 3, 15), Decimal::new(2000, 2), PaymentMethod::Credit);
        let invoice = aggregator.reverse_transaction(&unlinked, &cards).unwrap();
        assert_eq!(invoice.month, month(2025, 4));
        assert_eq!(invoice.total, Decimal::new(3000, 2));
    }

    #[test]
    fn test_reverse() {
        let card = create_test_card(10, 20);
        let mut aggregator = InvoiceAggregator::default();
        aggregator.charge(&card, date(2025, 3, 1), Decimal::new(5000, 2)).unwrap();

        let invoice = aggregator.reverse("card-1", month(2025, 3), Decimal::new(2000, 2)).unwrap();
        assert_eq!(invoice.total, Decimal::new(3000, 2));

        let result = aggregator.reverse("card-1", month(2025, 3), Decimal::new(5000, 2));
        assert!(matches!(result, Err(EngineError::Consistency(_))));
        let result = aggregator.reverse("card-1", month(2025, 9), Decimal::ONE);
        assert!(matches!(result, Err(EngineError::Consistency(_))));
        assert_eq!(aggregator.get("card-1", month(2025, 3)).unwrap().total, Decimal::new(3000, 2));
    }
}
