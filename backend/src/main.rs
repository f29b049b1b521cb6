use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ledger_calendar_backend::domain::{CalendarService, FiscalCalendar, InvoiceAggregator};
use ledger_calendar_backend::EngineConfig;
use log::{info, warn};
use serde::Deserialize;
use shared::{CreditCard, FiscalMonth, Invoice, PaymentMethod, Transaction, ViewMode};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum View {
    Fiscal,
    Cashflow,
}

impl From<View> for ViewMode {
    fn from(view: View) -> Self {
        match view {
            View::Fiscal => ViewMode::Fiscal,
            View::Cashflow => ViewMode::Cashflow,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ledger-report", version, about = "Print a month of the ledger calendar as JSON")]
struct Cli {
    /// JSON snapshot with `transactions`, `invoices` and `cards`
    snapshot: PathBuf,

    /// Month to report, as YYYY-MM
    month: FiscalMonth,

    #[arg(long, value_enum, default_value = "fiscal")]
    view: View,

    /// Engine configuration (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Roll credit entries without an invoice into their card's invoice first
    #[arg(long)]
    charge_pending: bool,

    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    transactions: Vec<Transaction>,
    #[serde(default)]
    invoices: Vec<Invoice>,
    #[serde(default)]
    cards: Vec<CreditCard>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_path(path)?,
        None => EngineConfig::default(),
    };

    let raw = fs::read_to_string(&cli.snapshot)
        .with_context(|| format!("Failed to read snapshot {:?}", cli.snapshot))?;
    let mut snapshot: Snapshot =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse snapshot {:?}", cli.snapshot))?;
    info!(
        "Loaded {} transaction(s), {} invoice(s), {} card(s)",
        snapshot.transactions.len(),
        snapshot.invoices.len(),
        snapshot.cards.len()
    );

    report_fiscal_month_drift(&snapshot, &FiscalCalendar::new(config.month_close_rule));

    if cli.charge_pending {
        charge_pending(&mut snapshot)?;
    }

    let calendar = CalendarService::new().generate_calendar_month(
        cli.month,
        &snapshot.transactions,
        &snapshot.invoices,
        cli.view.into(),
    );

    let output = if cli.pretty {
        serde_json::to_string_pretty(&calendar)?
    } else {
        serde_json::to_string(&calendar)?
    };
    println!("{}", output);
    Ok(())
}

/// Stored fiscal months win; this only flags entries whose stored month
/// differs from what the current rules would suggest
fn report_fiscal_month_drift(snapshot: &Snapshot, calendar: &FiscalCalendar) {
    for transaction in &snapshot.transactions {
        match calendar.assign_for(transaction, &snapshot.cards) {
            Ok(suggested) if suggested != transaction.fiscal_month => warn!(
                "'{}' on {} is stored in {} but the current rules suggest {}",
                transaction.description, transaction.date, transaction.fiscal_month, suggested
            ),
            Ok(_) => {}
            Err(e) => warn!("Cannot check fiscal month of '{}': {}", transaction.description, e),
        }
    }
}

fn is_pending_charge(transaction: &Transaction) -> bool {
    transaction.payment_method == PaymentMethod::Credit
        && transaction.invoice_id.is_none()
        && !transaction.is_installment_master()
}

fn charge_pending(snapshot: &mut Snapshot) -> Result<()> {
    let mut aggregator = InvoiceAggregator::new(&snapshot.invoices);
    let mut pending: Vec<Transaction> = snapshot
        .transactions
        .iter()
        .filter(|t| is_pending_charge(t))
        .cloned()
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    aggregator
        .charge_all(&mut pending, &snapshot.cards)
        .context("Failed to charge pending credit entries")?;
    info!("Charged {} pending credit entries", pending.len());

    let mut pending = pending.into_iter();
    for transaction in snapshot.transactions.iter_mut().filter(|t| is_pending_charge(t)) {
        if let Some(charged) = pending.next() {
            *transaction = charged;
        }
    }

    for invoice in aggregator.into_touched() {
        match snapshot.invoices.iter_mut().find(|existing| existing.id == invoice.id) {
            Some(existing) => *existing = invoice,
            None => snapshot.invoices.push(invoice),
        }
    }
    Ok(())
}
