use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Atomic ledger entry.
///
/// The engine never talks to storage: it receives these records from the
/// caller's snapshot and hands back the records the caller should write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Assigned by the persistence layer on creation; `None` before first save
    pub id: Option<String>,
    /// Whether this entry adds money to or removes money from the ledger
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub description: String,
    /// Non-negative amount with cent precision
    pub value: Decimal,
    /// Date the economic event occurred (purchase date, receipt date)
    pub date: NaiveDate,
    /// Bucket this entry counts toward for monthly totals, serialized as "YYYY-MM"
    pub fiscal_month: FiscalMonth,
    pub payment_method: PaymentMethod,
    pub category_id: Option<String>,
    /// Only set when `payment_method` is `Credit`
    pub card_id: Option<String>,
    /// Set once the charge has been rolled into a card invoice
    #[serde(default)]
    pub invoice_id: Option<String>,
    /// Recurrence / installment membership
    #[serde(default)]
    pub series: SeriesLink,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Direction of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Money spent
    Expense,
    /// Money received
    Revenue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Debit,
    Credit,
}

/// Series membership of a transaction.
///
/// A record is exactly one of plain, a recurrence instance, an installment, or
/// the zero-value installment summary; the variant carries the fields that
/// only make sense for that shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeriesLink {
    #[default]
    Plain,
    Recurring(RecurrenceLink),
    Installment(InstallmentLink),
    InstallmentMaster(InstallmentSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceLink {
    pub recurrence_id: String,
    /// 0-based position in the series
    pub recurrence_index: u32,
    pub rule: RecurrenceRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentLink {
    pub installment_id: String,
    /// 1-based position in the series
    pub installment_index: u32,
    pub installment_total: u32,
    pub installment_value: Decimal,
    pub total_value: Decimal,
    pub original_purchase_date: NaiveDate,
}

/// Informational record describing a whole installment purchase. Always
/// carries a zero `value` and is never summed into balances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentSummary {
    pub installment_id: String,
    pub installment_total: u32,
    pub total_value: Decimal,
    pub per_installment: Decimal,
    pub original_purchase_date: NaiveDate,
}

/// How a recurring transaction repeats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    #[serde(rename = "type")]
    pub rule_type: RecurrenceType,
    pub interval: u32,
    /// Exactly one of `end_date` / `count` must be set
    pub end_date: Option<NaiveDate>,
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceType {
    Monthly,
    Yearly,
    /// Every `interval` months
    Custom,
    /// Any type this engine does not know about; rejected by rule validation
    #[serde(other)]
    Unsupported,
}

/// Breadth of a series edit or delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditScope {
    ThisOnly,
    ThisAndFuture,
    All,
}

/// Global (non-card) rule deciding when a month closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MonthCloseRule {
    /// Fixed day of month
    Day(u32),
    /// Business days counted back from the month end (0 = last business day)
    LastBusinessDay(u32),
}

impl Default for MonthCloseRule {
    fn default() -> Self {
        MonthCloseRule::Day(25)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditCard {
    pub id: String,
    pub name: String,
    /// Purchases after this day roll into the next invoice (1-31)
    pub invoice_close_day: u32,
    /// Day the invoice is paid (1-31)
    pub invoice_due_day: u32,
}

/// Monthly aggregate of credit-card charges for one card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub card_id: String,
    pub month: FiscalMonth,
    pub total: Decimal,
    pub close_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    #[serde(rename = "Aberta")]
    Open,
    #[serde(rename = "Fechada")]
    Closed,
    #[serde(rename = "Paga")]
    Paid,
}

/// Accounting view used to compute running balances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// Entries count toward their assigned fiscal month; card charges only via invoices
    Fiscal,
    /// Entries count on their literal date; card charges only via invoices
    Cashflow,
}

/// Aggregates for a single calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBalance {
    pub date: NaiveDate,
    pub revenues: Decimal,
    /// Includes any invoice due that day
    pub expenses: Decimal,
    pub running_balance: Decimal,
}

/// Daily aggregates for one month under one view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthBalances {
    pub month: FiscalMonth,
    pub view_mode: ViewMode,
    /// Balance carried into the first day of the month
    pub opening_balance: Decimal,
    pub days: Vec<DailyBalance>,
}

/// Type of calendar day for explicit rendering logic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CalendarDayType {
    /// Empty padding day before the start of the month
    PaddingBefore,
    /// Actual day within the month
    MonthDay,
}

/// Represents a calendar month with its daily aggregates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarMonth {
    pub month: FiscalMonth,
    pub month_name: String,
    pub view_mode: ViewMode,
    pub opening_balance: Decimal,
    pub days: Vec<CalendarDay>,
    pub first_day_of_week: u32, // 0 = Monday, ..., 6 = Sunday
}

/// Represents a single cell in the calendar grid
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarDay {
    /// Day of month, 0 for padding cells
    pub day: u32,
    pub revenues: Decimal,
    pub expenses: Decimal,
    pub balance: Decimal,
    pub transactions: Vec<Transaction>,
    pub invoices_due: Vec<Invoice>,
    pub day_type: CalendarDayType,
}

/// Accounting-period bucket, formatted as "YYYY-MM"
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FiscalMonth {
    year: i32,
    month: u32,
}

impl FiscalMonth {
    /// Returns `None` when `month` is outside 1-12 or the year is out of range
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    /// The calendar month containing `date`
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn next(&self) -> Self {
        self.plus_months(1)
    }

    pub fn previous(&self) -> Self {
        self.plus_months(-1)
    }

    /// Moves `delta` months forward (or backward when negative)
    pub fn plus_months(&self, delta: i32) -> Self {
        let zero_based = self.year * 12 + (self.month as i32 - 1) + delta;
        Self {
            year: zero_based.div_euclid(12),
            month: zero_based.rem_euclid(12) as u32 + 1,
        }
    }

    pub fn days_in_month(&self) -> u32 {
        match self.month {
            2 => {
                if is_leap_year(self.year) {
                    29
                } else {
                    28
                }
            }
            4 | 6 | 9 | 11 => 30,
            _ => 31,
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        self.day_clamped(1)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.day_clamped(self.days_in_month())
    }

    /// Date in this month at `day`, clamped into 1..=days_in_month
    pub fn day_clamped(&self, day: u32) -> NaiveDate {
        let day = day.clamp(1, self.days_in_month());
        NaiveDate::from_ymd_opt(self.year, self.month, day)
            .expect("year and month are validated on construction")
    }

    /// Date `day - 1` days after the first of this month, so out-of-range
    /// days roll into the neighbouring month instead of clamping
    pub fn day_rolling(&self, day: u32) -> NaiveDate {
        self.first_day() + Duration::days(day as i64 - 1)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// Iterates every date of the month in order
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let first = self.first_day();
        (0..self.days_in_month() as i64).map(move |offset| first + Duration::days(offset))
    }
}

fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

impl fmt::Display for FiscalMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for FiscalMonth {
    type Err = FiscalMonthParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| FiscalMonthParseError(s.to_string()))?;
        if month.len() != 2 {
            return Err(FiscalMonthParseError(s.to_string()));
        }
        let year = year
            .parse::<i32>()
            .map_err(|_| FiscalMonthParseError(s.to_string()))?;
        let month = month
            .parse::<u32>()
            .map_err(|_| FiscalMonthParseError(s.to_string()))?;
        FiscalMonth::new(year, month).ok_or_else(|| FiscalMonthParseError(s.to_string()))
    }
}

impl TryFrom<String> for FiscalMonth {
    type Error = FiscalMonthParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FiscalMonth> for String {
    fn from(month: FiscalMonth) -> Self {
        month.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FiscalMonthParseError(pub String);

impl fmt::Display for FiscalMonthParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid fiscal month key (expected YYYY-MM): {}", self.0)
    }
}

impl std::error::Error for FiscalMonthParseError {}

impl Transaction {
    /// Revenue counts positive, expense negative
    pub fn signed_value(&self) -> Decimal {
        match self.transaction_type {
            TransactionType::Revenue => self.value,
            TransactionType::Expense => -self.value,
        }
    }

    pub fn is_installment_master(&self) -> bool {
        matches!(self.series, SeriesLink::InstallmentMaster(_))
    }

    pub fn recurrence(&self) -> Option<&RecurrenceLink> {
        match &self.series {
            SeriesLink::Recurring(link) => Some(link),
            _ => None,
        }
    }

    pub fn installment(&self) -> Option<&InstallmentLink> {
        match &self.series {
            SeriesLink::Installment(link) => Some(link),
            _ => None,
        }
    }

    /// Id shared by every member of this record's installment series,
    /// including the summary record
    pub fn installment_id(&self) -> Option<&str> {
        match &self.series {
            SeriesLink::Installment(link) => Some(&link.installment_id),
            SeriesLink::InstallmentMaster(summary) => Some(&summary.installment_id),
            _ => None,
        }
    }
}

impl RecurrenceLink {
    /// Generate a fresh series id.
    /// Format: rec::<uuid>
    pub fn generate_id() -> String {
        format!("rec::{}", Uuid::new_v4().simple())
    }
}

impl InstallmentLink {
    /// Generate a fresh installment series id.
    /// Format: inst::<uuid>
    pub fn generate_id() -> String {
        format!("inst::{}", Uuid::new_v4().simple())
    }
}

impl Invoice {
    /// Deterministic invoice id for a (card, fiscal month) bucket.
    /// Format: invoice::<card_id>::<YYYY-MM>
    pub fn generate_id(card_id: &str, month: FiscalMonth) -> String {
        format!("invoice::{}::{}", card_id, month)
    }
}
