// 📊 Reporting - read-only views over the ledger
//
// Dashboard KPIs, cash-flow series, invoice tabs, date filters, custodian
// history and the financial brief. Nothing here mutates.

use crate::entities::{
    Custodian, Invoice, InvoiceStatus, InvoiceType, Transaction, TransactionType, ValidationStatus,
};
use crate::error::{checked_sum, LedgerError};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Upcoming payables shown in the brief
pub const BRIEF_UPCOMING_LIMIT: usize = 3;

// ============================================================================
// DATE RANGE & FILTERS
// ============================================================================

/// Inclusive on both ends; a missing bound is open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// None = all types
    pub kind: Option<TransactionType>,
    #[serde(default)]
    pub range: DateRange,
}

impl TransactionFilter {
    pub fn matches(&self, transaction: &Transaction) -> bool {
        self.kind.map_or(true, |k| transaction.transaction_type == k)
            && self.range.contains(transaction.date)
    }

    pub fn apply<'a>(&self, transactions: &'a [Transaction]) -> Vec<&'a Transaction> {
        transactions.iter().filter(|t| self.matches(t)).collect()
    }
}

// ============================================================================
// DASHBOARD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialSummary {
    pub total_cash: Decimal,
    pub custodian_count: usize,
    pub total_receivables: Decimal,
    pub receivable_count: usize,
    pub total_payables: Decimal,
    pub payable_count: usize,
}

impl FinancialSummary {
    /// Receivables and payables only count PENDING + VALIDATED invoices
    pub fn compute(custodians: &[Custodian], invoices: &[Invoice]) -> Result<Self, LedgerError> {
        let open = |kind: InvoiceType| -> Vec<&Invoice> {
            invoices
                .iter()
                .filter(|i| i.invoice_type == kind && i.is_settleable())
                .collect()
        };

        let receivables = open(InvoiceType::Receivable);
        let payables = open(InvoiceType::Payable);

        Ok(FinancialSummary {
            total_cash: checked_sum(custodians.iter().map(|c| c.balance), "total cash")?,
            custodian_count: custodians.len(),
            total_receivables: checked_sum(receivables.iter().map(|i| i.amount), "receivables")?,
            receivable_count: receivables.len(),
            total_payables: checked_sum(payables.iter().map(|i| i.amount), "payables")?,
            payable_count: payables.len(),
        })
    }

    /// Cash on hand plus what is owed to us minus what we owe
    pub fn net_position(&self) -> Result<Decimal, LedgerError> {
        self.total_cash
            .checked_add(self.total_receivables)
            .and_then(|v| v.checked_sub(self.total_payables))
            .ok_or(LedgerError::Overflow {
                context: "net position",
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlowPoint {
    pub date: NaiveDate,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
}

/// Signed validated movements, oldest first
pub fn cash_flow(transactions: &[Transaction]) -> Vec<CashFlowPoint> {
    let mut points: Vec<CashFlowPoint> = transactions
        .iter()
        .filter(|t| t.is_validated())
        .map(|t| CashFlowPoint {
            date: t.date,
            amount: t.signed_amount(),
            transaction_type: t.transaction_type,
        })
        .collect();

    // Stable: same-day points keep their relative order
    points.sort_by_key(|p| p.date);
    points
}

// ============================================================================
// INVOICE TABS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceTab {
    Drafts,
    ToProcess,
    History,
}

impl InvoiceTab {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceTab::Drafts => "DRAFTS",
            InvoiceTab::ToProcess => "TO_PROCESS",
            InvoiceTab::History => "HISTORY",
        }
    }

    pub fn includes(&self, invoice: &Invoice) -> bool {
        match self {
            InvoiceTab::Drafts => {
                invoice.status == InvoiceStatus::Pending
                    && invoice.validation_status == ValidationStatus::Draft
            }
            InvoiceTab::ToProcess => {
                invoice.status == InvoiceStatus::Pending
                    && invoice.validation_status == ValidationStatus::Validated
            }
            InvoiceTab::History => invoice.status == InvoiceStatus::Paid,
        }
    }
}

impl std::str::FromStr for InvoiceTab {
    type Err = crate::error::LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "DRAFTS" => Ok(InvoiceTab::Drafts),
            "TO_PROCESS" => Ok(InvoiceTab::ToProcess),
            "HISTORY" => Ok(InvoiceTab::History),
            _ => Err(crate::error::LedgerError::InvalidValue {
                field: "invoice tab",
                value: s.to_string(),
            }),
        }
    }
}

/// Invoices in a tab whose due date falls in the range
pub fn invoices_in_tab<'a>(
    invoices: &'a [Invoice],
    tab: InvoiceTab,
    range: DateRange,
) -> Vec<&'a Invoice> {
    invoices
        .iter()
        .filter(|i| tab.includes(i) && range.contains(i.due_date))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabCounts {
    pub drafts: usize,
    pub to_process: usize,
    pub history: usize,
}

pub fn tab_counts(invoices: &[Invoice]) -> TabCounts {
    let count = |tab: InvoiceTab| invoices.iter().filter(|i| tab.includes(i)).count();

    TabCounts {
        drafts: count(InvoiceTab::Drafts),
        to_process: count(InvoiceTab::ToProcess),
        history: count(InvoiceTab::History),
    }
}

// ============================================================================
// CUSTODIAN HISTORY
// ============================================================================

/// All of a custodian's transactions, newest first
pub fn custodian_history<'a>(transactions: &'a [Transaction], custodian_id: &str) -> Vec<&'a Transaction> {
    let mut history: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.custodian_id == custodian_id)
        .collect();
    history.sort_by(|a, b| b.date.cmp(&a.date));
    history
}

// ============================================================================
// FINANCIAL BRIEF
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustodianBalance {
    pub name: String,
    pub balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingPayment {
    pub entity_name: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
}

/// Liquidity snapshot for a financial advisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialBrief {
    pub summary: FinancialSummary,
    pub custodians: Vec<CustodianBalance>,
    pub upcoming_payables: Vec<UpcomingPayment>,
}

impl FinancialBrief {
    pub fn build(custodians: &[Custodian], invoices: &[Invoice]) -> Result<Self, LedgerError> {
        let mut payables: Vec<&Invoice> = invoices
            .iter()
            .filter(|i| i.invoice_type == InvoiceType::Payable && i.is_settleable())
            .collect();
        payables.sort_by_key(|i| i.due_date);

        Ok(FinancialBrief {
            summary: FinancialSummary::compute(custodians, invoices)?,
            custodians: custodians
                .iter()
                .map(|c| CustodianBalance {
                    name: c.name.clone(),
                    balance: c.balance,
                })
                .collect(),
            upcoming_payables: payables
                .into_iter()
                .take(BRIEF_UPCOMING_LIMIT)
                .map(|i| UpcomingPayment {
                    entity_name: i.entity_name.clone(),
                    amount: i.amount,
                    due_date: i.due_date,
                })
                .collect(),
        })
    }

    pub fn render(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();

        // Writing into a String cannot fail
        let _ = writeln!(out, "Current figures:");
        let _ = writeln!(
            out,
            "- Total cash held by custodians: ${:.2}",
            s.total_cash
        );
        let _ = writeln!(
            out,
            "- Total receivable: ${:.2} ({} invoices)",
            s.total_receivables, s.receivable_count
        );
        let _ = writeln!(
            out,
            "- Total payable: ${:.2} ({} invoices)",
            s.total_payables, s.payable_count
        );

        let _ = writeln!(out, "\nCustodians:");
        for c in &self.custodians {
            let _ = writeln!(out, "- {}: ${:.2}", c.name, c.balance);
        }

        let _ = writeln!(out, "\nUpcoming payments:");
        if self.upcoming_payables.is_empty() {
            let _ = writeln!(out, "- none");
        }
        for p in &self.upcoming_payables {
            let _ = writeln!(out, "- {}: ${:.2} due {}", p.entity_name, p.amount, p.due_date);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_summary_counts_validated_pending_only() {
        let summary =
            FinancialSummary::compute(&fixtures::custodians(), &fixtures::invoices()).unwrap();

        // 1500 + 320.50 + 5400
        assert_eq!(summary.total_cash, Decimal::new(722050, 2));
        assert_eq!(summary.custodian_count, 3);
        // 105 only; 102 is a draft
        assert_eq!(summary.total_receivables, Decimal::from(3000));
        assert_eq!(summary.receivable_count, 1);
        // 101 + 103; 104 is a draft
        assert_eq!(summary.total_payables, Decimal::from(2000));
        assert_eq!(summary.payable_count, 2);
        assert_eq!(summary.net_position().unwrap(), Decimal::new(822050, 2));

        println!("✅ Summary test passed");
    }

    #[test]
    fn test_summary_overflow_is_an_error() {
        let mut custodians = fixtures::custodians();
        custodians[0].balance = Decimal::MAX;

        assert_eq!(
            FinancialSummary::compute(&custodians, &fixtures::invoices()).unwrap_err(),
            LedgerError::Overflow {
                context: "total cash"
            }
        );
        assert!(FinancialBrief::build(&custodians, &fixtures::invoices()).is_err());

        let mut summary =
            FinancialSummary::compute(&fixtures::custodians(), &fixtures::invoices()).unwrap();
        summary.total_receivables = Decimal::MAX;
        assert!(summary.net_position().is_err());
    }

    #[test]
    fn test_cash_flow_validated_in_date_order() {
        let flow = cash_flow(&fixtures::transactions());

        // t1 and t3 are the validated ones
        assert_eq!(flow.len(), 2);
        assert_eq!(flow[0].date, date(2023, 10, 25));
        assert_eq!(flow[0].amount, Decimal::from(500));
        assert_eq!(flow[1].amount, Decimal::from(1000));
    }

    #[test]
    fn test_date_range_inclusive_and_open() {
        let range = DateRange::new(Some(date(2023, 11, 1)), Some(date(2023, 11, 10)));
        assert!(range.contains(date(2023, 11, 1)));
        assert!(range.contains(date(2023, 11, 10)));
        assert!(!range.contains(date(2023, 11, 11)));

        let open_start = DateRange::new(None, Some(date(2023, 11, 10)));
        assert!(open_start.contains(date(1999, 1, 1)));
        assert!(DateRange::default().contains(date(2100, 1, 1)));
    }

    #[test]
    fn test_invoice_tabs() {
        let mut invoices = fixtures::invoices();
        invoices[2].status = InvoiceStatus::Paid; // 103

        let counts = tab_counts(&invoices);
        assert_eq!(
            counts,
            TabCounts {
                drafts: 2,
                to_process: 2,
                history: 1
            }
        );

        // Due dates: 101 → 11-15, 105 → 11-05
        let early = DateRange::new(None, Some(date(2023, 11, 10)));
        let ids: Vec<&str> = invoices_in_tab(&invoices, InvoiceTab::ToProcess, early)
            .iter()
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(ids, vec!["105"]);

        assert_eq!("to-process".parse::<InvoiceTab>().unwrap(), InvoiceTab::ToProcess);
    }

    #[test]
    fn test_transaction_filter() {
        let transactions = fixtures::transactions();

        let expenses = TransactionFilter {
            kind: Some(TransactionType::Expense),
            range: DateRange::default(),
        };
        assert_eq!(expenses.apply(&transactions).len(), 2);

        let late_income = TransactionFilter {
            kind: Some(TransactionType::Income),
            range: DateRange::new(Some(date(2023, 10, 26)), None),
        };
        let matched = late_income.apply(&transactions);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, "t3");

        assert_eq!(TransactionFilter::default().apply(&transactions).len(), 4);
    }

    #[test]
    fn test_custodian_history_newest_first() {
        let transactions = fixtures::transactions();
        let history = custodian_history(&transactions, "1");

        let ids: Vec<&str> = history.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t4", "t1"]);
        assert!(custodian_history(&transactions, "nobody").is_empty());
    }

    #[test]
    fn test_financial_brief() {
        let brief = FinancialBrief::build(&fixtures::custodians(), &fixtures::invoices()).unwrap();

        // 103 (11-01) before 101 (11-15); drafts excluded
        let names: Vec<&str> = brief
            .upcoming_payables
            .iter()
            .map(|p| p.entity_name.as_str())
            .collect();
        assert_eq!(names, vec!["Oficina Central", "Tech Solutions S.A."]);

        let text = brief.render();
        assert!(text.contains("Total cash held by custodians: $7220.50"));
        assert!(text.contains("- Carlos López: $320.50"));
        assert!(text.contains("- Oficina Central: $800.00 due 2023-11-01"));

        println!("{}", text);
    }
}
