// ⚖️ Reconciliation Engine - Validate custodian balances
//
// For every custodian:
//   opening_balance + validated income - validated expense = balance
//
// The ledger keeps this true by construction; reconciliation proves it on
// whatever was loaded from the store and points at what broke it.

use crate::entities::{Custodian, Invoice, InvoiceStatus, Transaction, TransactionType};
use crate::error::{checked_sum, LedgerError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconciliationResult {
    /// Recorded movements explain the balance
    Balanced {
        opening_balance: Decimal,
        total_income: Decimal,
        total_expense: Decimal,
        balance: Decimal,
    },

    /// Balance and recorded movements disagree
    Discrepancy {
        expected_balance: Decimal,
        actual_balance: Decimal,
        difference: Decimal,
    },
}

impl ReconciliationResult {
    pub fn is_balanced(&self) -> bool {
        matches!(self, ReconciliationResult::Balanced { .. })
    }

    pub fn difference(&self) -> Decimal {
        match self {
            ReconciliationResult::Balanced { .. } => Decimal::ZERO,
            ReconciliationResult::Discrepancy { difference, .. } => *difference,
        }
    }
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodianReconciliation {
    pub custodian_id: String,
    pub custodian_name: String,
    pub transaction_count: usize,
    pub total_income: Decimal,
    pub total_expense: Decimal,
    pub expected_balance: Decimal,
    pub result: ReconciliationResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub custodians: Vec<CustodianReconciliation>,
    pub discrepancies: Vec<Discrepancy>,

    /// Σ(balance - opening_balance) over all custodians
    pub total_balance_change: Decimal,

    /// Σ validated income - Σ validated expense over known custodians
    pub net_recorded: Decimal,
    pub reconciled_at: chrono::DateTime<chrono::Utc>,
}

impl ReconciliationReport {
    pub fn is_balanced(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn by_category(&self, category: DiscrepancyCategory) -> Vec<&Discrepancy> {
        self.discrepancies
            .iter()
            .filter(|d| d.category == category)
            .collect()
    }

    pub fn summary(&self) -> String {
        let balanced = self
            .custodians
            .iter()
            .filter(|c| c.result.is_balanced())
            .count();

        format!(
            "Reconciliation: {}/{} custodians balanced, net change ${:.2}, recorded ${:.2}, {} discrepancies",
            balanced,
            self.custodians.len(),
            self.total_balance_change,
            self.net_recorded,
            self.discrepancies.len()
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    pub description: String,
    pub amount: Decimal,
    pub category: DiscrepancyCategory,

    /// Custodian, transaction or invoice id the finding is about
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyCategory {
    BalanceMismatch,
    OrphanTransaction,
    PaidInvoiceWithoutSettlement,
    DuplicateSettlement,
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

const OVERFLOW: LedgerError = LedgerError::Overflow {
    context: "reconciliation",
};

pub struct ReconciliationEngine {
    /// Differences below this are rounding noise (default: $0.01)
    pub tolerance: Decimal,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            tolerance: Decimal::new(1, 2),
        }
    }

    pub fn with_tolerance(tolerance: Decimal) -> Self {
        ReconciliationEngine { tolerance }
    }

    pub fn reconcile(
        &self,
        custodians: &[Custodian],
        transactions: &[Transaction],
        invoices: &[Invoice],
    ) -> Result<ReconciliationReport, LedgerError> {
        let mut discrepancies = Vec::new();

        let results = custodians
            .iter()
            .map(|c| self.reconcile_custodian(c, transactions))
            .collect::<Result<Vec<_>, _>>()?;

        for entry in &results {
            if let ReconciliationResult::Discrepancy {
                expected_balance,
                actual_balance,
                difference,
            } = &entry.result
            {
                discrepancies.push(Discrepancy {
                    description: format!(
                        "{}: balance ${:.2}, transactions explain ${:.2}",
                        entry.custodian_name, actual_balance, expected_balance
                    ),
                    amount: *difference,
                    category: DiscrepancyCategory::BalanceMismatch,
                    reference: entry.custodian_id.clone(),
                });
            }
        }

        discrepancies.extend(self.detect_orphans(custodians, transactions));
        discrepancies.extend(self.detect_settlement_issues(transactions, invoices)?);

        let changes = custodians
            .iter()
            .map(|c| c.balance_change().ok_or(OVERFLOW))
            .collect::<Result<Vec<_>, _>>()?;
        let total_balance_change = checked_sum(changes, "total balance change")?;

        let nets = results
            .iter()
            .map(|r| r.total_income.checked_sub(r.total_expense).ok_or(OVERFLOW))
            .collect::<Result<Vec<_>, _>>()?;
        let net_recorded = checked_sum(nets, "net recorded")?;

        Ok(ReconciliationReport {
            custodians: results,
            discrepancies,
            total_balance_change,
            net_recorded,
            reconciled_at: chrono::Utc::now(),
        })
    }

    fn reconcile_custodian(
        &self,
        custodian: &Custodian,
        transactions: &[Transaction],
    ) -> Result<CustodianReconciliation, LedgerError> {
        let own: Vec<&Transaction> = transactions
            .iter()
            .filter(|tx| tx.custodian_id == custodian.id && tx.is_validated())
            .collect();

        let total_income = Self::total(&own, TransactionType::Income)?;
        let total_expense = Self::total(&own, TransactionType::Expense)?;
        let expected_balance = custodian
            .opening_balance
            .checked_add(total_income)
            .and_then(|v| v.checked_sub(total_expense))
            .ok_or(OVERFLOW)?;
        let difference = custodian
            .balance
            .checked_sub(expected_balance)
            .ok_or(OVERFLOW)?
            .abs();

        let result = if difference < self.tolerance {
            ReconciliationResult::Balanced {
                opening_balance: custodian.opening_balance,
                total_income,
                total_expense,
                balance: custodian.balance,
            }
        } else {
            ReconciliationResult::Discrepancy {
                expected_balance,
                actual_balance: custodian.balance,
                difference,
            }
        };

        Ok(CustodianReconciliation {
            custodian_id: custodian.id.clone(),
            custodian_name: custodian.name.clone(),
            transaction_count: own.len(),
            total_income,
            total_expense,
            expected_balance,
            result,
        })
    }

    fn total(transactions: &[&Transaction], kind: TransactionType) -> Result<Decimal, LedgerError> {
        checked_sum(
            transactions
                .iter()
                .filter(|tx| tx.transaction_type == kind)
                .map(|tx| tx.amount),
            "custodian totals",
        )
    }

    /// Validated transactions whose custodian no longer exists
    fn detect_orphans(&self, custodians: &[Custodian], transactions: &[Transaction]) -> Vec<Discrepancy> {
        let known: HashSet<&str> = custodians.iter().map(|c| c.id.as_str()).collect();

        transactions
            .iter()
            .filter(|tx| tx.is_validated() && !known.contains(tx.custodian_id.as_str()))
            .map(|tx| Discrepancy {
                description: format!(
                    "Validated transaction '{}' points at unknown custodian {}",
                    tx.description, tx.custodian_id
                ),
                amount: tx.amount,
                category: DiscrepancyCategory::OrphanTransaction,
                reference: tx.id.clone(),
            })
            .collect()
    }

    /// Every PAID invoice has exactly one validated settlement
    fn detect_settlement_issues(
        &self,
        transactions: &[Transaction],
        invoices: &[Invoice],
    ) -> Result<Vec<Discrepancy>, LedgerError> {
        let mut settlements: HashMap<&str, usize> = HashMap::new();
        for tx in transactions.iter().filter(|tx| tx.is_validated()) {
            if let Some(invoice_id) = tx.related_invoice_id.as_deref() {
                *settlements.entry(invoice_id).or_insert(0) += 1;
            }
        }

        let mut discrepancies = Vec::new();

        for invoice in invoices {
            let count = settlements.get(invoice.id.as_str()).copied().unwrap_or(0);

            if invoice.status == InvoiceStatus::Paid && count == 0 {
                discrepancies.push(Discrepancy {
                    description: format!(
                        "Invoice {} ({}) is PAID but has no settlement transaction",
                        invoice.id, invoice.entity_name
                    ),
                    amount: invoice.amount,
                    category: DiscrepancyCategory::PaidInvoiceWithoutSettlement,
                    reference: invoice.id.clone(),
                });
            }

            if count > 1 {
                discrepancies.push(Discrepancy {
                    description: format!(
                        "Invoice {} ({}) was settled {} times",
                        invoice.id, invoice.entity_name, count
                    ),
                    amount: invoice
                        .amount
                        .checked_mul(Decimal::from(count - 1))
                        .ok_or(OVERFLOW)?,
                    category: DiscrepancyCategory::DuplicateSettlement,
                    reference: invoice.id.clone(),
                });
            }
        }

        Ok(discrepancies)
    }

    /// Quick check if one custodian balances
    pub fn quick_balance_check(
        &self,
        custodian: &Custodian,
        transactions: &[Transaction],
    ) -> Result<bool, LedgerError> {
        Ok(self
            .reconcile_custodian(custodian, transactions)?
            .result
            .is_balanced())
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::TransactionStatus;
    use crate::fixtures;
    use crate::ledger::Ledger;
    use chrono::NaiveDate;

    fn create_test_transaction(custodian_id: &str, amount: i64, kind: TransactionType) -> Transaction {
        Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            amount: Decimal::from(amount),
            transaction_type: kind,
            custodian_id: custodian_id.to_string(),
            description: format!("Test transaction: {}", kind),
            status: TransactionStatus::Validated,
            related_invoice_id: None,
        }
    }

    #[test]
    fn test_seed_data_is_balanced() {
        let engine = ReconciliationEngine::new();

        let report = engine.reconcile(
            &fixtures::custodians(),
            &fixtures::transactions(),
            &fixtures::invoices(),
        ).unwrap();

        assert!(report.is_balanced(), "{:?}", report.discrepancies);
        assert_eq!(report.custodians.len(), 3);
        assert_eq!(report.total_balance_change, report.net_recorded);
        assert_eq!(report.total_balance_change, Decimal::from(1500));

        println!("✅ Test passed: {}", report.summary());
    }

    #[test]
    fn test_reconciliation_per_custodian() {
        let engine = ReconciliationEngine::new();
        let custodian =
            Custodian::with_opening_balance("c1", "Caja", Decimal::from(1000), Decimal::from(2200));

        let mut rejected = create_test_transaction("c1", 999, TransactionType::Income);
        rejected.status = TransactionStatus::Rejected;

        let transactions = vec![
            create_test_transaction("c1", 2000, TransactionType::Income),
            create_test_transaction("c1", 500, TransactionType::Expense),
            create_test_transaction("c1", 300, TransactionType::Expense),
            create_test_transaction("other", 50, TransactionType::Income),
            rejected,
        ];

        let report = engine
            .reconcile(std::slice::from_ref(&custodian), &transactions, &[])
            .unwrap();
        let entry = &report.custodians[0];

        assert_eq!(entry.transaction_count, 3);
        assert_eq!(entry.total_income, Decimal::from(2000));
        assert_eq!(entry.total_expense, Decimal::from(800));
        assert!(entry.result.is_balanced());

        // "other" is unknown: an orphan, not part of c1
        assert_eq!(report.by_category(DiscrepancyCategory::OrphanTransaction).len(), 1);

        println!("✅ Test passed: {}", report.summary());
    }

    #[test]
    fn test_balance_mismatch() {
        let engine = ReconciliationEngine::new();
        let mut custodians = fixtures::custodians();
        custodians[1].balance += Decimal::from(5);

        let report = engine.reconcile(&custodians, &fixtures::transactions(), &[]).unwrap();

        assert!(!report.is_balanced());
        let mismatches = report.by_category(DiscrepancyCategory::BalanceMismatch);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].reference, "2");
        assert_eq!(mismatches[0].amount, Decimal::from(5));
        assert_eq!(report.custodians[1].result.difference(), Decimal::from(5));

        println!("✅ Test passed: {}", report.summary());
    }

    #[test]
    fn test_tolerance_absorbs_rounding() {
        let engine = ReconciliationEngine::new();
        let custodian = Custodian::with_opening_balance(
            "c1",
            "Caja",
            Decimal::ZERO,
            Decimal::new(100005, 3), // 100.005
        );
        let transactions = vec![create_test_transaction("c1", 100, TransactionType::Income)];

        assert!(engine.quick_balance_check(&custodian, &transactions).unwrap());
        assert!(!ReconciliationEngine::with_tolerance(Decimal::new(1, 3))
            .quick_balance_check(&custodian, &transactions)
            .unwrap());
    }

    #[test]
    fn test_settlement_checks() {
        let engine = ReconciliationEngine::new();
        let mut invoices = fixtures::invoices();

        // 101 marked PAID with no settlement
        invoices[0].status = InvoiceStatus::Paid;

        // 105 settled twice
        let mut first = create_test_transaction("3", 3000, TransactionType::Income);
        first.related_invoice_id = Some("105".to_string());
        let mut second = first.clone();
        second.id = "dup".to_string();

        let report = engine.reconcile(&[], &[first, second], &invoices).unwrap();

        let unpaid = report.by_category(DiscrepancyCategory::PaidInvoiceWithoutSettlement);
        assert_eq!(unpaid.len(), 1);
        assert_eq!(unpaid[0].reference, "101");

        let duplicates = report.by_category(DiscrepancyCategory::DuplicateSettlement);
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].amount, Decimal::from(3000));

        println!("✅ Settlement checks passed");
    }

    #[test]
    fn test_overflowing_totals_are_an_error() {
        let engine = ReconciliationEngine::new();
        let custodian =
            Custodian::with_opening_balance("c1", "Caja", Decimal::ZERO, Decimal::ZERO);

        let mut huge = create_test_transaction("c1", 0, TransactionType::Income);
        huge.amount = Decimal::MAX;
        let transactions = vec![huge.clone(), huge];

        assert!(matches!(
            engine.reconcile(std::slice::from_ref(&custodian), &transactions, &[]),
            Err(LedgerError::Overflow { .. })
        ));
        assert!(engine.quick_balance_check(&custodian, &transactions).is_err());

        // A triple settlement of a maximal invoice overflows the duplicate amount
        let mut invoices = fixtures::invoices();
        invoices[4].amount = Decimal::MAX;
        let mut settled = create_test_transaction("3", 1, TransactionType::Income);
        settled.related_invoice_id = Some(invoices[4].id.clone());
        let settlements = vec![settled.clone(), settled.clone(), settled];

        assert!(engine.reconcile(&[], &settlements, &invoices).is_err());
    }

    #[test]
    fn test_ledger_operations_keep_books_balanced() {
        let mut ledger = Ledger::from_snapshot(fixtures::snapshot());
        let date = NaiveDate::from_ymd_opt(2023, 11, 2).unwrap();

        ledger.settle_invoice("105", "3", date).unwrap();
        ledger.settle_invoice("103", "1", date).unwrap();
        let transfer = ledger.transfer("3", "2", Decimal::from(400), date).unwrap();
        ledger
            .validate_transaction(&transfer.outgoing.id, crate::entities::Decision::Validate)
            .unwrap();
        ledger
            .validate_transaction("t2", crate::entities::Decision::Validate)
            .unwrap();

        let report = ReconciliationEngine::new().reconcile(
            ledger.custodians(),
            ledger.transactions(),
            ledger.invoices(),
        ).unwrap();

        assert!(report.is_balanced(), "{:?}", report.discrepancies);
        assert_eq!(report.total_balance_change, report.net_recorded);

        println!("✅ Test passed: {}", report.summary());
    }
}
