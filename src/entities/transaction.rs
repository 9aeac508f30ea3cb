// 💸 Transaction Entity - a single movement of cash on one custodian
//
// Only VALIDATED transactions have touched a balance. PENDING ones wait for
// an accountant; REJECTED ones are kept for history until deleted.

use crate::error::LedgerError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "INCOME",
            TransactionType::Expense => "EXPENSE",
        }
    }

    /// Sign an amount by direction (income adds, expense subtracts)
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            TransactionType::Income => amount,
            TransactionType::Expense => -amount,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "INCOME" => Ok(TransactionType::Income),
            "EXPENSE" => Ok(TransactionType::Expense),
            _ => Err(LedgerError::InvalidValue {
                field: "transaction type",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Validated,
    Rejected,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Validated => "VALIDATED",
            TransactionStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(TransactionStatus::Pending),
            "VALIDATED" => Ok(TransactionStatus::Validated),
            "REJECTED" => Ok(TransactionStatus::Rejected),
            _ => Err(LedgerError::InvalidValue {
                field: "transaction status",
                value: s.to_string(),
            }),
        }
    }
}

/// Outcome of reviewing a pending transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Validate,
    Reject,
}

impl Decision {
    pub fn target_status(&self) -> TransactionStatus {
        match self {
            Decision::Validate => TransactionStatus::Validated,
            Decision::Reject => TransactionStatus::Rejected,
        }
    }
}

// ============================================================================
// TRANSACTION ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub date: NaiveDate,
    pub amount: Decimal,

    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub custodian_id: String,
    pub description: String,
    pub status: TransactionStatus,

    /// Set when the transaction settles an invoice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_invoice_id: Option<String>,
}

impl Transaction {
    /// Build a PENDING transaction from user input
    pub fn pending(new: NewTransaction) -> Self {
        Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            date: new.date,
            amount: new.amount,
            transaction_type: new.transaction_type,
            custodian_id: new.custodian_id,
            description: new.description,
            status: TransactionStatus::Pending,
            related_invoice_id: None,
        }
    }

    /// Signed effect on the custodian balance once validated
    pub fn signed_amount(&self) -> Decimal {
        self.transaction_type.signed(self.amount)
    }

    pub fn is_validated(&self) -> bool {
        self.status == TransactionStatus::Validated
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    /// PENDING and REJECTED transactions have never moved money
    pub fn is_deletable(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Pending | TransactionStatus::Rejected
        )
    }

    /// Fingerprint for duplicate detection on import
    /// NOTE: this is for DEDUPLICATION, not identity (identity = id)
    pub fn compute_idempotency_hash(&self) -> String {
        idempotency_hash(
            self.date,
            self.amount,
            self.transaction_type,
            &self.custodian_id,
            &self.description,
        )
    }
}

pub fn idempotency_hash(
    date: NaiveDate,
    amount: Decimal,
    transaction_type: TransactionType,
    custodian_id: &str,
    description: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}|{}|{}|{}|{}",
        date,
        amount.normalize(),
        transaction_type.as_str(),
        custodian_id,
        description.trim()
    ));
    format!("{:x}", hasher.finalize())
}

/// Input for a manual transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    pub date: NaiveDate,
    pub amount: Decimal,
    #[serde(rename = "type", alias = "transaction_type")]
    pub transaction_type: TransactionType,
    #[serde(alias = "custodian_id")]
    pub custodian_id: String,
    #[serde(default)]
    pub description: String,
}

impl NewTransaction {
    pub fn idempotency_hash(&self) -> String {
        idempotency_hash(
            self.date,
            self.amount,
            self.transaction_type,
            &self.custodian_id,
            &self.description,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tx(amount: i64, kind: TransactionType) -> NewTransaction {
        NewTransaction {
            date: NaiveDate::from_ymd_opt(2023, 10, 26).unwrap(),
            amount: Decimal::from(amount),
            transaction_type: kind,
            custodian_id: "2".to_string(),
            description: "Office supplies".to_string(),
        }
    }

    #[test]
    fn test_pending_transaction() {
        let tx = Transaction::pending(new_tx(120, TransactionType::Expense));

        assert!(tx.is_pending());
        assert!(tx.is_deletable());
        assert_eq!(tx.signed_amount(), Decimal::from(-120));
        assert_eq!(tx.related_invoice_id, None);
    }

    #[test]
    fn test_deletable_states() {
        let mut tx = Transaction::pending(new_tx(50, TransactionType::Income));

        tx.status = TransactionStatus::Rejected;
        assert!(tx.is_deletable());

        tx.status = TransactionStatus::Validated;
        assert!(!tx.is_deletable());
    }

    #[test]
    fn test_idempotency_hash() {
        let input = new_tx(120, TransactionType::Expense);
        let tx = Transaction::pending(input.clone());

        let hash1 = tx.compute_idempotency_hash();
        let hash2 = input.idempotency_hash();

        // Same content, different id → same fingerprint
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64, "SHA-256 hash should be 64 hex characters");

        // 120 and 120.00 are the same amount
        let mut scaled = input.clone();
        scaled.amount = Decimal::new(12000, 2);
        assert_eq!(scaled.idempotency_hash(), hash1);

        let other = new_tx(121, TransactionType::Expense);
        assert_ne!(other.idempotency_hash(), hash1);
    }

    #[test]
    fn test_decision_target() {
        assert_eq!(Decision::Validate.target_status(), TransactionStatus::Validated);
        assert_eq!(Decision::Reject.target_status(), TransactionStatus::Rejected);
    }
}
