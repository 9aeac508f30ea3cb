// 🧾 Invoice Entity - accounts receivable (CXC) and payable (CXP)
//
// Two independent status axes:
//   status            PENDING → PAID          (settlement)
//   validation_status DRAFT   → VALIDATED     (accountant review)
// Only PENDING + DRAFT invoices are editable; only PENDING + VALIDATED ones
// can be settled.

use crate::entities::TransactionType;
use crate::error::LedgerError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceType {
    /// Someone owes us
    Receivable,

    /// We owe someone
    Payable,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Receivable => "RECEIVABLE",
            InvoiceType::Payable => "PAYABLE",
        }
    }

    /// Transaction produced when an invoice of this type is settled
    pub fn settlement_type(&self) -> TransactionType {
        match self {
            InvoiceType::Receivable => TransactionType::Income,
            InvoiceType::Payable => TransactionType::Expense,
        }
    }
}

impl fmt::Display for InvoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "RECEIVABLE" | "CXC" => Ok(InvoiceType::Receivable),
            "PAYABLE" | "CXP" => Ok(InvoiceType::Payable),
            _ => Err(LedgerError::InvalidValue {
                field: "invoice type",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Paid => "PAID",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(InvoiceStatus::Pending),
            "PAID" => Ok(InvoiceStatus::Paid),
            _ => Err(LedgerError::InvalidValue {
                field: "invoice status",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Draft,
    Validated,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Draft => "DRAFT",
            ValidationStatus::Validated => "VALIDATED",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DRAFT" => Ok(ValidationStatus::Draft),
            "VALIDATED" => Ok(ValidationStatus::Validated),
            _ => Err(LedgerError::InvalidValue {
                field: "validation status",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// INVOICE ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,

    /// Who we owe or who owes us
    pub entity_name: String,
    pub description: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,

    #[serde(rename = "type")]
    pub invoice_type: InvoiceType,
    pub status: InvoiceStatus,
    pub validation_status: ValidationStatus,
}

impl Invoice {
    /// Create a new draft from user input
    pub fn from_draft(draft: InvoiceDraft) -> Self {
        Invoice {
            id: uuid::Uuid::new_v4().to_string(),
            entity_name: draft.entity_name,
            description: draft.description,
            amount: draft.amount,
            due_date: draft.due_date,
            invoice_type: draft.invoice_type,
            status: InvoiceStatus::Pending,
            validation_status: ValidationStatus::Draft,
        }
    }

    pub fn is_editable(&self) -> bool {
        self.status == InvoiceStatus::Pending && self.validation_status == ValidationStatus::Draft
    }

    pub fn is_settleable(&self) -> bool {
        self.status == InvoiceStatus::Pending
            && self.validation_status == ValidationStatus::Validated
    }

    /// Signed effect on the settling custodian's balance
    pub fn balance_delta(&self) -> Decimal {
        match self.invoice_type {
            InvoiceType::Receivable => self.amount,
            InvoiceType::Payable => -self.amount,
        }
    }

    pub fn apply_draft(&mut self, draft: InvoiceDraft) {
        self.entity_name = draft.entity_name;
        self.description = draft.description;
        self.amount = draft.amount;
        self.due_date = draft.due_date;
        self.invoice_type = draft.invoice_type;
    }
}

/// Editable invoice fields (create and update)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDraft {
    pub entity_name: String,
    #[serde(default)]
    pub description: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    #[serde(rename = "type")]
    pub invoice_type: InvoiceType,
}

impl InvoiceDraft {
    pub fn check(&self) -> Result<(), LedgerError> {
        if self.entity_name.trim().is_empty() {
            return Err(LedgerError::EmptyField {
                field: "entity name",
            });
        }
        if self.amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount {
                amount: self.amount,
            });
        }
        Ok(())
    }
}
