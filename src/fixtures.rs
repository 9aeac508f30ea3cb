// Starting data for a fresh ledger
//
// Opening balances are set so that the seeded VALIDATED transactions
// reconcile: opening + validated income - validated expense = balance.

use crate::db::LedgerSnapshot;
use crate::entities::{
    Custodian, Invoice, InvoiceStatus, InvoiceType, Role, Transaction, TransactionStatus,
    TransactionType, User, ValidationStatus,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

pub fn users() -> Vec<User> {
    vec![
        user("u1", "Admin General", Role::Admin, "admin"),
        user("u2", "Contador Principal", Role::Accountant, "contador"),
        user("u3", "Operador Caja", Role::Operator, "operador"),
    ]
}

fn user(id: &str, name: &str, role: Role, username: &str) -> User {
    User {
        id: id.to_string(),
        name: name.to_string(),
        role,
        username: Some(username.to_string()),
        password: Some("123".to_string()),
    }
}

pub fn custodians() -> Vec<Custodian> {
    vec![
        Custodian::with_opening_balance(
            "1",
            "Ana García",
            Decimal::from(1000),
            Decimal::from(1500),
        ),
        Custodian::with_opening_balance(
            "2",
            "Carlos López",
            Decimal::new(32050, 2),
            Decimal::new(32050, 2),
        ),
        Custodian::with_opening_balance(
            "3",
            "Caja Principal",
            Decimal::from(4400),
            Decimal::from(5400),
        ),
    ]
}

pub fn invoices() -> Vec<Invoice> {
    vec![
        invoice("101", "Tech Solutions S.A.", "Servicios de IT Mayo", 1200, date(2023, 11, 15), InvoiceType::Payable, ValidationStatus::Validated),
        invoice("102", "Cliente Juan Pérez", "Venta de Hardware", 450, date(2023, 11, 10), InvoiceType::Receivable, ValidationStatus::Draft),
        invoice("103", "Oficina Central", "Alquiler Noviembre", 800, date(2023, 11, 1), InvoiceType::Payable, ValidationStatus::Validated),
        invoice("104", "Distribuidora Norte", "Compra de Insumos", 2300, date(2023, 11, 20), InvoiceType::Payable, ValidationStatus::Draft),
        invoice("105", "Consultora Global", "Asesoría Mensual", 3000, date(2023, 11, 5), InvoiceType::Receivable, ValidationStatus::Validated),
    ]
}

fn invoice(
    id: &str,
    entity_name: &str,
    description: &str,
    amount: i64,
    due_date: NaiveDate,
    invoice_type: InvoiceType,
    validation_status: ValidationStatus,
) -> Invoice {
    Invoice {
        id: id.to_string(),
        entity_name: entity_name.to_string(),
        description: description.to_string(),
        amount: Decimal::from(amount),
        due_date,
        invoice_type,
        status: InvoiceStatus::Pending,
        validation_status,
    }
}

pub fn transactions() -> Vec<Transaction> {
    vec![
        transaction("t1", date(2023, 10, 25), 500, TransactionType::Income, "1", "Abono Cliente A", TransactionStatus::Validated),
        transaction("t2", date(2023, 10, 26), 120, TransactionType::Expense, "2", "Compra papelería", TransactionStatus::Pending),
        transaction("t3", date(2023, 10, 27), 1000, TransactionType::Income, "3", "Venta contado", TransactionStatus::Validated),
        transaction("t4", date(2023, 10, 28), 200, TransactionType::Expense, "1", "Taxi corporativo", TransactionStatus::Rejected),
    ]
}

fn transaction(
    id: &str,
    date: NaiveDate,
    amount: i64,
    transaction_type: TransactionType,
    custodian_id: &str,
    description: &str,
    status: TransactionStatus,
) -> Transaction {
    Transaction {
        id: id.to_string(),
        date,
        amount: Decimal::from(amount),
        transaction_type,
        custodian_id: custodian_id.to_string(),
        description: description.to_string(),
        status,
        related_invoice_id: None,
    }
}

/// Full starting snapshot
pub fn snapshot() -> LedgerSnapshot {
    LedgerSnapshot {
        users: users(),
        custodians: custodians(),
        invoices: invoices(),
        transactions: transactions(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_counts() {
        let snapshot = snapshot();

        assert_eq!(snapshot.users.len(), 3);
        assert_eq!(snapshot.custodians.len(), 3);
        assert_eq!(snapshot.invoices.len(), 5);
        assert_eq!(snapshot.transactions.len(), 4);
    }

    #[test]
    fn test_seed_opening_balances_reconcile() {
        let transactions = transactions();

        for custodian in custodians() {
            let delta: Decimal = transactions
                .iter()
                .filter(|tx| tx.custodian_id == custodian.id && tx.is_validated())
                .map(|tx| tx.signed_amount())
                .sum();

            assert_eq!(
                custodian.opening_balance + delta,
                custodian.balance,
                "seed custodian {} should reconcile",
                custodian.name
            );
        }
    }
}
