// ⚖️ Ledger - keeps custodian balances, invoice status and transaction
// records consistent when money moves.
//
// Every mutating operation validates first and mutates second, so an error
// always leaves the ledger untouched. On success it returns the list of
// changes it made; the persistence layer writes exactly those through.

use crate::db::LedgerSnapshot;
use crate::entities::{
    Custodian, Decision, Invoice, InvoiceDraft, InvoiceStatus, NewTransaction, NewUser, Role,
    Transaction, TransactionStatus, TransactionType, User, ValidationStatus,
};
use crate::error::LedgerError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

// ============================================================================
// CHANGES
// ============================================================================

/// A single state change produced by a ledger operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum LedgerChange {
    UserAdded(User),
    UserRemoved { id: String },
    CustodianAdded(Custodian),
    CustodianRemoved { id: String },
    BalanceUpdated { custodian_id: String, balance: Decimal },
    InvoiceSaved(Invoice),
    InvoiceRemoved { id: String },
    TransactionSaved(Transaction),
    TransactionStatusChanged { id: String, status: TransactionStatus },
    TransactionRemoved { id: String },
}

/// Result of settling an invoice
#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub invoice: Invoice,
    pub transaction: Transaction,
    pub new_balance: Decimal,
    pub changes: Vec<LedgerChange>,
}

/// Result of a transfer: the two pending legs
#[derive(Debug, Clone, Serialize)]
pub struct Transfer {
    pub outgoing: Transaction,
    pub incoming: Transaction,
    pub changes: Vec<LedgerChange>,
}

// ============================================================================
// LEDGER
// ============================================================================

/// In-memory state store. Collections are ordered newest first where the
/// operation says "placed first", matching how they are listed.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    users: Vec<User>,
    custodians: Vec<Custodian>,
    invoices: Vec<Invoice>,
    transactions: Vec<Transaction>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        Ledger {
            users: snapshot.users,
            custodians: snapshot.custodians,
            invoices: snapshot.invoices,
            transactions: snapshot.transactions,
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            users: self.users.clone(),
            custodians: self.custodians.clone(),
            invoices: self.invoices.clone(),
            transactions: self.transactions.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------------

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn custodians(&self) -> &[Custodian] {
        &self.custodians
    }

    pub fn invoices(&self) -> &[Invoice] {
        &self.invoices
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn custodian(&self, id: &str) -> Option<&Custodian> {
        self.custodians.iter().find(|c| c.id == id)
    }

    pub fn invoice(&self, id: &str) -> Option<&Invoice> {
        self.invoices.iter().find(|i| i.id == id)
    }

    pub fn transaction(&self, id: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.id == id)
    }

    fn require_custodian(&self, id: &str) -> Result<&Custodian, LedgerError> {
        self.custodian(id)
            .ok_or_else(|| LedgerError::not_found("custodian", id))
    }

    fn require_invoice(&self, id: &str) -> Result<&Invoice, LedgerError> {
        self.invoice(id)
            .ok_or_else(|| LedgerError::not_found("invoice", id))
    }

    fn require_transaction(&self, id: &str) -> Result<&Transaction, LedgerError> {
        self.transaction(id)
            .ok_or_else(|| LedgerError::not_found("transaction", id))
    }

    fn custodian_mut(&mut self, id: &str) -> Result<&mut Custodian, LedgerError> {
        self.custodians
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| LedgerError::not_found("custodian", id))
    }

    fn invoice_mut(&mut self, id: &str) -> Result<&mut Invoice, LedgerError> {
        self.invoices
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| LedgerError::not_found("invoice", id))
    }

    fn transaction_mut(&mut self, id: &str) -> Result<&mut Transaction, LedgerError> {
        self.transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| LedgerError::not_found("transaction", id))
    }

    /// Balance a custodian would have after a signed delta. Nothing moves yet.
    fn next_balance(&self, custodian_id: &str, delta: Decimal) -> Result<Decimal, LedgerError> {
        self.require_custodian(custodian_id)?
            .balance
            .checked_add(delta)
            .ok_or(LedgerError::Overflow {
                context: "custodian balance",
            })
    }

    fn set_balance(&mut self, custodian_id: &str, balance: Decimal) -> Result<(), LedgerError> {
        self.custodian_mut(custodian_id)?.balance = balance;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Authentication
    // ------------------------------------------------------------------------

    /// Plaintext credential lookup
    pub fn authenticate(&self, username: &str, password: &str) -> Result<&User, LedgerError> {
        self.users
            .iter()
            .find(|u| u.matches_credentials(username, password))
            .ok_or(LedgerError::InvalidCredentials)
    }

    // ------------------------------------------------------------------------
    // Invoices
    // ------------------------------------------------------------------------

    pub fn add_invoice(&mut self, draft: InvoiceDraft) -> Result<(Invoice, Vec<LedgerChange>), LedgerError> {
        draft.check()?;

        let invoice = Invoice::from_draft(draft);
        self.invoices.insert(0, invoice.clone());

        Ok((invoice.clone(), vec![LedgerChange::InvoiceSaved(invoice)]))
    }

    pub fn update_invoice(&mut self, id: &str, draft: InvoiceDraft) -> Result<(Invoice, Vec<LedgerChange>), LedgerError> {
        draft.check()?;
        ensure_editable(self.require_invoice(id)?)?;

        let invoice = self.invoice_mut(id)?;
        invoice.apply_draft(draft);
        let updated = invoice.clone();

        Ok((updated.clone(), vec![LedgerChange::InvoiceSaved(updated)]))
    }

    /// DRAFT → VALIDATED
    pub fn validate_invoice(&mut self, id: &str) -> Result<(Invoice, Vec<LedgerChange>), LedgerError> {
        let current = self.require_invoice(id)?;
        if !current.is_editable() {
            return Err(LedgerError::InvalidTransition {
                entity: "invoice",
                id: id.to_string(),
                from: format!("{}/{}", current.status, current.validation_status),
                to: ValidationStatus::Validated.to_string(),
            });
        }

        let invoice = self.invoice_mut(id)?;
        invoice.validation_status = ValidationStatus::Validated;
        let updated = invoice.clone();

        Ok((updated.clone(), vec![LedgerChange::InvoiceSaved(updated)]))
    }

    pub fn delete_invoice(&mut self, id: &str) -> Result<Vec<LedgerChange>, LedgerError> {
        ensure_editable(self.require_invoice(id)?)?;

        self.invoices.retain(|i| i.id != id);
        Ok(vec![LedgerChange::InvoiceRemoved { id: id.to_string() }])
    }

    /// Settle an invoice through a custodian
    ///
    /// 1. invoice → PAID
    /// 2. custodian balance += amount (receivable) or -= amount (payable)
    /// 3. a VALIDATED transaction linked to the invoice is recorded
    pub fn settle_invoice(
        &mut self,
        invoice_id: &str,
        custodian_id: &str,
        date: NaiveDate,
    ) -> Result<Settlement, LedgerError> {
        let invoice = self.require_invoice(invoice_id)?.clone();
        let custodian = self.require_custodian(custodian_id)?;

        if !invoice.is_settleable() {
            return Err(LedgerError::InvalidTransition {
                entity: "invoice",
                id: invoice.id.clone(),
                from: format!("{}/{}", invoice.status, invoice.validation_status),
                to: InvoiceStatus::Paid.to_string(),
            });
        }

        let settlement_type = invoice.invoice_type.settlement_type();
        if settlement_type == TransactionType::Expense && !custodian.can_cover(invoice.amount) {
            return Err(LedgerError::InsufficientFunds {
                custodian_id: custodian.id.clone(),
                available: custodian.balance,
                required: invoice.amount,
            });
        }

        let new_balance = self.next_balance(custodian_id, invoice.balance_delta())?;

        // All checks passed - mutate
        let paid = {
            let stored = self.invoice_mut(invoice_id)?;
            stored.status = InvoiceStatus::Paid;
            stored.clone()
        };
        self.set_balance(custodian_id, new_balance)?;

        let verb = match settlement_type {
            TransactionType::Income => "Collection",
            TransactionType::Expense => "Payment",
        };
        let transaction = Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            date,
            amount: invoice.amount,
            transaction_type: settlement_type,
            custodian_id: custodian_id.to_string(),
            description: format!("{} of invoice: {}", verb, invoice.entity_name),
            status: TransactionStatus::Validated,
            related_invoice_id: Some(invoice.id.clone()),
        };
        self.transactions.insert(0, transaction.clone());

        let changes = vec![
            LedgerChange::InvoiceSaved(paid.clone()),
            LedgerChange::BalanceUpdated {
                custodian_id: custodian_id.to_string(),
                balance: new_balance,
            },
            LedgerChange::TransactionSaved(transaction.clone()),
        ];

        Ok(Settlement {
            invoice: paid,
            transaction,
            new_balance,
            changes,
        })
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Record a manual movement; it waits in PENDING until reviewed
    pub fn add_transaction(&mut self, new: NewTransaction) -> Result<(Transaction, Vec<LedgerChange>), LedgerError> {
        if new.amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount { amount: new.amount });
        }
        self.require_custodian(&new.custodian_id)?;

        let transaction = Transaction::pending(new);
        self.transactions.insert(0, transaction.clone());

        Ok((
            transaction.clone(),
            vec![LedgerChange::TransactionSaved(transaction)],
        ))
    }

    /// Review a PENDING transaction. Validation applies its amount to the
    /// custodian exactly once; rejection leaves balances alone.
    pub fn validate_transaction(
        &mut self,
        id: &str,
        decision: Decision,
    ) -> Result<(Transaction, Vec<LedgerChange>), LedgerError> {
        let current = self.require_transaction(id)?.clone();
        let target = decision.target_status();

        if !current.is_pending() {
            return Err(LedgerError::InvalidTransition {
                entity: "transaction",
                id: id.to_string(),
                from: current.status.to_string(),
                to: target.to_string(),
            });
        }

        let mut changes = Vec::new();

        if decision == Decision::Validate {
            let balance = self.next_balance(&current.custodian_id, current.signed_amount())?;
            self.set_balance(&current.custodian_id, balance)?;
            changes.push(LedgerChange::BalanceUpdated {
                custodian_id: current.custodian_id.clone(),
                balance,
            });
        }

        let transaction = self.transaction_mut(id)?;
        transaction.status = target;
        let updated = transaction.clone();

        changes.push(LedgerChange::TransactionStatusChanged {
            id: id.to_string(),
            status: target,
        });

        Ok((updated, changes))
    }

    /// Only transactions that never moved money can be deleted
    pub fn delete_transaction(&mut self, id: &str) -> Result<Vec<LedgerChange>, LedgerError> {
        let current = self.require_transaction(id)?;
        if !current.is_deletable() {
            return Err(LedgerError::InvalidTransition {
                entity: "transaction",
                id: id.to_string(),
                from: current.status.to_string(),
                to: "DELETED".to_string(),
            });
        }

        self.transactions.retain(|t| t.id != id);
        Ok(vec![LedgerChange::TransactionRemoved { id: id.to_string() }])
    }

    /// Move cash between custodians as two PENDING legs. Balances change
    /// only as each leg is validated.
    pub fn transfer(
        &mut self,
        from_id: &str,
        to_id: &str,
        amount: Decimal,
        date: NaiveDate,
    ) -> Result<Transfer, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount { amount });
        }
        if from_id == to_id {
            return Err(LedgerError::SelfTransfer {
                id: from_id.to_string(),
            });
        }

        let from = self.require_custodian(from_id)?.clone();
        let to = self.require_custodian(to_id)?.clone();

        let outgoing = Transaction::pending(NewTransaction {
            date,
            amount,
            transaction_type: TransactionType::Expense,
            custodian_id: from.id.clone(),
            description: format!("Transfer sent to {}", to.name),
        });
        let incoming = Transaction::pending(NewTransaction {
            date,
            amount,
            transaction_type: TransactionType::Income,
            custodian_id: to.id.clone(),
            description: format!("Transfer received from {}", from.name),
        });

        // Listed as [incoming, outgoing, ...existing]
        self.transactions.insert(0, outgoing.clone());
        self.transactions.insert(0, incoming.clone());

        let changes = vec![
            LedgerChange::TransactionSaved(outgoing.clone()),
            LedgerChange::TransactionSaved(incoming.clone()),
        ];

        Ok(Transfer {
            outgoing,
            incoming,
            changes,
        })
    }

    // ------------------------------------------------------------------------
    // Custodians
    // ------------------------------------------------------------------------

    pub fn add_custodian(&mut self, name: &str) -> Result<(Custodian, Vec<LedgerChange>), LedgerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::EmptyField { field: "name" });
        }

        let custodian = Custodian::new(name.to_string());
        self.custodians.push(custodian.clone());

        Ok((
            custodian.clone(),
            vec![LedgerChange::CustodianAdded(custodian)],
        ))
    }

    /// Refused while the custodian holds cash or PENDING transactions still
    /// point at it; settled history is kept.
    pub fn delete_custodian(&mut self, id: &str) -> Result<Vec<LedgerChange>, LedgerError> {
        let balance = self.require_custodian(id)?.balance;

        let pending = self
            .transactions
            .iter()
            .filter(|t| t.custodian_id == id && t.is_pending())
            .count();
        if pending > 0 {
            return Err(LedgerError::CustodianInUse {
                id: id.to_string(),
                pending,
            });
        }

        // Cash only leaves through settlement, transfer or validation
        if !balance.is_zero() {
            return Err(LedgerError::CustodianHoldsCash {
                id: id.to_string(),
                balance,
            });
        }

        self.custodians.retain(|c| c.id != id);
        Ok(vec![LedgerChange::CustodianRemoved { id: id.to_string() }])
    }

    // ------------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------------

    pub fn add_user(&mut self, new: NewUser) -> Result<(User, Vec<LedgerChange>), LedgerError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(LedgerError::EmptyField { field: "name" });
        }

        let mut user = User::new(name.to_string(), new.role);

        if let Some(username) = new.username.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            if self.users.iter().any(|u| u.username.as_deref() == Some(username)) {
                return Err(LedgerError::DuplicateUsername {
                    username: username.to_string(),
                });
            }
            user.username = Some(username.to_string());
            user.password = new.password;
        }

        self.users.push(user.clone());
        Ok((user.clone(), vec![LedgerChange::UserAdded(user)]))
    }

    pub fn delete_user(&mut self, id: &str) -> Result<Vec<LedgerChange>, LedgerError> {
        let user = self
            .user(id)
            .ok_or_else(|| LedgerError::not_found("user", id))?;

        if user.role == Role::Admin {
            let admins = self.users.iter().filter(|u| u.is_admin()).count();
            if admins <= 1 {
                return Err(LedgerError::LastAdmin { id: id.to_string() });
            }
        }

        self.users.retain(|u| u.id != id);
        Ok(vec![LedgerChange::UserRemoved { id: id.to_string() }])
    }
}

fn ensure_editable(invoice: &Invoice) -> Result<(), LedgerError> {
    if invoice.is_editable() {
        Ok(())
    } else {
        Err(LedgerError::InvoiceLocked {
            id: invoice.id.clone(),
            status: invoice.status.to_string(),
            validation: invoice.validation_status.to_string(),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::InvoiceType;
    use crate::fixtures;

    fn seeded() -> Ledger {
        Ledger::from_snapshot(fixtures::snapshot())
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 11, 2).unwrap()
    }

    fn balance(ledger: &Ledger, id: &str) -> Decimal {
        ledger.custodian(id).unwrap().balance
    }

    fn draft(kind: InvoiceType, amount: i64) -> InvoiceDraft {
        InvoiceDraft {
            entity_name: "Papelería Central".to_string(),
            description: "Office paper".to_string(),
            amount: Decimal::from(amount),
            due_date: NaiveDate::from_ymd_opt(2023, 12, 1).unwrap(),
            invoice_type: kind,
        }
    }

    #[test]
    fn test_settle_receivable_invoice() {
        let mut ledger = seeded();
        let before = ledger.transactions().len();

        // Invoice 105: validated receivable of 3000
        let settlement = ledger.settle_invoice("105", "3", today()).unwrap();

        assert_eq!(settlement.invoice.status, InvoiceStatus::Paid);
        assert_eq!(settlement.new_balance, Decimal::from(8400));
        assert_eq!(balance(&ledger, "3"), Decimal::from(8400));

        let tx = &ledger.transactions()[0];
        assert_eq!(ledger.transactions().len(), before + 1);
        assert_eq!(tx.transaction_type, TransactionType::Income);
        assert_eq!(tx.status, TransactionStatus::Validated);
        assert_eq!(tx.related_invoice_id.as_deref(), Some("105"));
        assert_eq!(tx.amount, Decimal::from(3000));
        assert_eq!(tx.description, "Collection of invoice: Consultora Global");
        assert_eq!(settlement.changes.len(), 3);
    }

    #[test]
    fn test_settle_payable_invoice() {
        let mut ledger = seeded();

        // Invoice 103: validated payable of 800, Ana holds 1500
        let settlement = ledger.settle_invoice("103", "1", today()).unwrap();

        assert_eq!(settlement.new_balance, Decimal::from(700));
        assert_eq!(settlement.transaction.transaction_type, TransactionType::Expense);
        assert_eq!(
            settlement.transaction.description,
            "Payment of invoice: Oficina Central"
        );
    }

    #[test]
    fn test_settle_payable_insufficient_funds() {
        let mut ledger = seeded();
        let before = ledger.snapshot();

        // Carlos holds 320.50, invoice 101 is 1200
        let err = ledger.settle_invoice("101", "2", today()).unwrap_err();

        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(ledger.snapshot(), before, "failed settlement must not mutate");
    }

    #[test]
    fn test_settle_requires_validated_pending_invoice() {
        let mut ledger = seeded();

        // 102 is still a draft
        let err = ledger.settle_invoice("102", "1", today()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));

        // Settling twice is refused
        ledger.settle_invoice("105", "1", today()).unwrap();
        let err = ledger.settle_invoice("105", "1", today()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        assert_eq!(balance(&ledger, "1"), Decimal::from(4500));
    }

    #[test]
    fn test_settle_unknown_ids() {
        let mut ledger = seeded();

        assert_eq!(
            ledger.settle_invoice("999", "1", today()).unwrap_err(),
            LedgerError::not_found("invoice", "999")
        );
        assert_eq!(
            ledger.settle_invoice("105", "999", today()).unwrap_err(),
            LedgerError::not_found("custodian", "999")
        );
    }

    #[test]
    fn test_invoice_lifecycle() {
        let mut ledger = seeded();

        let (invoice, changes) = ledger.add_invoice(draft(InvoiceType::Payable, 300)).unwrap();
        assert_eq!(ledger.invoices()[0].id, invoice.id, "new invoices are listed first");
        assert_eq!(changes, vec![LedgerChange::InvoiceSaved(invoice.clone())]);

        let (updated, _) = ledger
            .update_invoice(&invoice.id, draft(InvoiceType::Payable, 350))
            .unwrap();
        assert_eq!(updated.amount, Decimal::from(350));

        let (validated, _) = ledger.validate_invoice(&invoice.id).unwrap();
        assert_eq!(validated.validation_status, ValidationStatus::Validated);

        // Validated invoices are locked
        assert!(matches!(
            ledger.update_invoice(&invoice.id, draft(InvoiceType::Payable, 1)),
            Err(LedgerError::InvoiceLocked { .. })
        ));
        assert!(matches!(
            ledger.delete_invoice(&invoice.id),
            Err(LedgerError::InvoiceLocked { .. })
        ));
        assert!(matches!(
            ledger.validate_invoice(&invoice.id),
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_delete_draft_invoice() {
        let mut ledger = seeded();

        let changes = ledger.delete_invoice("104").unwrap();
        assert_eq!(changes, vec![LedgerChange::InvoiceRemoved { id: "104".to_string() }]);
        assert!(ledger.invoice("104").is_none());
    }

    #[test]
    fn test_add_invoice_rejects_bad_amount() {
        let mut ledger = Ledger::new();
        assert!(matches!(
            ledger.add_invoice(draft(InvoiceType::Receivable, -5)),
            Err(LedgerError::NonPositiveAmount { .. })
        ));
        assert!(ledger.invoices().is_empty());
    }

    #[test]
    fn test_add_transaction_is_pending() {
        let mut ledger = seeded();

        let (tx, _) = ledger
            .add_transaction(NewTransaction {
                date: today(),
                amount: Decimal::from(75),
                transaction_type: TransactionType::Expense,
                custodian_id: "1".to_string(),
                description: "Taxi".to_string(),
            })
            .unwrap();

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(ledger.transactions()[0].id, tx.id);
        // Pending transactions do not touch balances
        assert_eq!(balance(&ledger, "1"), Decimal::from(1500));
    }

    #[test]
    fn test_add_transaction_unknown_custodian() {
        let mut ledger = seeded();

        let err = ledger
            .add_transaction(NewTransaction {
                date: today(),
                amount: Decimal::from(75),
                transaction_type: TransactionType::Income,
                custodian_id: "nope".to_string(),
                description: String::new(),
            })
            .unwrap_err();

        assert_eq!(err, LedgerError::not_found("custodian", "nope"));
    }

    #[test]
    fn test_validate_pending_transaction_applies_once() {
        let mut ledger = seeded();

        // t2: pending expense of 120 on Carlos (320.50)
        let (tx, changes) = ledger.validate_transaction("t2", Decision::Validate).unwrap();

        assert_eq!(tx.status, TransactionStatus::Validated);
        assert_eq!(balance(&ledger, "2"), Decimal::new(20050, 2));
        assert_eq!(
            changes[0],
            LedgerChange::BalanceUpdated {
                custodian_id: "2".to_string(),
                balance: Decimal::new(20050, 2)
            }
        );

        // A second validation must not apply the amount again
        assert!(ledger.validate_transaction("t2", Decision::Validate).is_err());
        assert_eq!(balance(&ledger, "2"), Decimal::new(20050, 2));
    }

    #[test]
    fn test_reject_pending_transaction() {
        let mut ledger = seeded();

        let (tx, changes) = ledger.validate_transaction("t2", Decision::Reject).unwrap();

        assert_eq!(tx.status, TransactionStatus::Rejected);
        assert_eq!(balance(&ledger, "2"), Decimal::new(32050, 2));
        assert_eq!(changes.len(), 1);

        // Rejected transactions stay rejected
        assert!(matches!(
            ledger.validate_transaction("t2", Decision::Validate),
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_delete_transaction_rules() {
        let mut ledger = seeded();

        // t1 is validated and has moved money
        assert!(ledger.delete_transaction("t1").is_err());
        // t4 is rejected, t2 pending
        assert!(ledger.delete_transaction("t4").is_ok());
        assert!(ledger.delete_transaction("t2").is_ok());
        assert_eq!(ledger.transactions().len(), 2);
    }

    #[test]
    fn test_transfer_creates_pending_legs() {
        let mut ledger = seeded();

        let transfer = ledger
            .transfer("3", "2", Decimal::from(250), today())
            .unwrap();

        assert_eq!(transfer.outgoing.transaction_type, TransactionType::Expense);
        assert_eq!(transfer.outgoing.custodian_id, "3");
        assert_eq!(transfer.outgoing.description, "Transfer sent to Carlos López");
        assert_eq!(transfer.incoming.transaction_type, TransactionType::Income);
        assert_eq!(transfer.incoming.custodian_id, "2");
        assert_eq!(
            transfer.incoming.description,
            "Transfer received from Caja Principal"
        );

        // Listed incoming first, then outgoing
        assert_eq!(ledger.transactions()[0].id, transfer.incoming.id);
        assert_eq!(ledger.transactions()[1].id, transfer.outgoing.id);

        // No balance moves until validation
        assert_eq!(balance(&ledger, "3"), Decimal::from(5400));
        assert_eq!(balance(&ledger, "2"), Decimal::new(32050, 2));

        ledger
            .validate_transaction(&transfer.outgoing.id, Decision::Validate)
            .unwrap();
        ledger
            .validate_transaction(&transfer.incoming.id, Decision::Validate)
            .unwrap();

        assert_eq!(balance(&ledger, "3"), Decimal::from(5150));
        assert_eq!(balance(&ledger, "2"), Decimal::new(57050, 2));
    }

    #[test]
    fn test_transfer_validation() {
        let mut ledger = seeded();

        assert!(matches!(
            ledger.transfer("1", "1", Decimal::from(10), today()),
            Err(LedgerError::SelfTransfer { .. })
        ));
        assert!(matches!(
            ledger.transfer("1", "2", Decimal::ZERO, today()),
            Err(LedgerError::NonPositiveAmount { .. })
        ));
        assert!(matches!(
            ledger.transfer("1", "missing", Decimal::from(10), today()),
            Err(LedgerError::NotFound { .. })
        ));
        assert_eq!(ledger.transactions().len(), 4);
    }

    #[test]
    fn test_custodian_management() {
        let mut ledger = seeded();

        let (custodian, _) = ledger.add_custodian("  Caja Chica ").unwrap();
        assert_eq!(custodian.name, "Caja Chica");
        assert_eq!(custodian.balance, Decimal::ZERO);
        assert!(ledger.add_custodian("   ").is_err());

        // Carlos has pending t2
        assert_eq!(
            ledger.delete_custodian("2").unwrap_err(),
            LedgerError::CustodianInUse {
                id: "2".to_string(),
                pending: 1
            }
        );

        ledger.delete_custodian(&custodian.id).unwrap();
        assert!(ledger.custodian(&custodian.id).is_none());
    }

    #[test]
    fn test_delete_custodian_holding_cash() {
        let mut ledger = seeded();
        let before = ledger.snapshot();

        // Ana holds 1500 and has nothing pending
        assert_eq!(
            ledger.delete_custodian("1").unwrap_err(),
            LedgerError::CustodianHoldsCash {
                id: "1".to_string(),
                balance: Decimal::from(1500),
            }
        );
        assert_eq!(ledger.snapshot(), before);

        // Emptied through a transfer, the custodian can go
        let transfer = ledger
            .transfer("1", "3", Decimal::from(1500), today())
            .unwrap();
        ledger
            .validate_transaction(&transfer.outgoing.id, Decision::Validate)
            .unwrap();
        ledger
            .validate_transaction(&transfer.incoming.id, Decision::Validate)
            .unwrap();

        ledger.delete_custodian("1").unwrap();
        assert!(ledger.custodian("1").is_none());
        assert_eq!(balance(&ledger, "3"), Decimal::from(6900));
    }

    #[test]
    fn test_validate_overflow_leaves_ledger_unchanged() {
        let mut ledger = seeded();
        let (tx, _) = ledger
            .add_transaction(NewTransaction {
                date: today(),
                amount: Decimal::MAX,
                transaction_type: TransactionType::Income,
                custodian_id: "1".to_string(),
                description: "Too much".to_string(),
            })
            .unwrap();
        let before = ledger.snapshot();

        let err = ledger
            .validate_transaction(&tx.id, Decision::Validate)
            .unwrap_err();

        assert_eq!(
            err,
            LedgerError::Overflow {
                context: "custodian balance"
            }
        );
        assert_eq!(ledger.snapshot(), before);
        assert!(ledger.transaction(&tx.id).unwrap().is_pending());
    }

    #[test]
    fn test_settle_overflow_leaves_ledger_unchanged() {
        let mut snapshot = fixtures::snapshot();
        for c in snapshot.custodians.iter_mut().filter(|c| c.id == "3") {
            c.balance = Decimal::MAX;
        }
        let mut ledger = Ledger::from_snapshot(snapshot);
        let before = ledger.snapshot();

        // Receivable 105 would push Caja Principal past the maximum
        assert!(matches!(
            ledger.settle_invoice("105", "3", today()),
            Err(LedgerError::Overflow { .. })
        ));
        assert_eq!(ledger.snapshot(), before);
        assert_eq!(ledger.invoice("105").unwrap().status, InvoiceStatus::Pending);
    }

    #[test]
    fn test_user_management() {
        let mut ledger = seeded();

        let (user, _) = ledger
            .add_user(NewUser {
                name: "Cajero Dos".to_string(),
                role: Role::Operator,
                username: Some("cajero".to_string()),
                password: Some("abc".to_string()),
            })
            .unwrap();
        assert_eq!(ledger.authenticate("cajero", "abc").unwrap().id, user.id);

        let duplicate = ledger.add_user(NewUser {
            name: "Otro".to_string(),
            role: Role::Operator,
            username: Some("cajero".to_string()),
            password: None,
        });
        assert!(matches!(duplicate, Err(LedgerError::DuplicateUsername { .. })));

        // u1 is the only admin
        assert_eq!(
            ledger.delete_user("u1").unwrap_err(),
            LedgerError::LastAdmin { id: "u1".to_string() }
        );
        assert!(ledger.delete_user(&user.id).is_ok());
    }

    #[test]
    fn test_authenticate() {
        let ledger = seeded();

        assert_eq!(ledger.authenticate("admin", "123").unwrap().role, Role::Admin);
        assert_eq!(
            ledger.authenticate("admin", "wrong").unwrap_err(),
            LedgerError::InvalidCredentials
        );
    }
}
