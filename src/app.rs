// 🛡️ CashGuard controller
//
// Session + permissions + write-through. Each operation:
//   1. checks the logged-in user's role
//   2. runs the ledger operation (all-or-nothing in memory)
//   3. writes the resulting changes to the store
//   4. records an audit event with the user as actor

use crate::db::{Event, Persistence};
use crate::entities::{
    Custodian, Decision, Invoice, InvoiceDraft, NewTransaction, NewUser, Permission, Transaction,
    User,
};
use crate::error::LedgerError;
use crate::import::ImportSummary;
use crate::ledger::{Ledger, LedgerChange, Settlement, Transfer};
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use crate::reporting::{FinancialBrief, FinancialSummary};
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashSet;

/// Today's date in UTC, used for settlements and transfers
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Log a refused operation and hand the error on
fn refused(operation: &str, err: LedgerError) -> anyhow::Error {
    tracing::warn!(operation, error = %err, "operation refused");
    err.into()
}

pub struct CashGuard<P: Persistence> {
    ledger: Ledger,
    store: P,
    current_user: Option<User>,
}

impl<P: Persistence> CashGuard<P> {
    /// Load the ledger from the store. Nobody is logged in yet.
    pub fn open(mut store: P) -> Result<Self> {
        let snapshot = store.load()?;
        tracing::debug!(
            custodians = snapshot.custodians.len(),
            invoices = snapshot.invoices.len(),
            transactions = snapshot.transactions.len(),
            "ledger loaded"
        );

        Ok(Self {
            ledger: Ledger::from_snapshot(snapshot),
            store,
            current_user: None,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn current_user(&self) -> Option<&User> {
        self.current_user.as_ref()
    }

    // ========================================================================
    // SESSION
    // ========================================================================

    pub fn login(&mut self, username: &str, password: &str) -> Result<User> {
        let user = self
            .ledger
            .authenticate(username, password)
            .map_err(|e| refused("login", e))?
            .clone();

        tracing::info!(user = %user.name, role = %user.role, "logged in");
        self.current_user = Some(user.clone());
        Ok(user)
    }

    pub fn logout(&mut self) {
        if let Some(user) = self.current_user.take() {
            tracing::info!(user = %user.name, "logged out");
        }
    }

    fn require_login(&self) -> Result<&User, LedgerError> {
        self.current_user.as_ref().ok_or(LedgerError::NotAuthenticated)
    }

    fn require(&self, permission: Permission) -> Result<&User, LedgerError> {
        let user = self.require_login()?;
        if user.can(permission) {
            Ok(user)
        } else {
            Err(LedgerError::Forbidden {
                role: user.role.to_string(),
                action: permission.describe().to_string(),
            })
        }
    }

    fn actor(&self) -> String {
        self.current_user
            .as_ref()
            .map(|u| u.username.clone().unwrap_or_else(|| u.name.clone()))
            .unwrap_or_else(|| "system".to_string())
    }

    fn event(
        &self,
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
    ) -> Event {
        Event::new(event_type, entity_type, entity_id, data, &self.actor())
    }

    /// Store the changes and events as one batch, then adopt the working
    /// copy. A failed write leaves the ledger as it was.
    fn persist(&mut self, next: Ledger, changes: &[LedgerChange], events: &[Event]) -> Result<()> {
        self.store.write_batch(changes, events)?;
        self.ledger = next;
        Ok(())
    }

    /// Persist one operation with its audit event
    fn commit(
        &mut self,
        next: Ledger,
        changes: &[LedgerChange],
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
    ) -> Result<()> {
        let event = self.event(event_type, entity_type, entity_id, data);
        self.persist(next, changes, std::slice::from_ref(&event))?;

        tracing::info!(event_type, entity_type, entity_id, changes = changes.len(), "committed");
        Ok(())
    }

    pub fn history(&mut self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        self.require_login()?;
        self.store.events_for_entity(entity_type, entity_id)
    }

    // ========================================================================
    // INVOICES
    // ========================================================================

    pub fn add_invoice(&mut self, draft: InvoiceDraft) -> Result<Invoice> {
        self.require(Permission::EditInvoice)
            .map_err(|e| refused("add_invoice", e))?;

        let mut next = self.ledger.clone();
        let (invoice, changes) = next
            .add_invoice(draft)
            .map_err(|e| refused("add_invoice", e))?;

        self.commit(
            next,
            &changes,
            "invoice_created",
            "invoice",
            &invoice.id,
            json!({ "type": invoice.invoice_type, "amount": invoice.amount }),
        )?;
        Ok(invoice)
    }

    pub fn update_invoice(&mut self, id: &str, draft: InvoiceDraft) -> Result<Invoice> {
        self.require(Permission::EditInvoice)
            .map_err(|e| refused("update_invoice", e))?;

        let mut next = self.ledger.clone();
        let (invoice, changes) = next
            .update_invoice(id, draft)
            .map_err(|e| refused("update_invoice", e))?;

        self.commit(
            next,
            &changes,
            "invoice_updated",
            "invoice",
            id,
            json!({ "amount": invoice.amount, "due_date": invoice.due_date }),
        )?;
        Ok(invoice)
    }

    pub fn validate_invoice(&mut self, id: &str) -> Result<Invoice> {
        self.require(Permission::ValidateInvoice)
            .map_err(|e| refused("validate_invoice", e))?;

        let mut next = self.ledger.clone();
        let (invoice, changes) = next
            .validate_invoice(id)
            .map_err(|e| refused("validate_invoice", e))?;

        self.commit(next, &changes, "invoice_validated", "invoice", id, json!({}))?;
        Ok(invoice)
    }

    pub fn delete_invoice(&mut self, id: &str) -> Result<()> {
        self.require(Permission::EditInvoice)
            .map_err(|e| refused("delete_invoice", e))?;

        let mut next = self.ledger.clone();
        let changes = next
            .delete_invoice(id)
            .map_err(|e| refused("delete_invoice", e))?;

        self.commit(next, &changes, "invoice_deleted", "invoice", id, json!({}))
    }

    pub fn settle_invoice(
        &mut self,
        invoice_id: &str,
        custodian_id: &str,
        date: NaiveDate,
    ) -> Result<Settlement> {
        self.require(Permission::SettleInvoice)
            .map_err(|e| refused("settle_invoice", e))?;

        let mut next = self.ledger.clone();
        let settlement = next
            .settle_invoice(invoice_id, custodian_id, date)
            .map_err(|e| refused("settle_invoice", e))?;

        self.commit(
            next,
            &settlement.changes,
            "invoice_settled",
            "invoice",
            invoice_id,
            json!({
                "custodian_id": custodian_id,
                "transaction_id": settlement.transaction.id,
                "amount": settlement.invoice.amount,
                "new_balance": settlement.new_balance,
            }),
        )?;
        Ok(settlement)
    }

    // ========================================================================
    // TRANSACTIONS
    // ========================================================================

    pub fn add_transaction(&mut self, new: NewTransaction) -> Result<Transaction> {
        self.require(Permission::CreateTransaction)
            .map_err(|e| refused("add_transaction", e))?;

        let mut next = self.ledger.clone();
        let (transaction, changes) = next
            .add_transaction(new)
            .map_err(|e| refused("add_transaction", e))?;

        self.commit(
            next,
            &changes,
            "transaction_created",
            "transaction",
            &transaction.id,
            json!({
                "custodian_id": transaction.custodian_id,
                "type": transaction.transaction_type,
                "amount": transaction.amount,
            }),
        )?;
        Ok(transaction)
    }

    pub fn validate_transaction(&mut self, id: &str, decision: Decision) -> Result<Transaction> {
        self.require(Permission::ValidateTransaction)
            .map_err(|e| refused("validate_transaction", e))?;

        let mut next = self.ledger.clone();
        let (transaction, changes) = next
            .validate_transaction(id, decision)
            .map_err(|e| refused("validate_transaction", e))?;

        let event_type = match decision {
            Decision::Validate => "transaction_validated",
            Decision::Reject => "transaction_rejected",
        };
        self.commit(
            next,
            &changes,
            event_type,
            "transaction",
            id,
            json!({ "custodian_id": transaction.custodian_id, "amount": transaction.amount }),
        )?;
        Ok(transaction)
    }

    pub fn delete_transaction(&mut self, id: &str) -> Result<()> {
        self.require(Permission::DeleteTransaction)
            .map_err(|e| refused("delete_transaction", e))?;

        let mut next = self.ledger.clone();
        let changes = next
            .delete_transaction(id)
            .map_err(|e| refused("delete_transaction", e))?;

        self.commit(next, &changes, "transaction_deleted", "transaction", id, json!({}))
    }

    pub fn transfer(
        &mut self,
        from_id: &str,
        to_id: &str,
        amount: Decimal,
        date: NaiveDate,
    ) -> Result<Transfer> {
        self.require(Permission::Transfer)
            .map_err(|e| refused("transfer", e))?;

        let mut next = self.ledger.clone();
        let transfer = next
            .transfer(from_id, to_id, amount, date)
            .map_err(|e| refused("transfer", e))?;

        self.commit(
            next,
            &transfer.changes,
            "transfer_requested",
            "custodian",
            from_id,
            json!({
                "to": to_id,
                "amount": amount,
                "outgoing": transfer.outgoing.id,
                "incoming": transfer.incoming.id,
            }),
        )?;
        Ok(transfer)
    }

    /// Bulk-add PENDING transactions, skipping rows already recorded.
    /// Every row is checked before anything is added, and the whole import
    /// is stored as one batch.
    pub fn import_transactions(&mut self, rows: Vec<NewTransaction>) -> Result<ImportSummary> {
        self.require(Permission::CreateTransaction)
            .map_err(|e| refused("import_transactions", e))?;

        for row in &rows {
            if row.amount <= Decimal::ZERO {
                return Err(refused(
                    "import_transactions",
                    LedgerError::NonPositiveAmount { amount: row.amount },
                ));
            }
            if self.ledger.custodian(&row.custodian_id).is_none() {
                return Err(refused(
                    "import_transactions",
                    LedgerError::not_found("custodian", &row.custodian_id),
                ));
            }
        }

        let mut seen: HashSet<String> = self
            .ledger
            .transactions()
            .iter()
            .map(|t| t.compute_idempotency_hash())
            .collect();

        let mut summary = ImportSummary::default();
        let mut next = self.ledger.clone();
        let mut changes = Vec::new();
        let mut events = Vec::new();

        for row in rows {
            if !seen.insert(row.idempotency_hash()) {
                summary.duplicates += 1;
                continue;
            }

            let (transaction, mut added) = next
                .add_transaction(row)
                .map_err(|e| refused("import_transactions", e))?;
            changes.append(&mut added);
            events.push(self.event(
                "transaction_imported",
                "transaction",
                &transaction.id,
                json!({ "custodian_id": transaction.custodian_id, "amount": transaction.amount }),
            ));
            summary.inserted += 1;
        }

        self.persist(next, &changes, &events)?;

        tracing::info!(
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            "import finished"
        );
        Ok(summary)
    }

    // ========================================================================
    // CUSTODIANS & USERS
    // ========================================================================

    pub fn add_custodian(&mut self, name: &str) -> Result<Custodian> {
        self.require(Permission::ManageCustodians)
            .map_err(|e| refused("add_custodian", e))?;

        let mut next = self.ledger.clone();
        let (custodian, changes) = next
            .add_custodian(name)
            .map_err(|e| refused("add_custodian", e))?;

        self.commit(
            next,
            &changes,
            "custodian_created",
            "custodian",
            &custodian.id,
            json!({ "name": custodian.name }),
        )?;
        Ok(custodian)
    }

    pub fn delete_custodian(&mut self, id: &str) -> Result<()> {
        self.require(Permission::ManageCustodians)
            .map_err(|e| refused("delete_custodian", e))?;

        let mut next = self.ledger.clone();
        let changes = next
            .delete_custodian(id)
            .map_err(|e| refused("delete_custodian", e))?;

        self.commit(next, &changes, "custodian_deleted", "custodian", id, json!({}))
    }

    pub fn add_user(&mut self, new: NewUser) -> Result<User> {
        self.require(Permission::ManageUsers)
            .map_err(|e| refused("add_user", e))?;

        let mut next = self.ledger.clone();
        let (user, changes) = next
            .add_user(new)
            .map_err(|e| refused("add_user", e))?;

        self.commit(
            next,
            &changes,
            "user_created",
            "user",
            &user.id,
            json!({ "name": user.name, "role": user.role }),
        )?;
        Ok(user)
    }

    /// Accounts are only visible to those who manage them
    pub fn users(&self) -> Result<&[User]> {
        self.require(Permission::ManageUsers)
            .map_err(|e| refused("list_users", e))?;
        Ok(self.ledger.users())
    }

    pub fn delete_user(&mut self, id: &str) -> Result<()> {
        self.require(Permission::ManageUsers)
            .map_err(|e| refused("delete_user", e))?;

        let mut next = self.ledger.clone();
        let changes = next
            .delete_user(id)
            .map_err(|e| refused("delete_user", e))?;

        self.commit(next, &changes, "user_deleted", "user", id, json!({}))
    }

    // ========================================================================
    // REPORTS
    // ========================================================================

    pub fn summary(&self) -> Result<FinancialSummary> {
        self.require(Permission::ViewDashboard)
            .map_err(|e| refused("summary", e))?;

        Ok(FinancialSummary::compute(
            self.ledger.custodians(),
            self.ledger.invoices(),
        )?)
    }

    pub fn brief(&self) -> Result<FinancialBrief> {
        self.require(Permission::ViewDashboard)
            .map_err(|e| refused("brief", e))?;

        Ok(FinancialBrief::build(
            self.ledger.custodians(),
            self.ledger.invoices(),
        )?)
    }

    pub fn reconcile(&self) -> Result<ReconciliationReport> {
        self.require(Permission::ViewDashboard)
            .map_err(|e| refused("reconcile", e))?;

        let report = ReconciliationEngine::new().reconcile(
            self.ledger.custodians(),
            self.ledger.transactions(),
            self.ledger.invoices(),
        )?;
        if !report.is_balanced() {
            tracing::warn!(discrepancies = report.discrepancies.len(), "ledger does not reconcile");
        }
        Ok(report)
    }
}
