// 🗄️ Persistence - where ledger changes are written through
//
// Two stores implement the same trait:
//   MockDatabase   - logs the SQL it would run, serves the built-in data
//   SqliteDatabase - the same four tables on SQLite, plus the events table

use crate::config::DbConfig;
use crate::entities::{Custodian, Invoice, Transaction, TransactionStatus, User};
use crate::fixtures;
use crate::ledger::LedgerChange;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

// ============================================================================
// SNAPSHOT & EVENTS
// ============================================================================

/// Everything a ledger needs to start
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub users: Vec<User>,
    pub custodians: Vec<Custodian>,
    pub invoices: Vec<Invoice>,
    pub transactions: Vec<Transaction>,
}

/// Event for audit trail - every applied operation leaves one
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// PERSISTENCE TRAIT
// ============================================================================

pub trait Persistence: Send {
    /// Prepare the store (schema + starting data)
    fn initialize(&mut self, config: &DbConfig) -> Result<()>;

    fn load(&mut self) -> Result<LedgerSnapshot>;

    fn save_user(&mut self, user: &User) -> Result<()>;
    fn delete_user(&mut self, id: &str) -> Result<()>;

    fn save_custodian(&mut self, custodian: &Custodian) -> Result<()>;
    fn delete_custodian(&mut self, id: &str) -> Result<()>;
    fn update_custodian_balance(&mut self, id: &str, balance: Decimal) -> Result<()>;

    fn save_invoice(&mut self, invoice: &Invoice) -> Result<()>;
    fn delete_invoice(&mut self, id: &str) -> Result<()>;

    fn save_transaction(&mut self, transaction: &Transaction) -> Result<()>;
    fn update_transaction_status(&mut self, id: &str, status: TransactionStatus) -> Result<()>;
    fn delete_transaction(&mut self, id: &str) -> Result<()>;

    fn insert_event(&mut self, event: &Event) -> Result<()>;
    fn events_for_entity(&mut self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>>;

    /// Write one ledger change through
    fn apply(&mut self, change: &LedgerChange) -> Result<()> {
        match change {
            LedgerChange::UserAdded(user) => self.save_user(user),
            LedgerChange::UserRemoved { id } => self.delete_user(id),
            LedgerChange::CustodianAdded(custodian) => self.save_custodian(custodian),
            LedgerChange::CustodianRemoved { id } => self.delete_custodian(id),
            LedgerChange::BalanceUpdated {
                custodian_id,
                balance,
            } => self.update_custodian_balance(custodian_id, *balance),
            LedgerChange::InvoiceSaved(invoice) => self.save_invoice(invoice),
            LedgerChange::InvoiceRemoved { id } => self.delete_invoice(id),
            LedgerChange::TransactionSaved(transaction) => self.save_transaction(transaction),
            LedgerChange::TransactionStatusChanged { id, status } => {
                self.update_transaction_status(id, *status)
            }
            LedgerChange::TransactionRemoved { id } => self.delete_transaction(id),
        }
    }

    /// Write one operation's changes and audit events. Stores that can
    /// should make this all-or-nothing.
    fn write_batch(&mut self, changes: &[LedgerChange], events: &[Event]) -> Result<()> {
        for change in changes {
            self.apply(change)?;
        }
        for event in events {
            self.insert_event(event)?;
        }
        Ok(())
    }
}

impl<T: Persistence + ?Sized> Persistence for Box<T> {
    fn initialize(&mut self, config: &DbConfig) -> Result<()> {
        (**self).initialize(config)
    }

    fn load(&mut self) -> Result<LedgerSnapshot> {
        (**self).load()
    }

    fn save_user(&mut self, user: &User) -> Result<()> {
        (**self).save_user(user)
    }

    fn delete_user(&mut self, id: &str) -> Result<()> {
        (**self).delete_user(id)
    }

    fn save_custodian(&mut self, custodian: &Custodian) -> Result<()> {
        (**self).save_custodian(custodian)
    }

    fn delete_custodian(&mut self, id: &str) -> Result<()> {
        (**self).delete_custodian(id)
    }

    fn update_custodian_balance(&mut self, id: &str, balance: Decimal) -> Result<()> {
        (**self).update_custodian_balance(id, balance)
    }

    fn save_invoice(&mut self, invoice: &Invoice) -> Result<()> {
        (**self).save_invoice(invoice)
    }

    fn delete_invoice(&mut self, id: &str) -> Result<()> {
        (**self).delete_invoice(id)
    }

    fn save_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        (**self).save_transaction(transaction)
    }

    fn update_transaction_status(&mut self, id: &str, status: TransactionStatus) -> Result<()> {
        (**self).update_transaction_status(id, status)
    }

    fn delete_transaction(&mut self, id: &str) -> Result<()> {
        (**self).delete_transaction(id)
    }

    fn insert_event(&mut self, event: &Event) -> Result<()> {
        (**self).insert_event(event)
    }

    fn events_for_entity(&mut self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        (**self).events_for_entity(entity_type, entity_id)
    }

    fn write_batch(&mut self, changes: &[LedgerChange], events: &[Event]) -> Result<()> {
        (**self).write_batch(changes, events)
    }
}

// ============================================================================
// SQL SERVER CREATION SCRIPT
// ============================================================================

const CREATION_SCRIPT: &str = "\
IF NOT EXISTS (SELECT * FROM sys.databases WHERE name = '@DB_NAME')
BEGIN
    CREATE DATABASE [@DB_NAME];
END;

USE [@DB_NAME];

IF NOT EXISTS (SELECT * FROM sysobjects WHERE name='Users' and xtype='U')
CREATE TABLE Users (
    Id NVARCHAR(50) PRIMARY KEY,
    Name NVARCHAR(100),
    Role NVARCHAR(20),
    Username NVARCHAR(50),
    Password NVARCHAR(50)
);

IF NOT EXISTS (SELECT * FROM sysobjects WHERE name='Custodians' and xtype='U')
CREATE TABLE Custodians (
    Id NVARCHAR(50) PRIMARY KEY,
    Name NVARCHAR(100),
    Balance DECIMAL(18, 2),
    OpeningBalance DECIMAL(18, 2)
);

IF NOT EXISTS (SELECT * FROM sysobjects WHERE name='Invoices' and xtype='U')
CREATE TABLE Invoices (
    Id NVARCHAR(50) PRIMARY KEY,
    EntityName NVARCHAR(100),
    Description NVARCHAR(255),
    Amount DECIMAL(18, 2),
    DueDate DATE,
    Type NVARCHAR(20),
    Status NVARCHAR(20),
    ValidationStatus NVARCHAR(20)
);

IF NOT EXISTS (SELECT * FROM sysobjects WHERE name='Transactions' and xtype='U')
CREATE TABLE Transactions (
    Id NVARCHAR(50) PRIMARY KEY,
    Date DATETIME,
    Amount DECIMAL(18, 2),
    Type NVARCHAR(20),
    CustodianId NVARCHAR(50) FOREIGN KEY REFERENCES Custodians(Id),
    Description NVARCHAR(255),
    Status NVARCHAR(20),
    RelatedInvoiceId NVARCHAR(50) NULL
);
";

/// T-SQL that creates the database and its tables on SQL Server
pub fn creation_script(database: &str) -> String {
    CREATION_SCRIPT.replace("@DB_NAME", database)
}

/// Escape a value for a single-quoted SQL literal
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

// ============================================================================
// MOCK DATABASE
// ============================================================================

/// Logs every statement instead of running it
#[derive(Debug, Default)]
pub struct MockDatabase {
    executed: Vec<String>,
    events: Vec<Event>,

    /// Statements starting with this fail, like a dropped connection
    fail_on: Option<String>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn failing_on(prefix: &str) -> Self {
        Self {
            fail_on: Some(prefix.to_string()),
            ..Self::default()
        }
    }

    /// Statements "executed" so far, oldest first
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    fn exec(&mut self, sql: String) -> Result<()> {
        if let Some(prefix) = &self.fail_on {
            if sql.starts_with(prefix.as_str()) {
                anyhow::bail!("[SQL EXEC] failed: {}", sql);
            }
        }
        tracing::debug!("[SQL EXEC] {}", sql);
        self.executed.push(sql);
        Ok(())
    }
}

impl Persistence for MockDatabase {
    fn initialize(&mut self, config: &DbConfig) -> Result<()> {
        tracing::info!(database = %config.database, "running SQL Server creation script");
        for line in creation_script(&config.database).lines() {
            tracing::debug!("{}", line);
        }
        tracing::info!("tables created");

        tracing::info!("seeding {} users", fixtures::users().len());
        tracing::info!("seeding {} custodians", fixtures::custodians().len());
        Ok(())
    }

    fn load(&mut self) -> Result<LedgerSnapshot> {
        Ok(fixtures::snapshot())
    }

    fn save_user(&mut self, user: &User) -> Result<()> {
        self.exec(format!(
            "INSERT INTO Users VALUES ({}, {}, {}, ...)",
            quote(&user.id),
            quote(&user.name),
            quote(user.role.as_str())
        ))
    }

    fn delete_user(&mut self, id: &str) -> Result<()> {
        self.exec(format!("DELETE FROM Users WHERE Id = {}", quote(id)))
    }

    fn save_custodian(&mut self, custodian: &Custodian) -> Result<()> {
        self.exec(format!(
            "INSERT INTO Custodians VALUES ({}, {}, {})",
            quote(&custodian.id),
            quote(&custodian.name),
            custodian.balance
        ))
    }

    fn delete_custodian(&mut self, id: &str) -> Result<()> {
        self.exec(format!("DELETE FROM Custodians WHERE Id = {}", quote(id)))
    }

    fn update_custodian_balance(&mut self, id: &str, balance: Decimal) -> Result<()> {
        self.exec(format!(
            "UPDATE Custodians SET Balance = {} WHERE Id = {}",
            balance,
            quote(id)
        ))
    }

    fn save_invoice(&mut self, invoice: &Invoice) -> Result<()> {
        self.exec(format!(
            "INSERT INTO Invoices VALUES ({}, {}, ...)",
            quote(&invoice.id),
            quote(&invoice.entity_name)
        ))
    }

    fn delete_invoice(&mut self, id: &str) -> Result<()> {
        self.exec(format!("DELETE FROM Invoices WHERE Id = {}", quote(id)))
    }

    fn save_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.exec(format!(
            "INSERT INTO Transactions VALUES ({}, '{}', {}, ...)",
            quote(&transaction.id),
            transaction.date,
            transaction.amount
        ))
    }

    fn update_transaction_status(&mut self, id: &str, status: TransactionStatus) -> Result<()> {
        self.exec(format!(
            "UPDATE Transactions SET Status = '{}' WHERE Id = {}",
            status,
            quote(id)
        ))
    }

    fn delete_transaction(&mut self, id: &str) -> Result<()> {
        self.exec(format!("DELETE FROM Transactions WHERE Id = {}", quote(id)))
    }

    fn insert_event(&mut self, event: &Event) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }

    /// A failed batch leaves neither statements nor events behind
    fn write_batch(&mut self, changes: &[LedgerChange], events: &[Event]) -> Result<()> {
        let (statements, logged) = (self.executed.len(), self.events.len());

        let written = changes
            .iter()
            .try_for_each(|change| self.apply(change))
            .and_then(|()| events.iter().try_for_each(|event| self.insert_event(event)));

        if written.is_err() {
            tracing::debug!("[SQL EXEC] ROLLBACK");
            self.executed.truncate(statements);
            self.events.truncate(logged);
        }
        written
    }

    fn events_for_entity(&mut self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .events
            .iter()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect();
        events.reverse();
        Ok(events)
    }
}

// ============================================================================
// SQLITE DATABASE
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            username TEXT UNIQUE,
            password TEXT
        )",
        [],
    )?;

    // Amounts are TEXT so decimals survive exactly
    conn.execute(
        "CREATE TABLE IF NOT EXISTS custodians (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            balance TEXT NOT NULL,
            opening_balance TEXT NOT NULL DEFAULT '0'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS invoices (
            id TEXT PRIMARY KEY,
            entity_name TEXT NOT NULL,
            description TEXT NOT NULL,
            amount TEXT NOT NULL,
            due_date TEXT NOT NULL,
            type TEXT NOT NULL,
            status TEXT NOT NULL,
            validation_status TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            amount TEXT NOT NULL,
            type TEXT NOT NULL,
            custodian_id TEXT NOT NULL,
            description TEXT NOT NULL,
            status TEXT NOT NULL,
            related_invoice_id TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_custodian ON transactions(custodian_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_invoice ON transactions(related_invoice_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// Read a TEXT column through FromStr (decimals, enums)
fn parsed<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
                    })?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// The relational store on SQLite
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    fn is_empty(&self) -> Result<bool> {
        let users: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let custodians: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM custodians", [], |row| row.get(0))?;
        Ok(users == 0 && custodians == 0)
    }

    /// Write the starting data. Lists that show newest first are inserted
    /// oldest first so that load() returns them in the same order.
    fn seed(&mut self) -> Result<()> {
        let snapshot = fixtures::snapshot();

        for user in &snapshot.users {
            self.save_user(user)?;
        }
        for custodian in &snapshot.custodians {
            self.save_custodian(custodian)?;
        }
        for invoice in snapshot.invoices.iter().rev() {
            self.save_invoice(invoice)?;
        }
        for transaction in snapshot.transactions.iter().rev() {
            self.save_transaction(transaction)?;
        }

        tracing::info!(
            users = snapshot.users.len(),
            custodians = snapshot.custodians.len(),
            invoices = snapshot.invoices.len(),
            transactions = snapshot.transactions.len(),
            "seeded starting data"
        );
        Ok(())
    }

    fn load_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, role, username, password FROM users ORDER BY rowid")?;

        let users = stmt
            .query_map([], |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    role: parsed(row, 2)?,
                    username: row.get(3)?,
                    password: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(users)
    }

    fn load_custodians(&self) -> Result<Vec<Custodian>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, balance, opening_balance FROM custodians ORDER BY rowid",
        )?;

        let custodians = stmt
            .query_map([], |row| {
                Ok(Custodian {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    balance: parsed(row, 2)?,
                    opening_balance: parsed(row, 3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(custodians)
    }

    fn load_invoices(&self) -> Result<Vec<Invoice>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_name, description, amount, due_date, type, status, validation_status
             FROM invoices
             ORDER BY rowid DESC",
        )?;

        let invoices = stmt
            .query_map([], |row| {
                Ok(Invoice {
                    id: row.get(0)?,
                    entity_name: row.get(1)?,
                    description: row.get(2)?,
                    amount: parsed(row, 3)?,
                    due_date: row.get(4)?,
                    invoice_type: parsed(row, 5)?,
                    status: parsed(row, 6)?,
                    validation_status: parsed(row, 7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(invoices)
    }

    fn load_transactions(&self) -> Result<Vec<Transaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, date, amount, type, custodian_id, description, status, related_invoice_id
             FROM transactions
             ORDER BY rowid DESC",
        )?;

        let transactions = stmt
            .query_map([], |row| {
                Ok(Transaction {
                    id: row.get(0)?,
                    date: row.get(1)?,
                    amount: parsed(row, 2)?,
                    transaction_type: parsed(row, 3)?,
                    custodian_id: row.get(4)?,
                    description: row.get(5)?,
                    status: parsed(row, 6)?,
                    related_invoice_id: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    pub fn transaction_status(&self, id: &str) -> Result<Option<TransactionStatus>> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM transactions WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;

        status
            .map(|s| s.parse::<TransactionStatus>().map_err(anyhow::Error::from))
            .transpose()
    }
}

impl Persistence for SqliteDatabase {
    fn initialize(&mut self, config: &DbConfig) -> Result<()> {
        setup_database(&self.conn).context("Failed to create schema")?;
        tracing::info!(database = %config.database, "schema ready");

        if self.is_empty()? {
            self.seed()?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<LedgerSnapshot> {
        Ok(LedgerSnapshot {
            users: self.load_users()?,
            custodians: self.load_custodians()?,
            invoices: self.load_invoices()?,
            transactions: self.load_transactions()?,
        })
    }

    fn save_user(&mut self, user: &User) -> Result<()> {
        self.conn.execute(
            "INSERT INTO users (id, name, role, username, password)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                role = excluded.role,
                username = excluded.username,
                password = excluded.password",
            params![
                user.id,
                user.name,
                user.role.as_str(),
                user.username,
                user.password
            ],
        )?;
        Ok(())
    }

    fn delete_user(&mut self, id: &str) -> Result<()> {
        self.conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
        Ok(())
    }

    fn save_custodian(&mut self, custodian: &Custodian) -> Result<()> {
        self.conn.execute(
            "INSERT INTO custodians (id, name, balance, opening_balance)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                balance = excluded.balance,
                opening_balance = excluded.opening_balance",
            params![
                custodian.id,
                custodian.name,
                custodian.balance.to_string(),
                custodian.opening_balance.to_string()
            ],
        )?;
        Ok(())
    }

    fn delete_custodian(&mut self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM custodians WHERE id = ?1", [id])?;
        Ok(())
    }

    fn update_custodian_balance(&mut self, id: &str, balance: Decimal) -> Result<()> {
        tracing::debug!("[SQL EXEC] UPDATE custodians SET balance = {} WHERE id = '{}'", balance, id);
        let updated = self.conn.execute(
            "UPDATE custodians SET balance = ?1 WHERE id = ?2",
            params![balance.to_string(), id],
        )?;
        if updated == 0 {
            anyhow::bail!("custodian {} is not stored", id);
        }
        Ok(())
    }

    fn save_invoice(&mut self, invoice: &Invoice) -> Result<()> {
        tracing::debug!("[SQL EXEC] INSERT INTO invoices ('{}', '{}', ...)", invoice.id, invoice.entity_name);
        self.conn.execute(
            "INSERT INTO invoices (
                id, entity_name, description, amount, due_date, type, status, validation_status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                entity_name = excluded.entity_name,
                description = excluded.description,
                amount = excluded.amount,
                due_date = excluded.due_date,
                type = excluded.type,
                status = excluded.status,
                validation_status = excluded.validation_status",
            params![
                invoice.id,
                invoice.entity_name,
                invoice.description,
                invoice.amount.to_string(),
                invoice.due_date,
                invoice.invoice_type.as_str(),
                invoice.status.as_str(),
                invoice.validation_status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn delete_invoice(&mut self, id: &str) -> Result<()> {
        self.conn.execute("DELETE FROM invoices WHERE id = ?1", [id])?;
        Ok(())
    }

    fn save_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        tracing::debug!(
            "[SQL EXEC] INSERT INTO transactions ('{}', '{}', {}, ...)",
            transaction.id,
            transaction.date,
            transaction.amount
        );
        self.conn.execute(
            "INSERT INTO transactions (
                id, date, amount, type, custodian_id, description, status, related_invoice_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                date = excluded.date,
                amount = excluded.amount,
                type = excluded.type,
                custodian_id = excluded.custodian_id,
                description = excluded.description,
                status = excluded.status,
                related_invoice_id = excluded.related_invoice_id",
            params![
                transaction.id,
                transaction.date,
                transaction.amount.to_string(),
                transaction.transaction_type.as_str(),
                transaction.custodian_id,
                transaction.description,
                transaction.status.as_str(),
                transaction.related_invoice_id,
            ],
        )?;
        Ok(())
    }

    fn update_transaction_status(&mut self, id: &str, status: TransactionStatus) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE transactions SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if updated == 0 {
            anyhow::bail!("transaction {} is not stored", id);
        }
        Ok(())
    }

    fn delete_transaction(&mut self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM transactions WHERE id = ?1", [id])?;
        Ok(())
    }

    fn insert_event(&mut self, event: &Event) -> Result<()> {
        insert_event(&self.conn, event)
    }

    fn events_for_entity(&mut self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        get_events_for_entity(&self.conn, entity_type, entity_id)
    }

    /// One SQLite transaction per ledger operation
    fn write_batch(&mut self, changes: &[LedgerChange], events: &[Event]) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;

        let written = changes
            .iter()
            .try_for_each(|change| self.apply(change))
            .and_then(|()| events.iter().try_for_each(|event| self.insert_event(event)));

        match written {
            Ok(()) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(())
            }
            Err(err) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    tracing::error!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use chrono::NaiveDate;

    fn test_config() -> DbConfig {
        DbConfig {
            server: "localhost".to_string(),
            database: "CashGuardDB".to_string(),
            user: String::new(),
            password: String::new(),
            integrated_security: true,
        }
    }

    fn count(db: &SqliteDatabase, table: &str) -> i64 {
        db.conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .unwrap()
    }

    fn create_test_database() -> SqliteDatabase {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        db.initialize(&test_config()).unwrap();
        db
    }

    #[test]
    fn test_creation_script_substitutes_name() {
        let script = creation_script("Caja2024");

        assert!(script.contains("CREATE DATABASE [Caja2024];"));
        assert!(script.contains("USE [Caja2024];"));
        assert!(!script.contains("@DB_NAME"));
        assert!(script.contains("CREATE TABLE Transactions"));
    }

    #[test]
    fn test_mock_logs_statements() {
        let mut db = MockDatabase::new();
        db.initialize(&test_config()).unwrap();

        db.update_custodian_balance("1", Decimal::new(150050, 2)).unwrap();
        db.delete_invoice("O'Brien").unwrap();

        assert_eq!(db.executed().len(), 2);
        assert_eq!(
            db.executed()[0],
            "UPDATE Custodians SET Balance = 1500.50 WHERE Id = '1'"
        );
        assert_eq!(db.executed()[1], "DELETE FROM Invoices WHERE Id = 'O''Brien'");

        println!("✅ Mock SQL log test PASSED");
    }

    #[test]
    fn test_mock_load_returns_starting_data() {
        let mut db = MockDatabase::new();
        assert_eq!(db.load().unwrap(), fixtures::snapshot());
    }

    #[test]
    fn test_sqlite_seeds_once() {
        let mut db = create_test_database();

        // A second initialize must not duplicate the seed
        db.initialize(&test_config()).unwrap();

        assert_eq!(count(&db, "users"), 3);
        assert_eq!(count(&db, "custodians"), 3);
        assert_eq!(count(&db, "invoices"), 5);
        assert_eq!(count(&db, "transactions"), 4);

        println!("✅ Seed idempotency test PASSED");
    }

    #[test]
    fn test_sqlite_load_matches_seed() {
        let mut db = create_test_database();

        // Same values and same order, decimals exact
        assert_eq!(db.load().unwrap(), fixtures::snapshot());
    }

    #[test]
    fn test_sqlite_applies_ledger_changes() {
        let mut db = create_test_database();
        let mut ledger = Ledger::from_snapshot(db.load().unwrap());

        let date = NaiveDate::from_ymd_opt(2023, 11, 3).unwrap();
        let settlement = ledger.settle_invoice("105", "3", date).unwrap();
        for change in &settlement.changes {
            db.apply(change).unwrap();
        }

        let (_, changes) = ledger
            .validate_transaction("t2", crate::entities::Decision::Reject)
            .unwrap();
        for change in &changes {
            db.apply(change).unwrap();
        }

        // Store and memory agree after write-through
        let reloaded = db.load().unwrap();
        assert_eq!(reloaded, ledger.snapshot());
        assert_eq!(
            db.transaction_status("t2").unwrap(),
            Some(TransactionStatus::Rejected)
        );

        println!("✅ Write-through test PASSED");
    }

    #[test]
    fn test_sqlite_batch_rolls_back_on_failure() {
        let mut db = create_test_database();
        let mut ledger = Ledger::from_snapshot(db.load().unwrap());

        let date = NaiveDate::from_ymd_opt(2023, 11, 3).unwrap();
        let mut changes = ledger.settle_invoice("105", "3", date).unwrap().changes;
        // A balance row that is not stored fails the batch after the invoice write
        changes.push(LedgerChange::BalanceUpdated {
            custodian_id: "ghost".to_string(),
            balance: Decimal::ONE,
        });
        let event = Event::new("invoice_settled", "invoice", "105", serde_json::json!({}), "admin");

        assert!(db.write_batch(&changes, &[event.clone()]).is_err());

        assert_eq!(db.load().unwrap(), fixtures::snapshot());
        assert!(db.events_for_entity("invoice", "105").unwrap().is_empty());

        // The connection is usable again afterwards
        changes.pop();
        db.write_batch(&changes, &[event]).unwrap();
        assert_eq!(db.load().unwrap(), ledger.snapshot());
        assert_eq!(count(&db, "events"), 1);

        println!("✅ Batch rollback test PASSED");
    }

    #[test]
    fn test_mock_batch_rolls_back_on_failure() {
        let mut db = MockDatabase::failing_on("UPDATE Custodians");
        let changes = vec![
            LedgerChange::InvoiceRemoved { id: "102".to_string() },
            LedgerChange::BalanceUpdated {
                custodian_id: "1".to_string(),
                balance: Decimal::ONE,
            },
        ];
        let event = Event::new("invoice_settled", "invoice", "102", serde_json::json!({}), "admin");

        assert!(db.write_batch(&changes, &[event.clone()]).is_err());
        assert!(db.executed().is_empty());
        assert!(db.events_for_entity("invoice", "102").unwrap().is_empty());

        db.write_batch(&changes[..1], &[event]).unwrap();
        assert_eq!(db.executed(), ["DELETE FROM Invoices WHERE Id = '102'"]);
    }

    #[test]
    fn test_update_missing_rows_fails() {
        let mut db = create_test_database();

        assert!(db.update_custodian_balance("nope", Decimal::ONE).is_err());
        assert!(db
            .update_transaction_status("nope", TransactionStatus::Validated)
            .is_err());
    }

    #[test]
    fn test_event_log() {
        let mut db = create_test_database();

        let event = Event::new(
            "invoice_settled",
            "invoice",
            "105",
            serde_json::json!({"custodian_id": "3"}),
            "admin",
        );

        db.insert_event(&event).unwrap();

        let events = db.events_for_entity("invoice", "105").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "invoice_settled");
        assert_eq!(events[0].actor, "admin");
        assert_eq!(events[0].data["custodian_id"], "3");

        println!("✅ Event log test PASSED");
    }

    #[test]
    fn test_mock_event_log_newest_first() {
        let mut db = MockDatabase::new();

        for kind in ["created", "validated"] {
            db.insert_event(&Event::new(kind, "invoice", "7", serde_json::json!({}), "admin"))
                .unwrap();
        }

        let events = db.events_for_entity("invoice", "7").unwrap();
        assert_eq!(events[0].event_type, "validated");
        assert_eq!(events[1].event_type, "created");
    }
}
