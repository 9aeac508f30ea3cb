// CashGuard - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod entities;
pub mod fixtures;
pub mod ledger;
pub mod db;
pub mod config;
pub mod reporting;
pub mod reconciliation;
pub mod import;
pub mod app;

// Re-export commonly used types
pub use error::{ConfigError, LedgerError};
pub use entities::{
    Custodian, Decision, Invoice, InvoiceDraft, InvoiceStatus, InvoiceType, NewTransaction,
    NewUser, Permission, Role, Transaction, TransactionStatus, TransactionType, User,
    ValidationStatus, View,
};
pub use ledger::{Ledger, LedgerChange, Settlement, Transfer};
pub use db::{
    creation_script, Event, LedgerSnapshot, MockDatabase, Persistence, SqliteDatabase,
};
pub use config::{Backend, ConfigStore, DbConfig, Settings};
pub use reporting::{
    cash_flow, custodian_history, invoices_in_tab, tab_counts, CashFlowPoint, DateRange,
    FinancialBrief, FinancialSummary, InvoiceTab, TabCounts, TransactionFilter,
};
pub use reconciliation::{
    Discrepancy, DiscrepancyCategory, ReconciliationEngine, ReconciliationReport,
    ReconciliationResult,
};
pub use import::{load_csv, ImportSummary};
pub use app::{today, CashGuard};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
