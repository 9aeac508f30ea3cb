// Entity Models
//
// Users operate the ledger; custodians hold cash; invoices are what we owe
// or are owed; transactions move cash on a single custodian.

pub mod user;
pub mod custodian;
pub mod invoice;
pub mod transaction;

pub use user::{NewUser, Permission, Role, User, View};
pub use custodian::Custodian;
pub use invoice::{Invoice, InvoiceDraft, InvoiceStatus, InvoiceType, ValidationStatus};
pub use transaction::{
    idempotency_hash, Decision, NewTransaction, Transaction, TransactionStatus, TransactionType,
};
