// Domain errors for the ledger and its configuration.
//
// Ledger operations either succeed completely or fail with one of these,
// leaving the in-memory state untouched.

use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("amount must be greater than zero (got {amount})")]
    NonPositiveAmount { amount: Decimal },

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("{entity} {id} cannot go from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("invoice {id} is not editable (status {status}, validation {validation})")]
    InvoiceLocked {
        id: String,
        status: String,
        validation: String,
    },

    #[error("custodian {custodian_id} holds {available}, cannot pay {required}")]
    InsufficientFunds {
        custodian_id: String,
        available: Decimal,
        required: Decimal,
    },

    #[error("amount overflow in {context}")]
    Overflow { context: &'static str },

    #[error("cannot transfer from custodian {id} to itself")]
    SelfTransfer { id: String },

    #[error("custodian {id} still has {pending} pending transaction(s)")]
    CustodianInUse { id: String, pending: usize },

    #[error("custodian {id} still holds {balance}; move it out before deleting")]
    CustodianHoldsCash { id: String, balance: Decimal },

    #[error("username already taken: {username}")]
    DuplicateUsername { username: String },

    #[error("cannot remove the last administrator ({id})")]
    LastAdmin { id: String },

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("no user is logged in")]
    NotAuthenticated,

    #[error("role {role} is not allowed to {action}")]
    Forbidden { role: String, action: String },
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: &str) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Sum amounts without rust_decimal's overflow panic
pub fn checked_sum<I>(amounts: I, context: &'static str) -> Result<Decimal, LedgerError>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts.into_iter().try_fold(Decimal::ZERO, |total, amount| {
        total
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { context })
    })
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("database is not configured; run `cashguard setup` first")]
    NotConfigured,

    #[error("invalid configuration or missing credentials: {0}")]
    Invalid(String),

    #[error("unknown backend: {0} (expected `sqlite` or `mock`)")]
    UnknownBackend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = LedgerError::not_found("custodian", "42");
        assert_eq!(err.to_string(), "custodian not found: 42");

        let err = LedgerError::InsufficientFunds {
            custodian_id: "2".to_string(),
            available: Decimal::new(32050, 2),
            required: Decimal::from(1200),
        };
        assert_eq!(err.to_string(), "custodian 2 holds 320.50, cannot pay 1200");

        assert_eq!(
            ConfigError::NotConfigured.to_string(),
            "database is not configured; run `cashguard setup` first"
        );
    }

    #[test]
    fn test_checked_sum() {
        let total = checked_sum([Decimal::from(2), Decimal::new(50, 2)], "test").unwrap();
        assert_eq!(total, Decimal::new(250, 2));

        let err = checked_sum([Decimal::MAX, Decimal::ONE], "total cash").unwrap_err();
        assert_eq!(err, LedgerError::Overflow { context: "total cash" });
    }
}
