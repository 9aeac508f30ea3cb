// 👤 User Entity - who is operating the ledger, and what their role allows

use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Full access, including user management
    Admin,

    /// Validates invoices and pending transactions
    Accountant,

    /// Records transactions and settles invoices
    Operator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Accountant => "ACCOUNTANT",
            Role::Operator => "OPERATOR",
        }
    }

    /// Check whether this role may perform an action
    pub fn can(&self, permission: Permission) -> bool {
        use Permission::*;

        match permission {
            ViewDashboard => *self != Role::Operator,
            ManageUsers => *self == Role::Admin,
            CreateTransaction => *self != Role::Accountant,
            ValidateTransaction | ValidateInvoice => {
                matches!(self, Role::Admin | Role::Accountant)
            }
            SettleInvoice => matches!(self, Role::Admin | Role::Operator),
            DeleteTransaction | EditInvoice | Transfer | ManageCustodians => true,
        }
    }

    /// First view shown after login
    pub fn landing_view(&self) -> View {
        match self {
            Role::Operator => View::Transactions,
            _ => View::Dashboard,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "ACCOUNTANT" => Ok(Role::Accountant),
            "OPERATOR" => Ok(Role::Operator),
            _ => Err(LedgerError::InvalidValue {
                field: "role",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// PERMISSIONS & VIEWS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ViewDashboard,
    ManageUsers,
    CreateTransaction,
    ValidateTransaction,
    DeleteTransaction,
    EditInvoice,
    ValidateInvoice,
    SettleInvoice,
    Transfer,
    ManageCustodians,
}

impl Permission {
    pub fn describe(&self) -> &'static str {
        match self {
            Permission::ViewDashboard => "view the dashboard",
            Permission::ManageUsers => "manage users",
            Permission::CreateTransaction => "create transactions",
            Permission::ValidateTransaction => "validate transactions",
            Permission::DeleteTransaction => "delete transactions",
            Permission::EditInvoice => "edit invoices",
            Permission::ValidateInvoice => "validate invoices",
            Permission::SettleInvoice => "settle invoices",
            Permission::Transfer => "transfer between custodians",
            Permission::ManageCustodians => "manage custodians",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum View {
    Dashboard,
    Custodians,
    Accounts,
    Transactions,
    Users,
}

// ============================================================================
// USER ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub role: Role,

    /// Users created without credentials cannot log in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Plaintext, compared as-is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl User {
    pub fn new(name: String, role: Role) -> Self {
        User {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            role,
            username: None,
            password: None,
        }
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.role.can(permission)
    }

    /// Plaintext credential check
    pub fn matches_credentials(&self, username: &str, password: &str) -> bool {
        self.username.as_deref() == Some(username) && self.password.as_deref() == Some(password)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Input for registering a user
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}
