// 💵 Custodian Entity - a person or till holding cash
//
// The balance only moves through the ledger (settlement, validated
// transactions). opening_balance is the balance the ledger started from and
// anchors reconciliation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Custodian {
    pub id: String,
    pub name: String,

    /// Cash currently on hand (may go negative)
    pub balance: Decimal,

    /// Balance when the custodian entered the ledger
    #[serde(default)]
    pub opening_balance: Decimal,
}

impl Custodian {
    /// New custodians always start empty
    pub fn new(name: String) -> Self {
        Custodian {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            balance: Decimal::ZERO,
            opening_balance: Decimal::ZERO,
        }
    }

    /// Custodian carried over with an existing balance
    pub fn with_opening_balance(id: &str, name: &str, opening: Decimal, balance: Decimal) -> Self {
        Custodian {
            id: id.to_string(),
            name: name.to_string(),
            balance,
            opening_balance: opening,
        }
    }

    pub fn can_cover(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }

    pub fn is_overdrawn(&self) -> bool {
        self.balance < Decimal::ZERO
    }

    /// Net movement since the ledger started; None on overflow
    pub fn balance_change(&self) -> Option<Decimal> {
        self.balance.checked_sub(self.opening_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_custodian_starts_at_zero() {
        let custodian = Custodian::new("Caja Chica".to_string());

        assert_eq!(custodian.balance, Decimal::ZERO);
        assert_eq!(custodian.opening_balance, Decimal::ZERO);
        assert_eq!(custodian.id.len(), 36);
    }

    #[test]
    fn test_balance_checks() {
        let mut custodian =
            Custodian::with_opening_balance("2", "Carlos", Decimal::ZERO, Decimal::new(32050, 2));

        assert!(custodian.can_cover(Decimal::from(320)));
        assert!(!custodian.can_cover(Decimal::from(321)));
        assert_eq!(custodian.balance_change(), Some(Decimal::new(32050, 2)));

        custodian.balance = Decimal::from(-5);
        assert!(custodian.is_overdrawn());
    }
}
