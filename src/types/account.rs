//! Account-related types for the settlement ledger
//!
//! This module defines the Account record, the append-only Entry audit row and
//! the EntryGroup marker that ties together every Entry written by one ledger
//! operation.

use super::transfer::TransferId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name of the reserved escrow account every debit and credit leg is routed through
pub const HOLD_ACCOUNT: &str = "hold";

/// Ledger account state
///
/// Accounts are keyed by their unique name. The balance is a signed decimal;
/// it must only ever be mutated by the balance ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account name
    pub name: String,

    /// Current balance
    pub balance: Decimal,
}

impl Account {
    /// Create an account with the given opening balance
    pub fn new(name: impl Into<String>, balance: Decimal) -> Self {
        Account {
            name: name.into(),
            balance,
        }
    }

    /// Whether this is the reserved escrow account
    pub fn is_hold(&self) -> bool {
        self.name == HOLD_ACCOUNT
    }
}

/// Identifier shared by every Entry produced by one ledger operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryGroupId(pub Uuid);

impl EntryGroupId {
    /// Generate a fresh random group id
    pub fn new() -> Self {
        EntryGroupId(Uuid::new_v4())
    }
}

impl Default for EntryGroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Audit marker for one ledger operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryGroup {
    pub id: EntryGroupId,
}

/// Immutable audit record of one balance mutation
///
/// One Entry is written per account touched by an `apply_debits`,
/// `apply_credits` or `revert_debits` call, the hold account included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Name of the mutated account
    pub account: String,

    /// Balance snapshot taken after the mutation
    pub balance: Decimal,

    /// Group shared with every other Entry of the same call
    pub entry_group: EntryGroupId,

    /// Transfer that caused the mutation
    pub transfer_id: TransferId,

    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account() {
        let account = Account::new("alice", Decimal::new(10000, 2));

        assert_eq!(account.name, "alice");
        assert_eq!(account.balance, Decimal::new(100, 0));
        assert!(!account.is_hold());
    }

    #[test]
    fn test_hold_account_is_recognised() {
        assert!(Account::new(HOLD_ACCOUNT, Decimal::ZERO).is_hold());
    }

    #[test]
    fn test_entry_group_ids_are_unique() {
        assert_ne!(EntryGroupId::new(), EntryGroupId::new());
    }
}
