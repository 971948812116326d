//! Error types for the settlement ledger
//!
//! This module defines the errors that can occur while posting balances and
//! while delivering notifications.
//!
//! # Error Categories
//!
//! - **Ledger Errors**: unknown accounts, insufficient funds, a missing hold
//!   account, store failures. These abort the transfer posting.
//! - **Delivery Errors**: transport failures while POSTing a notification.
//!   These never reach the transfer-posting caller; the notification is
//!   rescheduled instead.
//! - **Notification Errors**: notification store failures and dangling
//!   references met while processing the queue.

use rust_decimal::Decimal;
use thiserror::Error;

use super::notification::{NotificationId, SubscriptionId};
use super::transfer::TransferId;

/// Error type for balance ledger operations
///
/// Each variant carries enough context for the caller to branch on the
/// failure kind without inspecting messages.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// A debit or credit leg references an account that does not exist
    ///
    /// Raised during setup, before any mutation.
    #[error("Account `{account}` does not exist")]
    UnknownAccount {
        /// The missing account name
        account: String,
    },

    /// A sender's balance is below the total it is asked to send
    ///
    /// No mutation of the failing call is applied.
    #[error("Sender `{account}` has insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Sender account name
        account: String,
        /// Balance at the time of the check
        balance: Decimal,
        /// Aggregate amount of the account's debit legs
        requested: Decimal,
    },

    /// The reserved `hold` account is absent
    ///
    /// This is a fatal configuration error, not a user-facing failure.
    #[error("Missing \"hold\" account")]
    MissingHoldAccount,

    /// A leg amount is negative
    #[error("Invalid amount {amount} for account `{account}`")]
    InvalidAmount {
        /// Account of the offending leg
        account: String,
        /// The rejected amount
        amount: Decimal,
    },

    /// Debit and credit totals of a transfer differ
    #[error("Transfer {transfer} is unbalanced: debits {debits}, credits {credits}")]
    UnbalancedTransfer {
        transfer: TransferId,
        debits: Decimal,
        credits: Decimal,
    },

    /// Decimal arithmetic would overflow
    #[error("Arithmetic overflow in {operation} for account `{account}`")]
    ArithmeticOverflow {
        /// Operation that would overflow
        operation: String,
        /// Account being updated
        account: String,
    },

    /// The ledger store failed
    #[error("Ledger store error: {message}")]
    Store {
        /// Description of the store failure
        message: String,
    },
}

impl LedgerError {
    /// Create an UnknownAccount error
    pub fn unknown_account(account: &str) -> Self {
        LedgerError::UnknownAccount {
            account: account.to_string(),
        }
    }

    /// Create an InsufficientFunds error
    pub fn insufficient_funds(account: &str, balance: Decimal, requested: Decimal) -> Self {
        LedgerError::InsufficientFunds {
            account: account.to_string(),
            balance,
            requested,
        }
    }

    /// Create an InvalidAmount error
    pub fn invalid_amount(account: &str, amount: Decimal) -> Self {
        LedgerError::InvalidAmount {
            account: account.to_string(),
            amount,
        }
    }

    /// Create an ArithmeticOverflow error
    pub fn arithmetic_overflow(operation: &str, account: &str) -> Self {
        LedgerError::ArithmeticOverflow {
            operation: operation.to_string(),
            account: account.to_string(),
        }
    }

    /// Create a Store error
    pub fn store(message: impl Into<String>) -> Self {
        LedgerError::Store {
            message: message.into(),
        }
    }

    /// Whether the error points at broken configuration or infrastructure
    /// rather than at the transfer being posted
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::MissingHoldAccount | LedgerError::Store { .. })
    }
}

/// Error raised by a notification transport
///
/// An HTTP status of 400 or above is not a transport error; the sender
/// returns it and the dispatcher decides.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The request could not be completed (connect, DNS, timeout, ...)
    #[error("Notification transport failed: {message}")]
    Transport { message: String },

    /// The transport could not be configured
    #[error("Notification transport misconfigured: {message}")]
    Configuration { message: String },
}

impl From<reqwest::Error> for DeliveryError {
    fn from(error: reqwest::Error) -> Self {
        DeliveryError::Transport {
            message: error.to_string(),
        }
    }
}

/// Error type for notification queueing and processing
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NotificationError {
    /// The notification store failed
    #[error("Notification store error: {message}")]
    Store { message: String },

    /// No pending notification with this id exists
    #[error("Notification {notification} not found")]
    NotificationNotFound { notification: NotificationId },

    /// A queued notification references a transfer that no longer exists
    #[error("Transfer {transfer} not found")]
    TransferNotFound { transfer: TransferId },

    /// A queued notification references a subscription that no longer exists
    #[error("Subscription {subscription} not found")]
    SubscriptionNotFound { subscription: SubscriptionId },
}

impl NotificationError {
    /// Create a Store error
    pub fn store(message: impl Into<String>) -> Self {
        NotificationError::Store {
            message: message.into(),
        }
    }
}
