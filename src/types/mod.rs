//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `account`: Account, Entry and EntryGroup records
//! - `transfer`: Transfers, legs, states and fulfillments
//! - `notification`: Subscriptions, notifications and their wire body
//! - `error`: Error types for the ledger and the notification dispatcher

pub mod account;
pub mod error;
pub mod notification;
pub mod transfer;

pub use account::{Account, Entry, EntryGroup, EntryGroupId, HOLD_ACCOUNT};
pub use error::{DeliveryError, LedgerError, NotificationError};
pub use notification::{
    EventFilter, Notification, NotificationBody, NotificationId, RelatedResources, Subscription,
    SubscriptionId, TRANSFER_UPDATE_EVENT, WILDCARD_SUBJECT,
};
pub use transfer::{ConditionKind, Fulfillment, Leg, Transfer, TransferId, TransferState};
