//! Core traits for ledger storage, notification storage, delivery and time
//!
//! This module defines the seams between the settlement core and its external
//! collaborators. The ledger side is synchronous and runs inside one
//! caller-supplied transaction; the notification side is asynchronous and runs
//! outside any ledger transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{
    Account, DeliveryError, Entry, EntryGroupId, EventFilter, Fulfillment, LedgerError,
    Notification, NotificationBody, NotificationError, NotificationId, Subscription,
    SubscriptionId, Transfer, TransferId,
};

/// A transaction handle on the ledger store
///
/// Every read and write performed by the balance ledger goes through one of
/// these. Implementations must give the whole transaction isolation from
/// concurrent writers of the same accounts, and must discard every write when
/// the transaction is abandoned.
pub trait LedgerTransaction {
    /// Look up an account by name
    fn find_account(&mut self, name: &str) -> Result<Option<Account>, LedgerError>;

    /// Persist an account's balance
    fn save_account(&mut self, account: &Account) -> Result<(), LedgerError>;

    /// Record a new entry group marker
    fn create_entry_group(&mut self, id: EntryGroupId) -> Result<(), LedgerError>;

    /// Append an audit entry
    fn append_entry(&mut self, entry: Entry) -> Result<(), LedgerError>;
}

/// Persisted notification queue, subscription directory and transfer lookup
///
/// Every method takes an explicit session. Queueing runs inside the caller's
/// session so the notification rows commit with the transfer; the sweep and
/// delivery paths use [`NotificationStore::autocommit`].
#[async_trait]
pub trait NotificationStore: Send + Sync + 'static {
    /// Session/transaction handle threaded through store calls
    type Session: Send;

    /// A session that commits every call on its own
    fn autocommit(&self) -> Self::Session;

    /// Subscriptions whose subject is in `subjects` and whose filter is in `events`
    async fn find_subscriptions(
        &self,
        session: &mut Self::Session,
        subjects: &[String],
        events: &[EventFilter],
    ) -> Result<Vec<Subscription>, NotificationError>;

    /// Return the notification for (subscription, transfer), creating it with
    /// `retry_at` when none exists
    ///
    /// Must be atomic: concurrent callers for the same pair observe one row.
    async fn find_or_create_notification(
        &self,
        session: &mut Self::Session,
        subscription_id: SubscriptionId,
        transfer_id: TransferId,
        retry_at: DateTime<Utc>,
    ) -> Result<Notification, NotificationError>;

    async fn find_notification(
        &self,
        session: &mut Self::Session,
        id: NotificationId,
    ) -> Result<Option<Notification>, NotificationError>;

    /// Notifications whose `retry_at` is unset or strictly before `now`
    async fn due_notifications(
        &self,
        session: &mut Self::Session,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, NotificationError>;

    /// Update an existing notification row
    ///
    /// Saving a row that has been deleted in the meantime is a no-op.
    async fn save_notification(
        &self,
        session: &mut Self::Session,
        notification: &Notification,
    ) -> Result<(), NotificationError>;

    async fn delete_notification(
        &self,
        session: &mut Self::Session,
        id: NotificationId,
    ) -> Result<(), NotificationError>;

    async fn find_transfer(
        &self,
        session: &mut Self::Session,
        id: TransferId,
    ) -> Result<Option<Transfer>, NotificationError>;

    async fn find_subscription(
        &self,
        session: &mut Self::Session,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, NotificationError>;

    async fn find_fulfillment(
        &self,
        session: &mut Self::Session,
        transfer_id: TransferId,
    ) -> Result<Option<Fulfillment>, NotificationError>;
}

/// Outbound notification transport
#[async_trait]
pub trait NotificationSender: Send + Sync + 'static {
    /// POST `body` to `target` and return the response status code
    ///
    /// Any status is returned as `Ok`; only a failure to complete the request
    /// is an error.
    async fn send(&self, target: &str, body: &NotificationBody) -> Result<u16, DeliveryError>;
}

/// Wall-clock time source
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}
