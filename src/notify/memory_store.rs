//! In-memory notification store
//!
//! `MemoryNotificationStore` keeps subscriptions, transfers, fulfillments and
//! the notification queue in `DashMap`s so the dispatcher's immediate and
//! swept delivery paths can touch rows concurrently.
//!
//! # Uniqueness
//!
//! A `(subscription_id, transfer_id) -> notification_id` index backs
//! `find_or_create_notification`. The lookup and the insert happen under the
//! index entry's shard lock, so concurrent callers for the same pair observe
//! one row.

use crate::core::traits::NotificationStore;
use crate::types::{
    EventFilter, Fulfillment, Notification, NotificationError, NotificationId, Subscription,
    SubscriptionId, Transfer, TransferId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Session handle for [`MemoryNotificationStore`]
///
/// Every call commits immediately, so the session carries no state.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemorySession;

/// Concurrent in-memory implementation of [`NotificationStore`]
#[derive(Debug, Default)]
pub struct MemoryNotificationStore {
    subscriptions: DashMap<SubscriptionId, Subscription>,
    transfers: DashMap<TransferId, Transfer>,
    fulfillments: DashMap<TransferId, Fulfillment>,
    notifications: DashMap<NotificationId, Notification>,
    pairs: DashMap<(SubscriptionId, TransferId), NotificationId>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription, replacing any with the same id
    pub fn add_subscription(&self, subscription: Subscription) {
        self.subscriptions.insert(subscription.id, subscription);
    }

    pub fn remove_subscription(&self, id: SubscriptionId) -> Option<Subscription> {
        self.subscriptions.remove(&id).map(|(_, subscription)| subscription)
    }

    /// Record the current view of a transfer
    pub fn put_transfer(&self, transfer: Transfer) {
        self.transfers.insert(transfer.id, transfer);
    }

    pub fn remove_transfer(&self, id: TransferId) -> Option<Transfer> {
        self.transfers.remove(&id).map(|(_, transfer)| transfer)
    }

    pub fn put_fulfillment(&self, fulfillment: Fulfillment) {
        self.fulfillments.insert(fulfillment.transfer_id, fulfillment);
    }

    /// Snapshot of one notification row
    pub fn notification(&self, id: NotificationId) -> Option<Notification> {
        self.notifications.get(&id).map(|row| row.value().clone())
    }

    /// Snapshot of every pending notification
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .iter()
            .map(|row| row.value().clone())
            .collect()
    }

    /// Number of notifications still waiting for a successful delivery
    pub fn pending_count(&self) -> usize {
        self.notifications.len()
    }

    fn create_row(
        &self,
        subscription_id: SubscriptionId,
        transfer_id: TransferId,
        retry_at: DateTime<Utc>,
    ) -> NotificationId {
        let notification = Notification::new(subscription_id, transfer_id, Some(retry_at));
        let id = notification.id;
        tracing::debug!(
            notification = %id,
            subscription = %subscription_id,
            transfer = %transfer_id,
            "created notification"
        );
        self.notifications.insert(id, notification);
        id
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    type Session = MemorySession;

    fn autocommit(&self) -> Self::Session {
        MemorySession
    }

    async fn find_subscriptions(
        &self,
        _session: &mut Self::Session,
        subjects: &[String],
        events: &[EventFilter],
    ) -> Result<Vec<Subscription>, NotificationError> {
        Ok(self
            .subscriptions
            .iter()
            .filter(|row| subjects.contains(&row.subject) && events.contains(&row.event))
            .map(|row| row.value().clone())
            .collect())
    }

    async fn find_or_create_notification(
        &self,
        _session: &mut Self::Session,
        subscription_id: SubscriptionId,
        transfer_id: TransferId,
        retry_at: DateTime<Utc>,
    ) -> Result<Notification, NotificationError> {
        let mut slot = self
            .pairs
            .entry((subscription_id, transfer_id))
            .or_insert_with(|| self.create_row(subscription_id, transfer_id, retry_at));

        if let Some(existing) = self.notifications.get(&*slot) {
            return Ok(existing.value().clone());
        }

        // The indexed row was delivered and is being removed; start a new one
        let id = self.create_row(subscription_id, transfer_id, retry_at);
        *slot = id;
        self.notifications
            .get(&id)
            .map(|row| row.value().clone())
            .ok_or_else(|| NotificationError::store(format!("notification {} vanished", id)))
    }

    async fn find_notification(
        &self,
        _session: &mut Self::Session,
        id: NotificationId,
    ) -> Result<Option<Notification>, NotificationError> {
        Ok(self.notification(id))
    }

    async fn due_notifications(
        &self,
        _session: &mut Self::Session,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, NotificationError> {
        Ok(self
            .notifications
            .iter()
            .filter(|row| row.is_due(now))
            .map(|row| row.value().clone())
            .collect())
    }

    async fn save_notification(
        &self,
        _session: &mut Self::Session,
        notification: &Notification,
    ) -> Result<(), NotificationError> {
        if let Some(mut row) = self.notifications.get_mut(&notification.id) {
            *row = notification.clone();
        }
        Ok(())
    }

    async fn delete_notification(
        &self,
        _session: &mut Self::Session,
        id: NotificationId,
    ) -> Result<(), NotificationError> {
        if let Some((_, removed)) = self.notifications.remove(&id) {
            self.pairs
                .remove_if(&(removed.subscription_id, removed.transfer_id), |_, indexed| {
                    *indexed == id
                });
        }
        Ok(())
    }

    async fn find_transfer(
        &self,
        _session: &mut Self::Session,
        id: TransferId,
    ) -> Result<Option<Transfer>, NotificationError> {
        Ok(self.transfers.get(&id).map(|row| row.value().clone()))
    }

    async fn find_subscription(
        &self,
        _session: &mut Self::Session,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, NotificationError> {
        Ok(self.subscriptions.get(&id).map(|row| row.value().clone()))
    }

    async fn find_fulfillment(
        &self,
        _session: &mut Self::Session,
        transfer_id: TransferId,
    ) -> Result<Option<Fulfillment>, NotificationError> {
        Ok(self.fulfillments.get(&transfer_id).map(|row| row.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::sync::Arc;
    use uuid::Uuid;

    fn subscription(subject: &str, event: EventFilter) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            owner: "bob".to_string(),
            target: "http://subscriber.example/hook".to_string(),
            subject: subject.to_string(),
            event,
        }
    }

    #[tokio::test]
    async fn test_find_subscriptions_matches_subject_and_event() {
        let store = MemoryNotificationStore::new();
        let wanted = subscription("http://ledger/accounts/bob", EventFilter::TransferUpdate);
        let wildcard = subscription("*", EventFilter::All);
        let other_subject = subscription("http://ledger/accounts/zed", EventFilter::All);
        store.add_subscription(wanted.clone());
        store.add_subscription(wildcard.clone());
        store.add_subscription(other_subject);

        let subjects = vec!["http://ledger/accounts/bob".to_string(), "*".to_string()];
        let mut found = store
            .find_subscriptions(
                &mut MemorySession,
                &subjects,
                &EventFilter::TRANSFER_UPDATE_MATCHES,
            )
            .await
            .unwrap();
        found.sort_by_key(|subscription| subscription.subject.clone());

        assert_eq!(found, vec![wildcard, wanted]);
    }

    #[tokio::test]
    async fn test_find_or_create_returns_existing_row() {
        let store = MemoryNotificationStore::new();
        let (subscription_id, transfer_id) = (Uuid::new_v4(), Uuid::new_v4());
        let retry_at = Utc::now();
        let mut session = store.autocommit();

        let first = store
            .find_or_create_notification(&mut session, subscription_id, transfer_id, retry_at)
            .await
            .unwrap();
        let second = store
            .find_or_create_notification(
                &mut session,
                subscription_id,
                transfer_id,
                retry_at + TimeDelta::seconds(60),
            )
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.retry_at, Some(retry_at));
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_find_or_create_yields_one_row() {
        let store = Arc::new(MemoryNotificationStore::new());
        let (subscription_id, transfer_id) = (Uuid::new_v4(), Uuid::new_v4());
        let retry_at = Utc::now();

        let mut handles = vec![];
        for _ in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .find_or_create_notification(
                        &mut MemorySession,
                        subscription_id,
                        transfer_id,
                        retry_at,
                    )
                    .await
                    .unwrap()
                    .id
            }));
        }

        let mut ids = vec![];
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();

        assert_eq!(ids.len(), 1);
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_due_notifications_uses_strict_comparison() {
        let store = MemoryNotificationStore::new();
        let now = Utc::now();
        let mut session = store.autocommit();

        let past = store
            .find_or_create_notification(
                &mut session,
                Uuid::new_v4(),
                Uuid::new_v4(),
                now - TimeDelta::seconds(1),
            )
            .await
            .unwrap();
        store
            .find_or_create_notification(&mut session, Uuid::new_v4(), Uuid::new_v4(), now)
            .await
            .unwrap();
        store
            .find_or_create_notification(
                &mut session,
                Uuid::new_v4(),
                Uuid::new_v4(),
                now + TimeDelta::seconds(1),
            )
            .await
            .unwrap();

        let due = store.due_notifications(&mut session, now).await.unwrap();
        assert_eq!(due, vec![past]);
    }

    #[tokio::test]
    async fn test_save_after_delete_does_not_resurrect_row() {
        let store = MemoryNotificationStore::new();
        let mut session = store.autocommit();
        let mut notification = store
            .find_or_create_notification(&mut session, Uuid::new_v4(), Uuid::new_v4(), Utc::now())
            .await
            .unwrap();

        store
            .delete_notification(&mut session, notification.id)
            .await
            .unwrap();
        notification.retry_count = 1;
        store
            .save_notification(&mut session, &notification)
            .await
            .unwrap();

        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.notification(notification.id), None);
    }

    #[tokio::test]
    async fn test_delete_frees_pair_for_a_new_row() {
        let store = MemoryNotificationStore::new();
        let mut session = store.autocommit();
        let (subscription_id, transfer_id) = (Uuid::new_v4(), Uuid::new_v4());

        let first = store
            .find_or_create_notification(&mut session, subscription_id, transfer_id, Utc::now())
            .await
            .unwrap();
        store
            .delete_notification(&mut session, first.id)
            .await
            .unwrap();
        let second = store
            .find_or_create_notification(&mut session, subscription_id, transfer_id, Utc::now())
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_find_notification_by_id() {
        let store = MemoryNotificationStore::new();
        let mut session = store.autocommit();
        let row = store
            .find_or_create_notification(&mut session, Uuid::new_v4(), Uuid::new_v4(), Utc::now())
            .await
            .unwrap();

        let found = store.find_notification(&mut session, row.id).await.unwrap();
        let missing = store
            .find_notification(&mut session, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(found, Some(row));
        assert_eq!(missing, None);
    }
}
