//! Subscription and notification types
//!
//! A Subscription says "tell `target` about events on `subject`". A
//! Notification is the durable, retryable unit of work created for one
//! (subscription, transfer) pair; it lives until it is delivered.

use super::transfer::TransferId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Subscription identifier
pub type SubscriptionId = Uuid;

/// Notification identifier
pub type NotificationId = Uuid;

/// Subject that matches every account
pub const WILDCARD_SUBJECT: &str = "*";

/// Name of the only event this crate emits
pub const TRANSFER_UPDATE_EVENT: &str = "transfer.update";

/// Event filter of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventFilter {
    #[serde(rename = "transfer.update")]
    TransferUpdate,

    #[serde(rename = "transfer.*")]
    AnyTransfer,

    #[serde(rename = "*")]
    All,
}

impl EventFilter {
    /// Every filter that matches a `transfer.update` event
    pub const TRANSFER_UPDATE_MATCHES: [EventFilter; 3] = [
        EventFilter::TransferUpdate,
        EventFilter::AnyTransfer,
        EventFilter::All,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventFilter::TransferUpdate => "transfer.update",
            EventFilter::AnyTransfer => "transfer.*",
            EventFilter::All => "*",
        }
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "transfer.update" => Ok(EventFilter::TransferUpdate),
            "transfer.*" => Ok(EventFilter::AnyTransfer),
            "*" => Ok(EventFilter::All),
            other => Err(format!("Invalid event filter '{}'", other)),
        }
    }
}

/// A subscriber's interest in events about a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,

    /// Owning account name
    pub owner: String,

    /// Delivery endpoint notifications are POSTed to
    pub target: String,

    /// Account URI or the wildcard `*`
    pub subject: String,

    pub event: EventFilter,
}

/// Durable record of a pending notification
///
/// Unique per (subscription_id, transfer_id). Created once, updated on each
/// failed delivery attempt and deleted on the first successful one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub subscription_id: SubscriptionId,
    pub transfer_id: TransferId,

    /// Number of failed delivery attempts so far; only ever increases
    pub retry_count: u32,

    /// Earliest time the sweep may pick the notification up again
    ///
    /// `None` means due immediately.
    pub retry_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(
        subscription_id: SubscriptionId,
        transfer_id: TransferId,
        retry_at: Option<DateTime<Utc>>,
    ) -> Self {
        Notification {
            id: Uuid::new_v4(),
            subscription_id,
            transfer_id,
            retry_count: 0,
            retry_at,
        }
    }

    /// Whether a sweep running at `now` should pick this notification up
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.retry_at.is_none_or(|retry_at| retry_at < now)
    }
}

/// Fulfillments attached to a notification body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_condition_fulfillment: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_condition_fulfillment: Option<Value>,
}

/// JSON body POSTed to a subscription target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationBody {
    pub id: String,
    pub subscription: String,
    pub event: String,
    pub resource: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_resources: Option<RelatedResources>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rstest::rstest;

    #[rstest]
    #[case("transfer.update", EventFilter::TransferUpdate)]
    #[case("transfer.*", EventFilter::AnyTransfer)]
    #[case("*", EventFilter::All)]
    fn test_event_filter_round_trips_through_str(
        #[case] input: &str,
        #[case] expected: EventFilter,
    ) {
        let parsed: EventFilter = input.parse().unwrap();
        assert_eq!(parsed, expected);
        assert_eq!(parsed.as_str(), input);
    }

    #[test]
    fn test_event_filter_rejects_other_events() {
        assert!("account.update".parse::<EventFilter>().is_err());
    }

    #[test]
    fn test_event_filter_serde_names() {
        let json = serde_json::to_string(&EventFilter::AnyTransfer).unwrap();
        assert_eq!(json, "\"transfer.*\"");
    }

    #[test]
    fn test_notification_without_retry_at_is_due() {
        let notification = Notification::new(Uuid::new_v4(), Uuid::new_v4(), None);
        assert!(notification.is_due(Utc::now()));
    }

    #[test]
    fn test_notification_due_only_strictly_after_retry_at() {
        let now = Utc::now();
        let mut notification = Notification::new(Uuid::new_v4(), Uuid::new_v4(), Some(now));

        assert!(!notification.is_due(now));
        assert!(notification.is_due(now + TimeDelta::milliseconds(1)));

        notification.retry_at = Some(now + TimeDelta::seconds(2));
        assert!(!notification.is_due(now + TimeDelta::seconds(1)));
    }

    #[test]
    fn test_body_omits_empty_related_resources() {
        let body = NotificationBody {
            id: "http://ledger/subscriptions/1/notifications/2".to_string(),
            subscription: "http://ledger/subscriptions/1".to_string(),
            event: TRANSFER_UPDATE_EVENT.to_string(),
            resource: serde_json::json!({"state": "prepared"}),
            related_resources: None,
        };

        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("related_resources").is_none());
        assert_eq!(json["event"], "transfer.update");
    }
}
