//! Notification body construction

use crate::core::uri::ResourceUris;
use crate::types::{
    ConditionKind, Fulfillment, Notification, NotificationBody, RelatedResources, Subscription,
    Transfer, TransferState, TRANSFER_UPDATE_EVENT,
};

/// Build the JSON body POSTed to a subscription target
///
/// The body id is the subscription URI followed by `/notifications/<id>`.
/// An executed transfer carries its execution fulfillment and a rejected one
/// its cancellation fulfillment; any other state, or a fulfillment of the
/// other kind, leaves `related_resources` out.
///
/// # Arguments
///
/// * `notification` - The queued notification being delivered
/// * `transfer` - The transfer the notification is about
/// * `subscription` - The subscription being notified
/// * `fulfillment` - The transfer's fulfillment, when one exists
/// * `uris` - Builder for public resource URIs
pub fn build_notification_body(
    notification: &Notification,
    transfer: &Transfer,
    subscription: &Subscription,
    fulfillment: Option<&Fulfillment>,
    uris: &ResourceUris,
) -> NotificationBody {
    let subscription_uri = uris.subscription(&subscription.id);

    let related_resources = fulfillment.and_then(|fulfillment| {
        match (transfer.state, fulfillment.condition) {
            (TransferState::Executed, ConditionKind::Execution) => Some(RelatedResources {
                execution_condition_fulfillment: Some(fulfillment.payload.clone()),
                cancellation_condition_fulfillment: None,
            }),
            (TransferState::Rejected, ConditionKind::Cancellation) => Some(RelatedResources {
                execution_condition_fulfillment: None,
                cancellation_condition_fulfillment: Some(fulfillment.payload.clone()),
            }),
            _ => None,
        }
    });

    NotificationBody {
        id: format!("{}/notifications/{}", subscription_uri, notification.id),
        subscription: subscription_uri,
        event: TRANSFER_UPDATE_EVENT.to_string(),
        resource: transfer.to_external(uris),
        related_resources,
    }
}
