//! Notification dispatcher
//!
//! This module provides `NotificationDispatcher`, which fans a posted transfer
//! out to matching subscribers and redelivers anything that failed until it
//! succeeds.
//!
//! # Design
//!
//! Work reaches subscribers along two independent paths:
//!
//! - **Immediate**: `queue_notifications` creates (or reuses) one durable row
//!   per matching subscription and fires a best-effort delivery attempt for
//!   each. Errors on this path are logged, counted and swallowed.
//! - **Swept**: a timer-driven tick selects every due row and runs the same
//!   delivery routine over the batch.
//!
//! Both paths may deliver the same row, so delivery is at-least-once.
//!
//! # Timer
//!
//! The sweep timer is an explicit state machine:
//!
//! ```text
//!   Stopped --start--> Scheduled --tick--> Idle (batch empty)
//!                          ^                 |
//!                          +-- tick (batch non-empty), schedule_processing
//! ```
//!
//! Every armed tick carries a generation number. Stopping or re-arming bumps
//! the generation, so a tick that was superseded never sweeps. At most one
//! sweep runs at a time: a wake-up or tick that arrives mid-sweep becomes a
//! single re-run after it.
//!
//! # Thread Safety
//!
//! The dispatcher is a cheap handle around shared state and can be cloned
//! into tasks. Tick timers use `tokio::time`; retry timestamps come from the
//! injected [`Clock`].

use crate::core::clock::SystemClock;
use crate::core::traits::{Clock, NotificationSender, NotificationStore};
use crate::core::uri::ResourceUris;
use crate::notify::body::build_notification_body;
use crate::types::{
    EventFilter, Fulfillment, Notification, NotificationBody, NotificationError, NotificationId,
    Subscription, SubscriptionId, Transfer, WILDCARD_SUBJECT,
};
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio_util::task::TaskTracker;

/// Default delay between sweep ticks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default delay before the sweep may pick up a freshly queued row
pub const DEFAULT_INITIAL_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Default cap on the backoff between delivery attempts
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(120);

/// Default per-request transport timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing configuration for the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Delay between sweep ticks while there is work
    pub poll_interval: Duration,

    /// `retry_at` offset given to freshly created rows so the sweep does not
    /// race the immediate attempt
    pub initial_retry_delay: Duration,

    /// Upper bound of the exponential backoff
    pub max_retry_delay: Duration,

    /// Transport timeout for a single delivery attempt
    pub request_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
            initial_retry_delay: DEFAULT_INITIAL_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl DispatcherConfig {
    /// Create a configuration, replacing zero durations with the defaults
    ///
    /// # Arguments
    ///
    /// * `poll_interval` - Delay between sweep ticks
    /// * `initial_retry_delay` - Head start given to the immediate attempt
    /// * `max_retry_delay` - Backoff cap
    /// * `request_timeout` - Transport timeout per attempt
    pub fn new(
        poll_interval: Duration,
        initial_retry_delay: Duration,
        max_retry_delay: Duration,
        request_timeout: Duration,
    ) -> Self {
        let defaults = Self::default();
        DispatcherConfig {
            poll_interval: non_zero("poll_interval", poll_interval, defaults.poll_interval),
            initial_retry_delay: non_zero(
                "initial_retry_delay",
                initial_retry_delay,
                defaults.initial_retry_delay,
            ),
            max_retry_delay: non_zero(
                "max_retry_delay",
                max_retry_delay,
                defaults.max_retry_delay,
            ),
            request_timeout: non_zero(
                "request_timeout",
                request_timeout,
                defaults.request_timeout,
            ),
        }
    }
}

fn non_zero(name: &str, value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        tracing::warn!(
            setting = name,
            default_ms = default.as_millis() as u64,
            "zero duration configured, using default"
        );
        default
    } else {
        value
    }
}

/// Backoff after the `retry_count`-th consecutive failure
///
/// `2^retry_count` seconds, capped at `max`.
pub fn retry_delay(retry_count: u32, max: Duration) -> Duration {
    let seconds = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    Duration::from_secs(seconds).min(max)
}

/// Lifecycle state of the sweep timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Not started, or stopped; nothing will sweep
    Stopped,
    /// Started but no tick pending; waits for `schedule_processing`
    Idle,
    /// A tick is pending
    Scheduled,
}

/// Result of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The subscriber answered below 400 and the row was deleted
    Delivered { status: u16 },
    /// The attempt failed and the row was rescheduled
    RetryScheduled {
        retry_count: u32,
        retry_at: DateTime<Utc>,
    },
}

/// Snapshot of dispatcher counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatcherStats {
    /// Completed sweeps of the notification queue
    pub sweeps: u64,
    /// Successful deliveries
    pub delivered: u64,
    /// Failed delivery attempts (status >= 400 or transport error)
    pub failed_attempts: u64,
    /// Errors raised and swallowed on the immediate delivery path
    pub swallowed_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sweeps: AtomicU64,
    delivered: AtomicU64,
    failed_attempts: AtomicU64,
    swallowed_errors: AtomicU64,
}

#[derive(Debug)]
struct Timer {
    state: DispatcherState,
    generation: u64,
    pending: Option<AbortHandle>,
    /// A sweep is running; ticks and wake-ups wait for it
    sweeping: bool,
    /// Another sweep was requested while one was running
    rerun: bool,
}

impl Timer {
    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

struct Inner<S, N> {
    store: Arc<S>,
    sender: Arc<N>,
    clock: Arc<dyn Clock>,
    uris: ResourceUris,
    config: DispatcherConfig,
    timer: Mutex<Timer>,
    in_flight: TaskTracker,
    counters: Counters,
}

/// Queues, delivers and redelivers transfer notifications
pub struct NotificationDispatcher<S, N> {
    inner: Arc<Inner<S, N>>,
}

impl<S, N> Clone for NotificationDispatcher<S, N> {
    fn clone(&self) -> Self {
        NotificationDispatcher {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: NotificationStore, N: NotificationSender> NotificationDispatcher<S, N> {
    /// Create a stopped dispatcher using the wall clock
    pub fn new(
        store: Arc<S>,
        sender: Arc<N>,
        uris: ResourceUris,
        config: DispatcherConfig,
    ) -> Self {
        Self::with_clock(store, sender, uris, config, Arc::new(SystemClock))
    }

    /// Create a stopped dispatcher with an explicit time source
    pub fn with_clock(
        store: Arc<S>,
        sender: Arc<N>,
        uris: ResourceUris,
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        NotificationDispatcher {
            inner: Arc::new(Inner {
                store,
                sender,
                clock,
                uris,
                config,
                timer: Mutex::new(Timer {
                    state: DispatcherState::Stopped,
                    generation: 0,
                    pending: None,
                    sweeping: false,
                    rerun: false,
                }),
                in_flight: TaskTracker::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    pub fn state(&self) -> DispatcherState {
        self.timer().state
    }

    pub fn stats(&self) -> DispatcherStats {
        let counters = &self.inner.counters;
        DispatcherStats {
            sweeps: counters.sweeps.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            failed_attempts: counters.failed_attempts.load(Ordering::Relaxed),
            swallowed_errors: counters.swallowed_errors.load(Ordering::Relaxed),
        }
    }

    fn timer(&self) -> MutexGuard<'_, Timer> {
        self.inner
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Arm the first sweep tick one poll interval from now
    ///
    /// Has no effect unless the dispatcher is stopped. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self) {
        let mut timer = self.timer();
        if timer.state != DispatcherState::Stopped {
            return;
        }
        tracing::info!(
            poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            "starting notification dispatcher"
        );
        self.arm(&mut timer, self.inner.config.poll_interval);
    }

    /// Cancel any pending tick and return to `Stopped`
    ///
    /// Delivery attempts already in flight run to completion.
    pub fn stop(&self) {
        let mut timer = self.timer();
        timer.cancel_pending();
        timer.generation += 1;
        if timer.state != DispatcherState::Stopped {
            tracing::info!("stopping notification dispatcher");
        }
        timer.state = DispatcherState::Stopped;
    }

    /// Run the next sweep as soon as possible
    ///
    /// Collapses any pending wait into an immediate tick. While a sweep is
    /// running, the request is folded into a single re-run once it finishes.
    /// A stopped dispatcher is left alone.
    pub fn schedule_processing(&self) {
        let mut timer = self.timer();
        if timer.state == DispatcherState::Stopped {
            return;
        }
        if timer.sweeping {
            tracing::trace!("sweep in progress, re-run requested");
            timer.rerun = true;
            return;
        }
        tracing::debug!("scheduling notification processing");
        timer.cancel_pending();
        self.arm(&mut timer, Duration::ZERO);
    }

    /// Wait for every in-flight delivery attempt and sweep to finish
    ///
    /// Pending ticks that have not fired yet are not waited for.
    pub async fn flush(&self) {
        self.inner.in_flight.close();
        self.inner.in_flight.wait().await;
        self.inner.in_flight.reopen();
    }

    fn arm(&self, timer: &mut Timer, delay: Duration) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("no Tokio runtime available, sweep tick not armed");
                return;
            }
        };

        timer.generation += 1;
        let generation = timer.generation;
        let dispatcher = self.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            dispatcher.run_tick(generation).await;
        });
        timer.pending = Some(task.abort_handle());
        timer.state = DispatcherState::Scheduled;
    }

    async fn run_tick(&self, generation: u64) {
        {
            let mut timer = self.timer();
            if timer.generation != generation || timer.state != DispatcherState::Scheduled {
                return;
            }
            timer.state = DispatcherState::Idle;
            timer.pending = None;
            if timer.sweeping {
                timer.rerun = true;
                return;
            }
            timer.sweeping = true;
        }

        let sweep = self
            .inner
            .in_flight
            .track_future(self.process_notification_queue())
            .await;

        let rearm = match sweep {
            Ok(processed) => processed > 0,
            Err(error) => {
                tracing::warn!(%error, "notification sweep failed");
                true
            }
        };

        let mut timer = self.timer();
        timer.sweeping = false;
        let rerun = std::mem::take(&mut timer.rerun);
        if timer.state != DispatcherState::Idle {
            return;
        }
        if rerun {
            self.arm(&mut timer, Duration::ZERO);
        } else if rearm {
            self.arm(&mut timer, self.inner.config.poll_interval);
        }
    }

    /// Fan a posted transfer out to every matching subscription
    ///
    /// Runs inside the caller's `session` so the rows commit with the
    /// transfer. Returns the notification row for each matching subscription,
    /// whether it was created by this call or already pending.
    ///
    /// Each row also gets an immediate delivery attempt whose errors never
    /// reach the caller.
    ///
    /// # Errors
    ///
    /// Only notification store failures while finding subscriptions or
    /// creating rows are returned.
    pub async fn queue_notifications(
        &self,
        transfer: &Transfer,
        session: &mut S::Session,
    ) -> Result<Vec<Notification>, NotificationError> {
        let uris = &self.inner.uris;
        let mut subjects: Vec<String> = transfer
            .affected_accounts()
            .map(|account| uris.account(account))
            .collect();
        subjects.push(WILDCARD_SUBJECT.to_string());
        subjects.sort();
        subjects.dedup();

        let subscriptions = self
            .inner
            .store
            .find_subscriptions(session, &subjects, &EventFilter::TRANSFER_UPDATE_MATCHES)
            .await?;
        if subscriptions.is_empty() {
            tracing::debug!(transfer = %transfer.id, "no subscriptions match transfer");
            return Ok(Vec::new());
        }

        let fulfillment = self
            .inner
            .store
            .find_fulfillment(session, transfer.id)
            .await?;

        let retry_at = offset(self.inner.clock.now(), self.inner.config.initial_retry_delay);
        let mut notifications = Vec::with_capacity(subscriptions.len());
        for subscription in &subscriptions {
            let notification = self
                .inner
                .store
                .find_or_create_notification(session, subscription.id, transfer.id, retry_at)
                .await?;
            notifications.push(notification);
        }

        tracing::debug!(
            transfer = %transfer.id,
            notifications = notifications.len(),
            "queued transfer notifications"
        );

        let transfer = Arc::new(transfer.clone());
        let fulfillment = fulfillment.map(Arc::new);
        for (notification, subscription) in notifications.iter().cloned().zip(subscriptions) {
            let dispatcher = self.clone();
            let transfer = Arc::clone(&transfer);
            let fulfillment = fulfillment.clone();
            self.inner.in_flight.spawn(async move {
                let id = notification.id;
                if let Err(error) = dispatcher
                    .deliver(notification, &transfer, &subscription, fulfillment.as_deref())
                    .await
                {
                    dispatcher
                        .inner
                        .counters
                        .swallowed_errors
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(notification = %id, %error, "immediate notification send failed");
                }
            });
        }

        self.schedule_processing();
        Ok(notifications)
    }

    /// Sweep: run the delivery routine over every due notification
    ///
    /// Returns how many notifications were selected. A failure on one
    /// notification is logged and does not affect the others.
    pub async fn process_notification_queue(&self) -> Result<usize, NotificationError> {
        let mut session = self.inner.store.autocommit();
        let now = self.inner.clock.now();
        let due = self
            .inner
            .store
            .due_notifications(&mut session, now)
            .await?;
        let count = due.len();
        tracing::debug!(count, "processing notifications");

        let attempts = due.into_iter().map(|notification| async move {
            let id = notification.id;
            (id, self.process_notification(notification).await)
        });
        for (id, result) in join_all(attempts).await {
            if let Err(error) = result {
                tracing::warn!(notification = %id, %error, "notification processing failed");
            }
        }

        self.inner.counters.sweeps.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    /// Current body of a pending notification, as it would be delivered now
    ///
    /// # Arguments
    ///
    /// * `subscription_id` - Subscription the notification is looked up under
    /// * `notification_id` - Pending notification
    ///
    /// # Errors
    ///
    /// * `NotificationNotFound` - no pending notification has this id
    /// * `SubscriptionNotFound` - the notification belongs to another
    ///   subscription, or its subscription no longer exists
    /// * `TransferNotFound` - the notified transfer no longer exists
    pub async fn notification_body(
        &self,
        subscription_id: SubscriptionId,
        notification_id: NotificationId,
    ) -> Result<NotificationBody, NotificationError> {
        let store = &self.inner.store;
        let mut session = store.autocommit();

        let notification = store
            .find_notification(&mut session, notification_id)
            .await?
            .ok_or(NotificationError::NotificationNotFound {
                notification: notification_id,
            })?;
        if notification.subscription_id != subscription_id {
            return Err(NotificationError::SubscriptionNotFound {
                subscription: subscription_id,
            });
        }

        let subscription = store
            .find_subscription(&mut session, subscription_id)
            .await?
            .ok_or(NotificationError::SubscriptionNotFound {
                subscription: subscription_id,
            })?;
        let transfer = store
            .find_transfer(&mut session, notification.transfer_id)
            .await?
            .ok_or(NotificationError::TransferNotFound {
                transfer: notification.transfer_id,
            })?;
        let fulfillment = store.find_fulfillment(&mut session, transfer.id).await?;

        Ok(build_notification_body(
            &notification,
            &transfer,
            &subscription,
            fulfillment.as_ref(),
            &self.inner.uris,
        ))
    }

    /// Load a notification's transfer, subscription and fulfillment, then deliver it
    ///
    /// A notification whose transfer or subscription no longer exists is
    /// deleted and reported as an error.
    pub async fn process_notification(
        &self,
        notification: Notification,
    ) -> Result<DeliveryOutcome, NotificationError> {
        let store = &self.inner.store;
        let mut session = store.autocommit();

        let transfer = store
            .find_transfer(&mut session, notification.transfer_id)
            .await?;
        let subscription = store
            .find_subscription(&mut session, notification.subscription_id)
            .await?;

        let (transfer, subscription) = match (transfer, subscription) {
            (Some(transfer), Some(subscription)) => (transfer, subscription),
            (transfer, _) => {
                tracing::warn!(
                    notification = %notification.id,
                    transfer = %notification.transfer_id,
                    subscription = %notification.subscription_id,
                    "discarding orphaned notification"
                );
                store
                    .delete_notification(&mut session, notification.id)
                    .await?;
                return Err(if transfer.is_none() {
                    NotificationError::TransferNotFound {
                        transfer: notification.transfer_id,
                    }
                } else {
                    NotificationError::SubscriptionNotFound {
                        subscription: notification.subscription_id,
                    }
                });
            }
        };

        let fulfillment = store.find_fulfillment(&mut session, transfer.id).await?;
        self.deliver(notification, &transfer, &subscription, fulfillment.as_ref())
            .await
    }

    /// Delivery routine shared by the immediate and swept paths
    ///
    /// POSTs the body to the subscription target. A status below 400 deletes
    /// the row; any other status or a transport error bumps `retry_count` and
    /// pushes `retry_at` out by [`retry_delay`].
    pub async fn deliver(
        &self,
        mut notification: Notification,
        transfer: &Transfer,
        subscription: &Subscription,
        fulfillment: Option<&Fulfillment>,
    ) -> Result<DeliveryOutcome, NotificationError> {
        let store = &self.inner.store;
        let mut session = store.autocommit();
        let body = build_notification_body(
            &notification,
            transfer,
            subscription,
            fulfillment,
            &self.inner.uris,
        );

        tracing::debug!(
            notification = %notification.id,
            url = %subscription.target,
            "sending notification"
        );
        let attempt = self.inner.sender.send(&subscription.target, &body).await;

        let reason = match attempt {
            Ok(status) if status < 400 => {
                store
                    .delete_notification(&mut session, notification.id)
                    .await?;
                self.inner.counters.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    notification = %notification.id,
                    transfer = %transfer.id,
                    status,
                    "notification delivered"
                );
                return Ok(DeliveryOutcome::Delivered { status });
            }
            Ok(status) => format!("remote returned status {}", status),
            Err(error) => error.to_string(),
        };

        notification.retry_count = notification.retry_count.saturating_add(1);
        let delay = retry_delay(notification.retry_count, self.inner.config.max_retry_delay);
        let retry_at = offset(self.inner.clock.now(), delay);
        notification.retry_at = Some(retry_at);
        store.save_notification(&mut session, &notification).await?;

        self.inner
            .counters
            .failed_attempts
            .fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            notification = %notification.id,
            url = %subscription.target,
            retry_count = notification.retry_count,
            retry_in_secs = delay.as_secs(),
            reason = %reason,
            "notification delivery failed"
        );

        Ok(DeliveryOutcome::RetryScheduled {
            retry_count: notification.retry_count,
            retry_at,
        })
    }
}

fn offset(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1)]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(6, 64)]
    #[case(7, 120)]
    #[case(30, 120)]
    #[case(64, 120)]
    #[case(u32::MAX, 120)]
    fn test_retry_delay(#[case] retry_count: u32, #[case] expected_secs: u64) {
        assert_eq!(
            retry_delay(retry_count, DEFAULT_MAX_RETRY_DELAY),
            Duration::from_secs(expected_secs)
        );
    }

    #[test]
    fn test_retry_delay_respects_custom_cap() {
        assert_eq!(
            retry_delay(5, Duration::from_secs(10)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = DispatcherConfig::default();

        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.initial_retry_delay, Duration::from_millis(2000));
        assert_eq!(config.max_retry_delay, Duration::from_secs(120));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[rstest]
    #[case::all_zero(Duration::ZERO, Duration::ZERO, Duration::ZERO, Duration::ZERO)]
    #[case::poll_zero(
        Duration::ZERO,
        DEFAULT_INITIAL_RETRY_DELAY,
        DEFAULT_MAX_RETRY_DELAY,
        DEFAULT_REQUEST_TIMEOUT
    )]
    fn test_config_zero_values_fall_back_to_defaults(
        #[case] poll: Duration,
        #[case] initial: Duration,
        #[case] max: Duration,
        #[case] timeout: Duration,
    ) {
        let config = DispatcherConfig::new(poll, initial, max, timeout);
        assert_eq!(config, DispatcherConfig::default());
    }

    #[test]
    fn test_config_keeps_explicit_values() {
        let config = DispatcherConfig::new(
            Duration::from_millis(50),
            Duration::from_millis(100),
            Duration::from_secs(5),
            Duration::from_secs(1),
        );

        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.initial_retry_delay, Duration::from_millis(100));
        assert_eq!(config.max_retry_delay, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_offset_saturates() {
        let now = DateTime::<Utc>::MAX_UTC - TimeDelta::seconds(1);
        assert_eq!(
            offset(now, Duration::from_secs(60)),
            DateTime::<Utc>::MAX_UTC
        );
    }
}
