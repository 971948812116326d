//! Batch replay driver
//!
//! Loads a ledger snapshot, posts a file of transfers against it one ledger
//! transaction at a time, fans notifications out to subscribers and writes
//! the final balances.
//!
//! # Posting
//!
//! What a transfer does to the ledger depends on its state:
//!
//! | State | Ledger effect |
//! |---|---|
//! | `executed` | debits into `hold`, then credits out of `hold` |
//! | `prepared` | debits into `hold` only |
//! | `rejected` | debits into `hold`, then reverted back to the senders |
//! | `proposed`, `failed` | none |
//!
//! A transfer listed with a malformed leg row is skipped as a whole and
//! counted as rejected. A transfer that fails with a `LedgerError` is rolled
//! back and skipped. A fatal error (`MissingHoldAccount`, `Store`) aborts the
//! run.

use crate::core::balance_ledger::{settle, BalanceLedger};
use crate::core::memory_ledger::MemoryLedger;
use crate::core::traits::{NotificationSender, NotificationStore};
use crate::core::uri::ResourceUris;
use crate::io::{load_accounts, load_subscriptions, load_transfers, write_balances_csv};
use crate::notify::{
    DispatcherConfig, HttpSender, MemoryNotificationStore, NotificationDispatcher,
};
use crate::types::{EntryGroupId, LedgerError, Transfer, TransferState, HOLD_ACCOUNT};
use rust_decimal::Decimal;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default time allowed for pending notifications to drain
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Inputs and settings of one replay run
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub accounts: PathBuf,
    pub transfers: PathBuf,

    /// Subscriptions file; notifications are only sent when present
    pub subscriptions: Option<PathBuf>,

    /// Base URI for account, transfer and subscription URIs
    pub base_uri: String,

    /// Reject transfers whose debit and credit totals differ
    pub require_balanced: bool,

    pub dispatcher: DispatcherConfig,

    /// How long to wait for pending notifications before giving up
    pub drain_timeout: Duration,
}

/// Counts reported at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaySummary {
    /// Transfers posted and committed
    pub posted: usize,
    /// Transfers rolled back because of a ledger error
    pub rejected: usize,
    /// Notification rows queued for posted transfers
    pub notifications_queued: usize,
    /// Notifications still undelivered when the run ended
    pub notifications_pending: usize,
}

/// Run a replay, delivering notifications over HTTP
///
/// # Returns
///
/// * `Ok(ReplaySummary)` if the run completed
/// * `Err(String)` on an unreadable input file, a fatal ledger error or an
///   output failure
pub async fn run(config: &ReplayConfig, output: &mut dyn Write) -> Result<ReplaySummary, String> {
    let sender = HttpSender::new(config.dispatcher.request_timeout)
        .map_err(|e| format!("Failed to create notification sender: {}", e))?;
    run_with_sender(config, Arc::new(sender), output).await
}

/// Run a replay with an explicit notification transport
pub async fn run_with_sender<N: NotificationSender>(
    config: &ReplayConfig,
    sender: Arc<N>,
    output: &mut dyn Write,
) -> Result<ReplaySummary, String> {
    let uris = ResourceUris::new(config.base_uri.as_str());
    let ledger = load_ledger(config)?;
    let transfers = load_transfers(&config.transfers)?;

    let store = Arc::new(MemoryNotificationStore::new());
    if let Some(path) = &config.subscriptions {
        let subscriptions = load_subscriptions(path, &uris)?;
        tracing::info!(count = subscriptions.len(), "loaded subscriptions");
        for subscription in subscriptions {
            store.add_subscription(subscription);
        }
    }
    let notify = config.subscriptions.is_some();

    let dispatcher =
        NotificationDispatcher::new(Arc::clone(&store), sender, uris, config.dispatcher);
    if notify {
        dispatcher.start();
    }

    let mut summary = ReplaySummary::default();
    for loaded in &transfers {
        if let Some(reason) = &loaded.invalid {
            summary.rejected += 1;
            tracing::warn!(transfer = %loaded.label, %reason, "transfer has malformed legs, skipped");
            continue;
        }

        match post_transfer(&ledger, &loaded.transfer, config.require_balanced) {
            Ok(groups) => {
                summary.posted += 1;
                tracing::info!(
                    transfer = %loaded.label,
                    state = %loaded.transfer.state,
                    entry_groups = groups.len(),
                    "transfer posted"
                );
            }
            Err(error) if error.is_fatal() => {
                tracing::error!(transfer = %loaded.label, %error, "aborting replay");
                dispatcher.stop();
                return Err(format!("Transfer '{}': {}", loaded.label, error));
            }
            Err(error) => {
                summary.rejected += 1;
                tracing::warn!(transfer = %loaded.label, %error, "transfer rolled back");
                continue;
            }
        }

        if notify {
            store.put_transfer(loaded.transfer.clone());
            let mut session = store.autocommit();
            match dispatcher
                .queue_notifications(&loaded.transfer, &mut session)
                .await
            {
                Ok(notifications) => summary.notifications_queued += notifications.len(),
                Err(error) => {
                    tracing::warn!(transfer = %loaded.label, %error, "failed to queue notifications");
                }
            }
        }
    }

    if notify {
        drain(&dispatcher, &store, config.drain_timeout).await;
        dispatcher.stop();
        dispatcher.flush().await;

        let stats = dispatcher.stats();
        tracing::info!(
            sweeps = stats.sweeps,
            delivered = stats.delivered,
            failed_attempts = stats.failed_attempts,
            swallowed_errors = stats.swallowed_errors,
            "notification dispatcher stopped"
        );
    }
    summary.notifications_pending = store.pending_count();

    let accounts = ledger.accounts().map_err(|e| e.to_string())?;
    write_balances_csv(&accounts, output)?;

    tracing::info!(
        posted = summary.posted,
        rejected = summary.rejected,
        pending = summary.notifications_pending,
        "replay finished"
    );
    Ok(summary)
}

fn load_ledger(config: &ReplayConfig) -> Result<MemoryLedger, String> {
    let ledger = MemoryLedger::new();
    let accounts = load_accounts(&config.accounts)?;
    tracing::info!(count = accounts.len(), "loaded accounts");

    for account in &accounts {
        ledger
            .open_account(&account.name, account.balance)
            .map_err(|e| e.to_string())?;
    }

    let has_hold = ledger
        .balance(HOLD_ACCOUNT)
        .map_err(|e| e.to_string())?
        .is_some();
    if !has_hold {
        tracing::info!("opening empty hold account");
        ledger
            .open_account(HOLD_ACCOUNT, Decimal::ZERO)
            .map_err(|e| e.to_string())?;
    }

    Ok(ledger)
}

/// Post one transfer in its own ledger transaction
///
/// Returns the entry groups written. On error the transaction is dropped,
/// which rolls back every write of the transfer.
pub fn post_transfer(
    ledger: &MemoryLedger,
    transfer: &Transfer,
    require_balanced: bool,
) -> Result<Vec<EntryGroupId>, LedgerError> {
    let mut transaction = ledger.begin()?;

    let groups = match transfer.state {
        TransferState::Executed => {
            let settlement = settle(&mut transaction, transfer, require_balanced)?;
            vec![settlement.debit_group, settlement.credit_group]
        }
        state => {
            let mut balances = BalanceLedger::new(&mut transaction, transfer)?;
            if require_balanced {
                balances.ensure_balanced()?;
            }
            match state {
                TransferState::Prepared => vec![balances.apply_debits()?],
                TransferState::Rejected => {
                    vec![balances.apply_debits()?, balances.revert_debits()?]
                }
                _ => Vec::new(),
            }
        }
    };

    transaction.commit();
    Ok(groups)
}

/// Keep waking the dispatcher until nothing is pending or `timeout` passes
///
/// Returns whether the queue drained.
async fn drain<N: NotificationSender>(
    dispatcher: &NotificationDispatcher<MemoryNotificationStore, N>,
    store: &MemoryNotificationStore,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    let poll_interval = dispatcher.config().poll_interval;

    loop {
        dispatcher.flush().await;
        let pending = store.pending_count();
        if pending == 0 {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(pending, "notification drain timed out");
            return false;
        }
        tokio::time::sleep(poll_interval).await;
        dispatcher.schedule_processing();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Leg;
    use rstest::rstest;

    fn ledger() -> MemoryLedger {
        let ledger = MemoryLedger::new();
        ledger.open_account("alice", Decimal::new(100, 0)).unwrap();
        ledger.open_account("bob", Decimal::ZERO).unwrap();
        ledger.open_account(HOLD_ACCOUNT, Decimal::ZERO).unwrap();
        ledger
    }

    fn transfer(state: TransferState) -> Transfer {
        Transfer::new(
            vec![Leg::new("alice", Decimal::new(40, 0))],
            vec![Leg::new("bob", Decimal::new(40, 0))],
            state,
        )
    }

    #[rstest]
    #[case::executed(TransferState::Executed, 60, 40, 0, 2)]
    #[case::prepared(TransferState::Prepared, 60, 0, 40, 1)]
    #[case::rejected(TransferState::Rejected, 100, 0, 0, 2)]
    #[case::proposed(TransferState::Proposed, 100, 0, 0, 0)]
    #[case::failed(TransferState::Failed, 100, 0, 0, 0)]
    fn test_post_transfer_by_state(
        #[case] state: TransferState,
        #[case] alice: i64,
        #[case] bob: i64,
        #[case] hold: i64,
        #[case] groups: usize,
    ) {
        let ledger = ledger();

        let written = post_transfer(&ledger, &transfer(state), true).unwrap();

        assert_eq!(written.len(), groups);
        assert_eq!(ledger.balance("alice").unwrap(), Some(Decimal::new(alice, 0)));
        assert_eq!(ledger.balance("bob").unwrap(), Some(Decimal::new(bob, 0)));
        assert_eq!(
            ledger.balance(HOLD_ACCOUNT).unwrap(),
            Some(Decimal::new(hold, 0))
        );
        assert_eq!(ledger.entry_groups().unwrap().len(), groups);
    }

    #[test]
    fn test_post_transfer_rolls_back_on_error() {
        let ledger = ledger();
        let overdraw = Transfer::new(
            vec![Leg::new("alice", Decimal::new(500, 0))],
            vec![Leg::new("bob", Decimal::new(500, 0))],
            TransferState::Executed,
        );

        let result = post_transfer(&ledger, &overdraw, true);

        assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
        assert_eq!(ledger.balance("alice").unwrap(), Some(Decimal::new(100, 0)));
        assert!(ledger.entries().unwrap().is_empty());
    }

    #[rstest]
    #[case::executed(TransferState::Executed)]
    #[case::prepared(TransferState::Prepared)]
    #[case::rejected(TransferState::Rejected)]
    fn test_post_transfer_without_hold_is_fatal(#[case] state: TransferState) {
        let ledger = MemoryLedger::new();
        ledger.open_account("alice", Decimal::new(100, 0)).unwrap();
        ledger.open_account("bob", Decimal::ZERO).unwrap();

        let error = post_transfer(&ledger, &transfer(state), true).unwrap_err();

        assert_eq!(error, LedgerError::MissingHoldAccount);
        assert!(error.is_fatal());
        assert_eq!(ledger.balance("alice").unwrap(), Some(Decimal::new(100, 0)));
        assert!(ledger.entries().unwrap().is_empty());
    }

    #[test]
    fn test_post_unbalanced_prepared_transfer_when_required() {
        let ledger = ledger();
        let unbalanced = Transfer::new(
            vec![Leg::new("alice", Decimal::new(40, 0))],
            vec![Leg::new("bob", Decimal::new(30, 0))],
            TransferState::Prepared,
        );

        assert!(matches!(
            post_transfer(&ledger, &unbalanced, true),
            Err(LedgerError::UnbalancedTransfer { .. })
        ));
        assert!(post_transfer(&ledger, &unbalanced, false).is_ok());
        assert_eq!(
            ledger.balance(HOLD_ACCOUNT).unwrap(),
            Some(Decimal::new(40, 0))
        );
    }
}
