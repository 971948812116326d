//! Ledger Settlement Library
//! # Overview
//!
//! This library is the settlement core of a ledger service: it moves funds
//! between named accounts through a `hold` escrow account, keeps an
//! append-only audit trail, and pushes transfer notifications to subscribers
//! with durable, backed-off redelivery.
//!
//! # Architecture
//!
//! - [`types`] - Core data types (Account, Entry, Transfer, Notification, errors)
//! - [`core`] - Settlement components:
//!   - [`core::balance_ledger`] - Double-entry posting through `hold`
//!   - [`core::memory_ledger`] - In-process transactional ledger store
//!   - [`core::traits`] - Seams to stores, transport and time
//! - [`notify`] - Notification queueing, delivery and the retry sweep
//! - [`io`] - CSV formats for snapshots, transfers, subscriptions and balances
//! - [`replay`] - Batch driver used by the CLI
//! - [`cli`], [`logging`] - Argument parsing and tracing setup
//!
//! # Settlement
//!
//! Posting a transfer is split into two phases that each leave the sum of all
//! balances unchanged:
//!
//! - **Debit**: every sender's aggregate debit moves into `hold`
//! - **Credit**: every recipient's aggregate credit moves out of `hold`
//!
//! A debit phase can be reverted, which hands the held funds back to the
//! senders. Every phase writes one entry group with one entry per touched
//! account.
//!
//! # Notifications
//!
//! After a transfer is posted, one notification row is queued per matching
//! subscription and delivered immediately on a best-effort basis. Rows that
//! fail are retried by a sweep with a backoff of `min(120, 2^retries)`
//! seconds until delivery succeeds. Delivery is at-least-once.

pub mod cli;
pub mod core;
pub mod io;
pub mod logging;
pub mod notify;
pub mod replay;
pub mod types;

pub use core::{settle, BalanceLedger, MemoryLedger, ResourceUris};
pub use io::write_balances_csv;
pub use notify::{DispatcherConfig, MemoryNotificationStore, NotificationDispatcher};
pub use types::{
    Account, Entry, EntryGroup, EntryGroupId, LedgerError, Leg, Notification, Subscription,
    Transfer, TransferId, TransferState, HOLD_ACCOUNT,
};
