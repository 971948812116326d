//! Core settlement logic
//!
//! This module contains the ledger-side components:
//! - `traits` - Seams to the ledger store, notification store, transport and clock
//! - `balance_ledger` - Double-entry posting of transfer legs through `hold`
//! - `memory_ledger` - In-process transactional ledger store
//! - `clock` - Wall-clock and manual time sources
//! - `uri` - Resource URIs for accounts, transfers and subscriptions

pub mod balance_ledger;
pub mod clock;
pub mod memory_ledger;
pub mod traits;
pub mod uri;

pub use balance_ledger::{settle, AccountAggregates, AccountTotals, BalanceLedger, Settlement};
pub use clock::{ManualClock, SystemClock};
pub use memory_ledger::{MemoryLedger, MemoryTransaction};
pub use traits::{Clock, LedgerTransaction, NotificationSender, NotificationStore};
pub use uri::ResourceUris;
