//! In-memory ledger store
//!
//! This module provides `MemoryLedger`, an in-process implementation of the
//! ledger store, and `MemoryTransaction`, its transaction handle.
//!
//! # Isolation
//!
//! A transaction holds the ledger lock from `begin()` until it is committed or
//! dropped, so transactions are fully serialized. This is the row-locking
//! guarantee the balance ledger relies on for its read-then-write balance
//! updates.
//!
//! # Atomicity
//!
//! Writes are staged inside the transaction and published together by
//! `commit()`. Dropping a transaction without committing discards them.

use crate::core::traits::LedgerTransaction;
use crate::types::{Account, Entry, EntryGroup, EntryGroupId, LedgerError};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct LedgerState {
    accounts: BTreeMap<String, Account>,
    entries: Vec<Entry>,
    entry_groups: Vec<EntryGroup>,
}

/// In-memory ledger: accounts, the append-only entry log and entry groups
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    /// Create an empty ledger with no accounts (not even `hold`)
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::store("ledger lock poisoned"))
    }

    /// Create or overwrite an account with the given balance
    ///
    /// This bypasses the entry log and is meant for loading snapshots.
    pub fn open_account(&self, name: &str, balance: Decimal) -> Result<(), LedgerError> {
        let mut state = self.lock()?;
        state
            .accounts
            .insert(name.to_string(), Account::new(name, balance));
        Ok(())
    }

    /// Begin a transaction
    ///
    /// Blocks until every other open transaction has finished.
    pub fn begin(&self) -> Result<MemoryTransaction<'_>, LedgerError> {
        Ok(MemoryTransaction {
            state: self.lock()?,
            accounts: BTreeMap::new(),
            entries: Vec::new(),
            entry_groups: Vec::new(),
            committed: false,
        })
    }

    /// Committed balance of an account
    pub fn balance(&self, name: &str) -> Result<Option<Decimal>, LedgerError> {
        Ok(self.lock()?.accounts.get(name).map(|account| account.balance))
    }

    /// All committed accounts, sorted by name
    pub fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        Ok(self.lock()?.accounts.values().cloned().collect())
    }

    /// The committed entry log in append order
    pub fn entries(&self) -> Result<Vec<Entry>, LedgerError> {
        Ok(self.lock()?.entries.clone())
    }

    pub fn entry_groups(&self) -> Result<Vec<EntryGroup>, LedgerError> {
        Ok(self.lock()?.entry_groups.clone())
    }

    /// Sum of every committed balance, the hold account included
    pub fn total_balance(&self) -> Result<Decimal, LedgerError> {
        Ok(self
            .lock()?
            .accounts
            .values()
            .map(|account| account.balance)
            .sum())
    }
}

/// Transaction handle on a [`MemoryLedger`]
#[derive(Debug)]
pub struct MemoryTransaction<'a> {
    state: MutexGuard<'a, LedgerState>,
    accounts: BTreeMap<String, Account>,
    entries: Vec<Entry>,
    entry_groups: Vec<EntryGroup>,
    committed: bool,
}

impl MemoryTransaction<'_> {
    /// Publish every staged write
    pub fn commit(mut self) {
        let accounts = std::mem::take(&mut self.accounts);
        let entries = std::mem::take(&mut self.entries);
        let entry_groups = std::mem::take(&mut self.entry_groups);

        tracing::debug!(
            accounts = accounts.len(),
            entries = entries.len(),
            "committing ledger transaction"
        );

        self.state.accounts.extend(accounts);
        self.state.entries.extend(entries);
        self.state.entry_groups.extend(entry_groups);
        self.committed = true;
    }

    /// Discard every staged write
    pub fn rollback(self) {
        drop(self);
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed && (!self.accounts.is_empty() || !self.entries.is_empty()) {
            tracing::debug!(
                accounts = self.accounts.len(),
                entries = self.entries.len(),
                "rolling back ledger transaction"
            );
        }
    }
}

impl LedgerTransaction for MemoryTransaction<'_> {
    fn find_account(&mut self, name: &str) -> Result<Option<Account>, LedgerError> {
        Ok(self
            .accounts
            .get(name)
            .or_else(|| self.state.accounts.get(name))
            .cloned())
    }

    fn save_account(&mut self, account: &Account) -> Result<(), LedgerError> {
        if !self.accounts.contains_key(&account.name)
            && !self.state.accounts.contains_key(&account.name)
        {
            return Err(LedgerError::unknown_account(&account.name));
        }
        self.accounts.insert(account.name.clone(), account.clone());
        Ok(())
    }

    fn create_entry_group(&mut self, id: EntryGroupId) -> Result<(), LedgerError> {
        self.entry_groups.push(EntryGroup { id });
        Ok(())
    }

    fn append_entry(&mut self, entry: Entry) -> Result<(), LedgerError> {
        self.entries.push(entry);
        Ok(())
    }
}
