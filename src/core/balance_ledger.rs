//! Double-entry balance engine
//!
//! This module provides `BalanceLedger`, which applies a transfer's debit and
//! credit legs to account balances through the reserved `hold` escrow account.
//!
//! # Design
//!
//! Debits and credits are posted in two independent phases:
//!
//! - `apply_debits` moves each sender's aggregate debit into `hold`
//! - `apply_credits` moves each recipient's aggregate credit out of `hold`
//! - `revert_debits` moves the debits back out of `hold` to their senders
//!
//! Every phase keeps the sum of all balances (hold included) unchanged, so the
//! hold balance at any moment equals the amount currently in flight.
//!
//! # Atomicity
//!
//! Each phase writes one entry group plus one Entry per touched account, hold
//! included. Its writes go through the caller's transaction; the caller
//! commits on success and abandons the transaction on any error.

use crate::core::traits::LedgerTransaction;
use crate::types::{
    Account, Entry, EntryGroupId, LedgerError, Leg, Transfer, TransferId, HOLD_ACCOUNT,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Aggregate of every leg a transfer has on one account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountTotals {
    /// Account balance as last read by the ledger
    pub balance: Decimal,

    /// Sum of the account's leg amounts
    pub total_amount: Decimal,
}

/// Per-account aggregates keyed by account name
///
/// Iteration order carries no meaning.
pub type AccountAggregates = BTreeMap<String, AccountTotals>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Take from the accounts, give to hold
    Debit,
    /// Give to the accounts, take from hold
    Credit,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Debit => "debit",
            Direction::Credit => "credit",
        }
    }
}

/// Entry groups written by a full settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub debit_group: EntryGroupId,
    pub credit_group: EntryGroupId,
}

/// Applies one transfer's legs to the ledger inside one transaction
///
/// Construct with [`BalanceLedger::new`], which aggregates both leg sets and
/// fails with `UnknownAccount` before anything is written.
#[derive(Debug)]
pub struct BalanceLedger<'t, T: LedgerTransaction + ?Sized> {
    transaction: &'t mut T,
    transfer_id: TransferId,
    debits: AccountAggregates,
    credits: AccountAggregates,
}

impl<'t, T: LedgerTransaction + ?Sized> BalanceLedger<'t, T> {
    /// Aggregate the transfer's debit and credit sets
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if a leg amount is negative
    /// - `UnknownAccount` if any referenced account does not exist
    /// - `ArithmeticOverflow` if an aggregate cannot be represented
    pub fn new(transaction: &'t mut T, transfer: &Transfer) -> Result<Self, LedgerError> {
        let debits = aggregate(transaction, &transfer.debits)?;
        let credits = aggregate(transaction, &transfer.credits)?;

        let ledger = BalanceLedger {
            transaction,
            transfer_id: transfer.id,
            debits,
            credits,
        };

        if !ledger.is_balanced() {
            tracing::warn!(
                transfer = %transfer.id,
                debits = %ledger.debit_total(),
                credits = %ledger.credit_total(),
                "transfer debit and credit totals differ, hold will not net to zero"
            );
        }

        Ok(ledger)
    }

    /// Debit aggregates by account
    pub fn debits(&self) -> &AccountAggregates {
        &self.debits
    }

    /// Credit aggregates by account
    pub fn credits(&self) -> &AccountAggregates {
        &self.credits
    }

    pub fn debit_total(&self) -> Decimal {
        self.debits.values().map(|totals| totals.total_amount).sum()
    }

    pub fn credit_total(&self) -> Decimal {
        self.credits.values().map(|totals| totals.total_amount).sum()
    }

    /// Whether settling both phases returns hold to its starting balance
    pub fn is_balanced(&self) -> bool {
        self.debit_total() == self.credit_total()
    }

    /// Fail with `UnbalancedTransfer` unless debit and credit totals match
    pub fn ensure_balanced(&self) -> Result<(), LedgerError> {
        if self.is_balanced() {
            Ok(())
        } else {
            Err(LedgerError::UnbalancedTransfer {
                transfer: self.transfer_id,
                debits: self.debit_total(),
                credits: self.credit_total(),
            })
        }
    }

    /// Move every sender's aggregate debit into `hold`
    ///
    /// # Errors
    ///
    /// - `MissingHoldAccount` if `hold` does not exist
    /// - `InsufficientFunds` if any sender's balance is below its debit total;
    ///   nothing of this call is written in that case
    pub fn apply_debits(&mut self) -> Result<EntryGroupId, LedgerError> {
        post(
            &mut *self.transaction,
            self.transfer_id,
            &mut self.debits,
            Direction::Debit,
        )
    }

    /// Move every recipient's aggregate credit out of `hold`
    pub fn apply_credits(&mut self) -> Result<EntryGroupId, LedgerError> {
        post(
            &mut *self.transaction,
            self.transfer_id,
            &mut self.credits,
            Direction::Credit,
        )
    }

    /// Give the debit set back to its senders from `hold`
    ///
    /// Used to unwind a transfer whose debits were taken but whose credits
    /// were never posted.
    pub fn revert_debits(&mut self) -> Result<EntryGroupId, LedgerError> {
        post(
            &mut *self.transaction,
            self.transfer_id,
            &mut self.debits,
            Direction::Credit,
        )
    }
}

/// Apply debits then credits for `transfer` within `transaction`
///
/// With `require_balanced`, a transfer whose debit and credit totals differ is
/// rejected before anything is written.
pub fn settle<T: LedgerTransaction + ?Sized>(
    transaction: &mut T,
    transfer: &Transfer,
    require_balanced: bool,
) -> Result<Settlement, LedgerError> {
    let mut ledger = BalanceLedger::new(transaction, transfer)?;
    if require_balanced {
        ledger.ensure_balanced()?;
    }
    let debit_group = ledger.apply_debits()?;
    let credit_group = ledger.apply_credits()?;
    Ok(Settlement {
        debit_group,
        credit_group,
    })
}

/// Group legs by account, summing their amounts and reading each balance
fn aggregate<T: LedgerTransaction + ?Sized>(
    transaction: &mut T,
    legs: &[Leg],
) -> Result<AccountAggregates, LedgerError> {
    let mut accounts = AccountAggregates::new();

    for leg in legs {
        if leg.amount.is_sign_negative() && !leg.amount.is_zero() {
            return Err(LedgerError::invalid_amount(&leg.account, leg.amount));
        }
        let totals = accounts.entry(leg.account.clone()).or_default();
        totals.total_amount = totals
            .total_amount
            .checked_add(leg.amount)
            .ok_or_else(|| LedgerError::arithmetic_overflow("aggregate", &leg.account))?;
    }

    for (name, totals) in accounts.iter_mut() {
        let account = transaction
            .find_account(name)?
            .ok_or_else(|| LedgerError::unknown_account(name))?;
        totals.balance = account.balance;
    }

    Ok(accounts)
}

/// Post one aggregate set against `hold` under a fresh entry group
fn post<T: LedgerTransaction + ?Sized>(
    transaction: &mut T,
    transfer_id: TransferId,
    accounts: &mut AccountAggregates,
    direction: Direction,
) -> Result<EntryGroupId, LedgerError> {
    let hold = transaction
        .find_account(HOLD_ACCOUNT)?
        .ok_or(LedgerError::MissingHoldAccount)?;

    // Read and check every account before the first write
    let mut working: BTreeMap<String, Account> = BTreeMap::new();
    working.insert(HOLD_ACCOUNT.to_string(), hold);
    for (name, totals) in accounts.iter() {
        if !working.contains_key(name) {
            let account = transaction
                .find_account(name)?
                .ok_or_else(|| LedgerError::unknown_account(name))?;
            working.insert(name.clone(), account);
        }
        let balance = working[name].balance;
        if direction == Direction::Debit && balance < totals.total_amount {
            return Err(LedgerError::insufficient_funds(
                name,
                balance,
                totals.total_amount,
            ));
        }
    }

    for (name, totals) in accounts.iter() {
        let amount = totals.total_amount;
        let (to_account, to_hold) = match direction {
            Direction::Debit => (-amount, amount),
            Direction::Credit => (amount, -amount),
        };

        adjust(&mut working, name, to_account, direction)?;
        adjust(&mut working, HOLD_ACCOUNT, to_hold, direction)?;
    }

    let entry_group = EntryGroupId::new();
    transaction.create_entry_group(entry_group)?;
    tracing::debug!(
        transfer = %transfer_id,
        %entry_group,
        direction = direction.as_str(),
        accounts = accounts.len(),
        "posting ledger entries"
    );

    let created_at = Utc::now();
    let hold = working.remove(HOLD_ACCOUNT);
    for account in working.values().chain(hold.iter()) {
        transaction.append_entry(Entry {
            account: account.name.clone(),
            balance: account.balance,
            entry_group,
            transfer_id,
            created_at,
        })?;
        transaction.save_account(account)?;
    }

    for (name, totals) in accounts.iter_mut() {
        let account = if name == HOLD_ACCOUNT {
            hold.as_ref()
        } else {
            working.get(name)
        };
        if let Some(account) = account {
            totals.balance = account.balance;
        }
    }

    Ok(entry_group)
}

fn adjust(
    working: &mut BTreeMap<String, Account>,
    name: &str,
    delta: Decimal,
    direction: Direction,
) -> Result<(), LedgerError> {
    let account = working
        .get_mut(name)
        .ok_or_else(|| LedgerError::unknown_account(name))?;
    let before = account.balance;
    account.balance = before
        .checked_add(delta)
        .ok_or_else(|| LedgerError::arithmetic_overflow(direction.as_str(), name))?;
    tracing::debug!(account = name, %before, after = %account.balance, "balance updated");
    Ok(())
}
