//! CSV format handling for ledger snapshots, transfer legs and subscriptions
//!
//! This module centralizes all CSV format concerns, providing:
//! - Row structures for deserialization
//! - Conversion from rows to domain types
//! - Grouping of leg rows into transfers
//! - Balance output serialization
//!
//! All functions are pure (no file I/O) for easy testing.
//!
//! # Formats
//!
//! | File | Columns |
//! |---|---|
//! | accounts | `name,balance` |
//! | transfers | `transfer,side,account,amount[,state]` |
//! | subscriptions | `id,owner,target,subject,event` |
//! | output | `name,balance` |

use crate::core::uri::ResourceUris;
use crate::types::{
    Account, EventFilter, Leg, Subscription, Transfer, TransferState, WILDCARD_SUBJECT,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::str::FromStr;
use uuid::Uuid;

/// Row of the accounts file
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AccountRow {
    pub name: String,
    pub balance: String,
}

/// Row of the transfers file: one debit or credit leg
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LegRow {
    /// Transfer key; rows sharing it form one transfer
    pub transfer: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub amount: String,
    pub state: Option<String>,
}

/// Row of the subscriptions file
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SubscriptionRow {
    pub id: String,
    pub owner: String,
    pub target: String,
    pub subject: String,
    pub event: String,
}

/// Which leg set a row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Debit,
    Credit,
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debit" => Ok(Side::Debit),
            "credit" => Ok(Side::Credit),
            other => Err(format!("Invalid side '{}'", other)),
        }
    }
}

/// A validated leg row
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLeg {
    pub transfer: String,
    pub side: Side,
    pub leg: Leg,
    pub state: Option<TransferState>,
}

/// A leg row that failed conversion, remembered under its transfer key
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedLeg {
    pub transfer: String,
    pub reason: String,
}

/// A transfer assembled from leg rows, with the key it was listed under
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedTransfer {
    pub label: String,
    pub transfer: Transfer,

    /// Why the transfer must not be posted; set when any of its rows was
    /// malformed, so the remaining legs never move funds on their own
    pub invalid: Option<String>,
}

fn parse_amount(raw: &str, context: &str) -> Result<Decimal, String> {
    Decimal::from_str(raw.trim())
        .map_err(|_| format!("Invalid amount '{}' for {}", raw, context))
}

/// Convert an AccountRow to an Account
///
/// # Returns
///
/// * `Ok(Account)` - Successfully converted row
/// * `Err(String)` - Empty name or unparsable balance
pub fn convert_account_row(row: AccountRow) -> Result<Account, String> {
    let name = row.name.trim();
    if name.is_empty() {
        return Err("Account name is empty".to_string());
    }
    let balance = parse_amount(&row.balance, &format!("account '{}'", name))?;
    Ok(Account::new(name, balance))
}

/// Convert a LegRow to a ParsedLeg
///
/// A negative amount is accepted here; the ledger rejects it when the
/// transfer is posted.
pub fn convert_leg_row(row: LegRow) -> Result<ParsedLeg, String> {
    let transfer = row.transfer.trim().to_string();
    if transfer.is_empty() {
        return Err("Transfer key is empty".to_string());
    }
    let side: Side = row.side.parse()?;
    let account = row.account.trim();
    if account.is_empty() {
        return Err(format!("Leg of transfer '{}' has no account", transfer));
    }
    let amount = parse_amount(&row.amount, &format!("transfer '{}'", transfer))?;
    let state = match row.state.as_deref().map(str::trim) {
        Some(state) if !state.is_empty() => Some(state.parse::<TransferState>()?),
        _ => None,
    };

    Ok(ParsedLeg {
        transfer,
        side,
        leg: Leg::new(account, amount),
        state,
    })
}

/// Convert a SubscriptionRow to a Subscription
///
/// The subject is either the wildcard `*` or an account name, which is
/// expanded to its account URI under `uris`. An `id` that is not a UUID is
/// replaced by a fresh one.
pub fn convert_subscription_row(
    row: SubscriptionRow,
    uris: &ResourceUris,
) -> Result<Subscription, String> {
    let target = row.target.trim();
    if target.is_empty() {
        return Err(format!("Subscription '{}' has no target", row.id));
    }
    let subject = match row.subject.trim() {
        "" => return Err(format!("Subscription '{}' has no subject", row.id)),
        WILDCARD_SUBJECT => WILDCARD_SUBJECT.to_string(),
        account => uris.account(account),
    };
    let event: EventFilter = row.event.parse()?;

    Ok(Subscription {
        id: Uuid::parse_str(row.id.trim()).unwrap_or_else(|_| Uuid::new_v4()),
        owner: row.owner.trim().to_string(),
        target: target.to_string(),
        subject,
        event,
    })
}

/// Group leg rows into transfers, in first-seen order
///
/// Legs keep their file order within each set. A transfer's state is the
/// first one any of its rows specifies, `executed` when none does. A key
/// that parses as a UUID becomes the transfer id; other keys get a fresh id.
/// A rejected row marks its whole transfer invalid with the first reason seen.
pub fn group_transfers(legs: Vec<Result<ParsedLeg, RejectedLeg>>) -> Vec<LoadedTransfer> {
    let mut order: Vec<LoadedTransfer> = Vec::new();
    let mut index: HashMap<String, (usize, bool)> = HashMap::new();

    for row in legs {
        let key = match &row {
            Ok(parsed) => parsed.transfer.clone(),
            Err(rejected) => rejected.transfer.clone(),
        };
        let (position, state_set) = *index.entry(key.clone()).or_insert_with(|| {
            let id = Uuid::parse_str(&key).unwrap_or_else(|_| Uuid::new_v4());
            order.push(LoadedTransfer {
                label: key.clone(),
                transfer: Transfer {
                    id,
                    debits: Vec::new(),
                    credits: Vec::new(),
                    state: TransferState::Executed,
                },
                invalid: None,
            });
            (order.len() - 1, false)
        });

        let loaded = &mut order[position];
        let parsed = match row {
            Ok(parsed) => parsed,
            Err(rejected) => {
                if loaded.invalid.is_none() {
                    loaded.invalid = Some(rejected.reason);
                }
                continue;
            }
        };

        let transfer = &mut loaded.transfer;
        match parsed.side {
            Side::Debit => transfer.debits.push(parsed.leg),
            Side::Credit => transfer.credits.push(parsed.leg),
        }
        if let Some(state) = parsed.state {
            if !state_set {
                transfer.state = state;
                index.insert(key, (position, true));
            } else if state != transfer.state {
                tracing::warn!(
                    transfer = %key,
                    kept = %transfer.state,
                    ignored = %state,
                    "conflicting transfer state ignored"
                );
            }
        }
    }

    order
}

/// Write account balances to CSV format
///
/// Writes `name,balance` rows sorted by account name. Balances keep the
/// scale they are stored with.
///
/// # Arguments
///
/// * `accounts` - Accounts to write
/// * `output` - Mutable reference to a writer for outputting CSV
///
/// # Returns
///
/// * `Ok(())` if writing succeeded
/// * `Err(String)` if a write error occurred
pub fn write_balances_csv(accounts: &[Account], output: &mut dyn Write) -> Result<(), String> {
    use csv::Writer;

    let mut writer = Writer::from_writer(output);

    writer
        .write_record(["name", "balance"])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    let mut sorted_accounts = accounts.to_vec();
    sorted_accounts.sort_by(|a, b| a.name.cmp(&b.name));

    for account in sorted_accounts {
        writer
            .write_record([account.name.as_str(), account.balance.to_string().as_str()])
            .map_err(|e| format!("Failed to write account record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))?;

    Ok(())
}
