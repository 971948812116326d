//! Transfer-related types for the settlement ledger
//!
//! A transfer is a set of debit legs and credit legs that have already been
//! validated and are ready to post. This module also defines the fulfillment
//! record attached to notifications once a transfer reaches a terminal state.

use crate::core::uri::ResourceUris;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Transfer identifier
pub type TransferId = Uuid;

/// One debit or credit instruction of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    /// Name of the account the leg applies to
    pub account: String,

    /// Amount to remove (debit) or add (credit)
    pub amount: Decimal,
}

impl Leg {
    pub fn new(account: impl Into<String>, amount: Decimal) -> Self {
        Leg {
            account: account.into(),
            amount,
        }
    }
}

/// Lifecycle state of a transfer
///
/// The state only matters to this crate when building notifications: an
/// executed transfer carries its execution fulfillment and a rejected one its
/// cancellation fulfillment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Proposed,
    Prepared,
    Executed,
    Rejected,
    Failed,
}

impl TransferState {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::Proposed => "proposed",
            TransferState::Prepared => "prepared",
            TransferState::Executed => "executed",
            TransferState::Rejected => "rejected",
            TransferState::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "proposed" => Ok(TransferState::Proposed),
            "prepared" => Ok(TransferState::Prepared),
            "executed" => Ok(TransferState::Executed),
            "rejected" => Ok(TransferState::Rejected),
            "failed" => Ok(TransferState::Failed),
            other => Err(format!("Invalid transfer state '{}'", other)),
        }
    }
}

/// A transfer ready to be posted to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,

    /// Debit legs in submission order
    pub debits: Vec<Leg>,

    /// Credit legs in submission order
    pub credits: Vec<Leg>,

    pub state: TransferState,
}

impl Transfer {
    /// Create a transfer with a fresh random id
    pub fn new(debits: Vec<Leg>, credits: Vec<Leg>, state: TransferState) -> Self {
        Transfer {
            id: Uuid::new_v4(),
            debits,
            credits,
            state,
        }
    }

    /// Names of every account referenced by a debit or credit leg
    ///
    /// Names may repeat when an account appears in several legs.
    pub fn affected_accounts(&self) -> impl Iterator<Item = &str> {
        self.debits
            .iter()
            .chain(self.credits.iter())
            .map(|leg| leg.account.as_str())
    }

    /// External (wire) view of the transfer
    ///
    /// The id and every leg account are rendered as resource URIs and
    /// amounts as decimal strings.
    pub fn to_external(&self, uris: &ResourceUris) -> Value {
        let legs = |legs: &[Leg]| -> Vec<Value> {
            legs.iter()
                .map(|leg| {
                    json!({
                        "account": uris.account(&leg.account),
                        "amount": leg.amount.to_string(),
                    })
                })
                .collect()
        };

        json!({
            "id": uris.transfer(&self.id),
            "debits": legs(&self.debits),
            "credits": legs(&self.credits),
            "state": self.state,
        })
    }
}

/// Which transfer condition a fulfillment satisfies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Execution,
    Cancellation,
}

/// Proof data attached to a transfer once it reaches a terminal state
///
/// Fulfillments are looked up by this crate, never created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fulfillment {
    pub transfer_id: TransferId,
    pub condition: ConditionKind,

    /// External representation of the fulfillment, forwarded verbatim
    pub payload: Value,
}
