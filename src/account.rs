//! Account identity and balance state.
//!
//! Maintains the invariant: `balance >= 0` and `hold >= 0` at all times.
//! Balance and hold are only ever mutated by the ledger inside a movement.

use crate::amount::Amount;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique, stable identifier of an account holder.
///
/// Ordering is lexicographic; the ledger relies on it to acquire account
/// locks in one globally consistent order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Creates an account id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        AccountId(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        AccountId(id.to_owned())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        AccountId(id)
    }
}

/// Which pocket of an account a delta lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pocket {
    /// Spendable funds.
    Balance,
    /// Funds earmarked for open escrows, excluded from spending.
    Hold,
}

/// An account's balance state.
///
/// # Invariants
///
/// - `balance >= 0` and `hold >= 0` after every operation
/// - `total_in`/`total_out` are monotonically non-decreasing and are
///   maintained for reporting only, never read for invariant checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    /// Unique account identifier.
    #[serde(rename = "account")]
    pub id: AccountId,

    /// Spendable funds, in minor units. Never negative.
    pub balance: Amount,

    /// Funds locked for open escrows. Never negative.
    pub hold: Amount,

    /// Lifetime value settled into this account.
    pub total_in: Amount,

    /// Lifetime value settled out of this account.
    pub total_out: Amount,
}

impl Account {
    /// Creates a new account with zero balances.
    pub fn new(id: AccountId) -> Self {
        Account {
            id,
            balance: Amount::ZERO,
            hold: Amount::ZERO,
            total_in: Amount::ZERO,
            total_out: Amount::ZERO,
        }
    }

    /// Adds funds to the spendable balance.
    ///
    /// Returns `false` if the balance counter would overflow.
    pub(crate) fn credit(&mut self, amount: Amount) -> bool {
        match self.balance.checked_add(amount) {
            Some(balance) => {
                self.balance = balance;
                true
            }
            None => false,
        }
    }

    /// Removes funds from the spendable balance.
    ///
    /// Returns `false` if `balance < amount`; the balance is never driven
    /// negative.
    pub(crate) fn debit(&mut self, amount: Amount) -> bool {
        if self.balance < amount {
            return false;
        }
        match self.balance.checked_sub(amount) {
            Some(balance) => {
                self.balance = balance;
                true
            }
            None => false,
        }
    }

    /// Adds funds to the hold pocket.
    ///
    /// Returns `false` if the hold counter would overflow.
    pub(crate) fn hold_credit(&mut self, amount: Amount) -> bool {
        match self.hold.checked_add(amount) {
            Some(hold) => {
                self.hold = hold;
                true
            }
            None => false,
        }
    }

    /// Removes funds from the hold pocket.
    ///
    /// Returns `false` if `hold < amount`; the hold is never driven
    /// negative.
    pub(crate) fn hold_debit(&mut self, amount: Amount) -> bool {
        if self.hold < amount {
            return false;
        }
        match self.hold.checked_sub(amount) {
            Some(hold) => {
                self.hold = hold;
                true
            }
            None => false,
        }
    }

    /// Applies one signed delta to the given pocket.
    ///
    /// Positive deltas credit, negative deltas debit. Returns `false` when
    /// the delta would violate an account invariant.
    pub(crate) fn apply(&mut self, pocket: Pocket, delta: Amount) -> bool {
        if delta.is_positive() {
            match pocket {
                Pocket::Balance => self.credit(delta),
                Pocket::Hold => self.hold_credit(delta),
            }
        } else {
            let magnitude = -delta;
            match pocket {
                Pocket::Balance => self.debit(magnitude),
                Pocket::Hold => self.hold_debit(magnitude),
            }
        }
    }

    /// Folds one settled delta into the lifetime aggregates.
    ///
    /// Saturating: the aggregates are reporting counters, not invariants.
    pub(crate) fn record_settled(&mut self, delta: Amount) {
        if delta.is_positive() {
            self.total_in = self.total_in.saturating_add(delta);
        } else {
            self.total_out = self.total_out.saturating_add(-delta);
        }
    }

    /// Verifies the invariant: `balance >= 0 && hold >= 0`.
    #[cfg(debug_assertions)]
    pub fn check_invariant(&self) -> bool {
        self.balance >= Amount::ZERO && self.hold >= Amount::ZERO
    }
}
