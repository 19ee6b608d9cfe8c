//! Append-only ledger and the movement application discipline.
//!
//! The ledger is the sole writer of entries and the sole mutator of account
//! balances. A movement's deltas are applied all-or-nothing: touched
//! accounts are locked in lexicographic id order, a failing delta unwinds
//! the applied prefix, and entries are appended only after every delta has
//! landed. Lock order is account mutexes first, then the append log; no
//! code path takes them the other way around.

use crate::account::{Account, AccountId, Pocket};
use crate::amount::Amount;
use crate::error::{EngineError, Result};
use crate::store::AccountStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Identifier grouping the entries of one atomic movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(Uuid);

impl MovementId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        MovementId(Uuid::new_v4())
    }
}

impl fmt::Display for MovementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier of one ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        EntryId(Uuid::new_v4())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The closed set of movement kinds.
///
/// Doubles as the operation type scoping idempotency keys: a key used for a
/// payment can never collide with the same key used for an escrow creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    /// External value entering an account. Administrative; no policy check.
    Funding,
    /// Balance moving from payer to payee.
    Payment,
    /// Balance moving into the payer's hold pocket for an open escrow.
    EscrowLock,
    /// Held funds settling to the escrow counterparty.
    EscrowRelease,
    /// Held funds returning to the payer's balance.
    EscrowCancel,
    /// External value leaving an account. Administrative; no policy check.
    Withdrawal,
}

impl EntryKind {
    /// Kinds that move value across the system boundary.
    ///
    /// These are the only movements exempt from the zero-sum rule.
    pub fn is_external(&self) -> bool {
        matches!(self, EntryKind::Funding | EntryKind::Withdrawal)
    }

    /// Kinds whose deltas settle value into or out of an account.
    ///
    /// Settling deltas feed `total_in`/`total_out`. Lock and cancel shuffle
    /// value between pockets of one account and touch neither aggregate.
    pub fn settles_value(&self) -> bool {
        !matches!(self, EntryKind::EscrowLock | EntryKind::EscrowCancel)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryKind::Funding => "FUNDING",
            EntryKind::Payment => "PAYMENT",
            EntryKind::EscrowLock => "ESCROW_LOCK",
            EntryKind::EscrowRelease => "ESCROW_RELEASE",
            EntryKind::EscrowCancel => "ESCROW_CANCEL",
            EntryKind::Withdrawal => "WITHDRAWAL",
        })
    }
}

/// One intended balance effect inside a movement.
///
/// Positive amounts credit the pocket, negative amounts debit it. The
/// constructors mirror the store verbs; compound verbs expand into
/// debit-before-credit pairs so audit trails read payer side first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    /// Account the delta applies to.
    pub account: AccountId,
    /// Pocket the delta lands in.
    pub pocket: Pocket,
    /// Signed amount in minor units.
    pub amount: Amount,
}

impl Delta {
    /// Adds `amount` to the account's spendable balance.
    pub fn credit(account: AccountId, amount: Amount) -> Delta {
        Delta {
            account,
            pocket: Pocket::Balance,
            amount,
        }
    }

    /// Removes `amount` from the account's spendable balance.
    pub fn debit(account: AccountId, amount: Amount) -> Delta {
        Delta {
            account,
            pocket: Pocket::Balance,
            amount: -amount,
        }
    }

    fn hold_credit(account: AccountId, amount: Amount) -> Delta {
        Delta {
            account,
            pocket: Pocket::Hold,
            amount,
        }
    }

    fn hold_debit(account: AccountId, amount: Amount) -> Delta {
        Delta {
            account,
            pocket: Pocket::Hold,
            amount: -amount,
        }
    }

    /// Moves `amount` from the account's balance into its hold pocket.
    pub fn hold_add(account: AccountId, amount: Amount) -> [Delta; 2] {
        [
            Delta::debit(account.clone(), amount),
            Delta::hold_credit(account, amount),
        ]
    }

    /// Moves `amount` from the account's hold pocket back to its balance.
    pub fn hold_release_to_balance(account: AccountId, amount: Amount) -> [Delta; 2] {
        [
            Delta::hold_debit(account.clone(), amount),
            Delta::credit(account, amount),
        ]
    }

    /// Settles `amount` from `from`'s hold pocket into `to`'s balance.
    pub fn hold_release_to_other(from: AccountId, to: AccountId, amount: Amount) -> [Delta; 2] {
        [Delta::hold_debit(from, amount), Delta::credit(to, amount)]
    }
}

/// One immutable audit record. Append-only; never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Unique entry identifier.
    pub entry_id: EntryId,

    /// Account whose state this entry changed.
    pub account_id: AccountId,

    /// Signed amount applied; negative = debit, positive = credit.
    pub delta: Amount,

    /// Pocket the delta landed in.
    pub pocket: Pocket,

    /// Movement kind shared by all entries of the movement.
    pub kind: EntryKind,

    /// Groups the entries belonging to one atomic movement.
    pub movement_id: MovementId,

    /// Account balance immediately after this delta applied.
    pub balance_after: Amount,

    /// Account hold immediately after this delta applied.
    pub hold_after: Amount,

    /// Append timestamp.
    pub created_at: DateTime<Utc>,
}

/// Entry log plus lookup indexes, guarded by one lock so queries never see
/// an entry in one index and not the other.
#[derive(Default)]
struct LedgerLog {
    entries: Vec<LedgerEntry>,
    by_account: HashMap<AccountId, Vec<usize>>,
    by_movement: HashMap<MovementId, Vec<usize>>,
}

impl LedgerLog {
    fn append(&mut self, new_entries: &[LedgerEntry]) {
        for entry in new_entries {
            let idx = self.entries.len();
            self.by_account
                .entry(entry.account_id.clone())
                .or_default()
                .push(idx);
            self.by_movement
                .entry(entry.movement_id)
                .or_default()
                .push(idx);
            self.entries.push(entry.clone());
        }
    }

    fn collect(&self, indexes: Option<&Vec<usize>>) -> Vec<LedgerEntry> {
        indexes
            .map(|idxs| idxs.iter().map(|&i| self.entries[i].clone()).collect())
            .unwrap_or_default()
    }
}

/// The append-only ledger over a shared account store.
pub struct Ledger {
    store: Arc<AccountStore>,
    log: RwLock<LedgerLog>,
}

impl Ledger {
    /// Creates an empty ledger over the given store.
    pub fn new(store: Arc<AccountStore>) -> Self {
        Ledger {
            store,
            log: RwLock::new(LedgerLog::default()),
        }
    }

    /// Applies one movement atomically and appends its entries.
    ///
    /// Validation happens before any account is touched: a movement with no
    /// deltas, a non-external movement whose deltas do not sum to zero, or a
    /// movement id already present in the log is rejected as a contract
    /// violation. Then every touched account is locked in lexicographic id
    /// order and the deltas apply in the order given. If any delta would
    /// violate an account invariant the applied prefix is undone and the
    /// movement fails as a whole; no entry is appended for a partially
    /// applied movement.
    ///
    /// On success, returns the appended entries, each stamped with the
    /// account's `balance_after`/`hold_after` at its point in the sequence.
    pub fn apply_movement(
        &self,
        kind: EntryKind,
        movement_id: MovementId,
        deltas: Vec<Delta>,
    ) -> Result<Vec<LedgerEntry>> {
        if deltas.is_empty() {
            return Err(EngineError::EmptyMovement(movement_id));
        }

        if !kind.is_external() {
            let sum: i128 = deltas
                .iter()
                .map(|d| d.amount.minor_units() as i128)
                .sum();
            if sum != 0 {
                return Err(EngineError::UnbalancedMovement {
                    movement: movement_id,
                    sum,
                });
            }
        }

        // Best-effort duplicate guard; orchestrator ids are random v4, so a
        // hit here means a caller replayed its own movement id.
        {
            let log = self.log.read().map_err(|_| EngineError::LockPoisoned)?;
            if log.by_movement.contains_key(&movement_id) {
                return Err(EngineError::DuplicateMovement(movement_id));
            }
        }

        let mut touched: Vec<AccountId> = deltas.iter().map(|d| d.account.clone()).collect();
        touched.sort();
        touched.dedup();

        let mut slots = Vec::with_capacity(touched.len());
        for id in &touched {
            match self.store.slot(id)? {
                Some(slot) => slots.push(slot),
                None => return Err(EngineError::UnregisteredAccount(id.clone())),
            }
        }

        // Lock in sorted id order; every movement acquires multi-account
        // locks in this same order, which rules out lock-order deadlock.
        let mut guards = Vec::with_capacity(slots.len());
        for slot in &slots {
            let guard = slot.account.lock().map_err(|_| EngineError::LockPoisoned)?;
            guards.push(guard);
        }

        let mut applied: Vec<(usize, Pocket, Amount)> = Vec::with_capacity(deltas.len());
        let mut stamps: Vec<(Amount, Amount)> = Vec::with_capacity(deltas.len());
        let mut failure = None;

        for delta in &deltas {
            // Safety: touched was built from these same deltas above.
            let idx = touched
                .binary_search(&delta.account)
                .expect("touched account resolved");

            if guards[idx].apply(delta.pocket, delta.amount) {
                applied.push((idx, delta.pocket, delta.amount));
                stamps.push((guards[idx].balance, guards[idx].hold));
            } else {
                failure = Some(failed_delta(delta, &guards[idx]));
                break;
            }
        }

        if let Some(err) = failure {
            Self::unwind(&mut guards, &applied);
            return Err(err);
        }

        let now = Utc::now();
        let entries: Vec<LedgerEntry> = deltas
            .iter()
            .zip(&stamps)
            .map(|(delta, &(balance_after, hold_after))| LedgerEntry {
                entry_id: EntryId::generate(),
                account_id: delta.account.clone(),
                delta: delta.amount,
                pocket: delta.pocket,
                kind,
                movement_id,
                balance_after,
                hold_after,
                created_at: now,
            })
            .collect();

        match self.log.write() {
            Ok(mut log) => log.append(&entries),
            Err(_) => {
                Self::unwind(&mut guards, &applied);
                return Err(EngineError::LockPoisoned);
            }
        }

        if kind.settles_value() {
            for (idx, _, amount) in &applied {
                guards[*idx].record_settled(*amount);
            }
        }

        #[cfg(debug_assertions)]
        for guard in &guards {
            debug_assert!(guard.check_invariant());
        }

        Ok(entries)
    }

    /// Undoes an applied prefix in reverse order, while the account guards
    /// are still held.
    fn unwind(
        guards: &mut [std::sync::MutexGuard<'_, Account>],
        applied: &[(usize, Pocket, Amount)],
    ) {
        for (idx, pocket, amount) in applied.iter().rev() {
            let undone = guards[*idx].apply(*pocket, -*amount);
            debug_assert!(undone, "inverse of an applied delta cannot fail");
        }
    }

    /// All entries touching one account, in append order.
    pub fn entries_for_account(&self, id: &AccountId) -> Result<Vec<LedgerEntry>> {
        let log = self.log.read().map_err(|_| EngineError::LockPoisoned)?;
        Ok(log.collect(log.by_account.get(id)))
    }

    /// All entries of one movement, in debit-before-credit order.
    pub fn entries_for_movement(&self, movement_id: &MovementId) -> Result<Vec<LedgerEntry>> {
        let log = self.log.read().map_err(|_| EngineError::LockPoisoned)?;
        Ok(log.collect(log.by_movement.get(movement_id)))
    }

    /// Checks value conservation for one recorded movement.
    ///
    /// External movements (funding, withdrawal) verify trivially; for every
    /// other kind the entry deltas must sum to zero. Returns `false` for a
    /// movement the log has never seen.
    pub fn verify_movement(&self, movement_id: &MovementId) -> Result<bool> {
        let entries = self.entries_for_movement(movement_id)?;
        match entries.first() {
            None => Ok(false),
            Some(first) if first.kind.is_external() => Ok(true),
            Some(_) => {
                let sum: i128 = entries
                    .iter()
                    .map(|e| e.delta.minor_units() as i128)
                    .sum();
                Ok(sum == 0)
            }
        }
    }
}

/// Maps a refused delta to the caller-facing error.
///
/// A refused debit is the business-level insufficient-funds case; a refused
/// credit can only be counter overflow, which is a fault.
fn failed_delta(delta: &Delta, account: &Account) -> EngineError {
    if delta.amount.is_positive() {
        EngineError::BalanceOverflow(delta.account.clone())
    } else {
        let available = match delta.pocket {
            Pocket::Balance => account.balance,
            Pocket::Hold => account.hold,
        };
        EngineError::InsufficientFunds {
            account: delta.account.clone(),
            available,
            requested: -delta.amount,
        }
    }
}
