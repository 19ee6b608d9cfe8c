//! Payment orchestration: the public operations of the engine.
//!
//! Ties policy evaluation, the idempotency cache, the ledger, and the
//! escrow book together. Every operation validates its amount before
//! anything else, consults the idempotency cache when a key is supplied,
//! and commits only coded outcomes: contract faults never become cached
//! results.

use crate::account::{Account, AccountId};
use crate::amount::Amount;
use crate::error::{EngineError, Result};
use crate::escrow::{Escrow, EscrowBook, EscrowId, EscrowStatus};
use crate::idempotency::{IdempotencyCache, Lookup};
use crate::ledger::{Delta, EntryKind, Ledger, LedgerEntry, MovementId};
use crate::policy::Policy;
use crate::store::AccountStore;
use chrono::Utc;
use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;

/// Proof of one applied movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    /// The movement the operation produced.
    pub movement_id: MovementId,

    /// Kind of the movement.
    pub kind: EntryKind,

    /// The appended ledger entries, in debit-before-credit order.
    pub entries: Vec<LedgerEntry>,

    /// The escrow the movement created or closed, if any.
    pub escrow_id: Option<EscrowId>,
}

/// The payment engine.
///
/// Owns all shared state explicitly; tests construct a fresh engine per
/// case. Methods take `&self` and are safe to call from multiple threads:
/// serialization happens per account inside the ledger, per escrow in the
/// book, and per key in the idempotency cache.
pub struct PaymentEngine {
    store: Arc<AccountStore>,
    ledger: Ledger,
    escrows: EscrowBook,
    idempotency: IdempotencyCache,
}

impl PaymentEngine {
    /// Creates an engine with no accounts, no entries, no escrows.
    pub fn new() -> Self {
        let store = Arc::new(AccountStore::new());
        PaymentEngine {
            ledger: Ledger::new(Arc::clone(&store)),
            store,
            escrows: EscrowBook::new(),
            idempotency: IdempotencyCache::new(),
        }
    }

    // ---- registration and policy (collaborator surface) ----

    /// Registers an account with zero balances and a default policy.
    ///
    /// Returns `false` if the id was already registered.
    pub fn register_account(&self, id: impl Into<AccountId>) -> Result<bool> {
        let id = id.into();
        let created = self.store.register(id.clone())?;
        if created {
            debug!("registered account {id}");
        } else {
            debug!("account {id} already registered, keeping existing state");
        }
        Ok(created)
    }

    /// Returns a copy of the account's policy, or `None` if unregistered.
    pub fn policy(&self, id: impl Into<AccountId>) -> Result<Option<Policy>> {
        self.store.policy(&id.into())
    }

    /// Replaces the account's policy. Returns `false` if unregistered.
    pub fn set_policy(&self, id: impl Into<AccountId>, policy: Policy) -> Result<bool> {
        let id = id.into();
        let updated = self.store.set_policy(&id, policy)?;
        if updated {
            debug!("updated policy for {id}");
        }
        Ok(updated)
    }

    // ---- operations ----

    /// Credits external value into an account.
    ///
    /// Administrative: not subject to the account's own spending policy.
    pub fn fund(
        &self,
        account: impl Into<AccountId>,
        amount: Amount,
        key: Option<&str>,
    ) -> Result<Receipt> {
        let account = account.into();
        validate_amount(amount)?;
        self.keyed(EntryKind::Funding, key, || self.fund_fresh(&account, amount))
    }

    fn fund_fresh(&self, account: &AccountId, amount: Amount) -> Result<Receipt> {
        if !self.store.contains(account)? {
            return Err(EngineError::PayeeNotFound(account.clone()));
        }

        let movement_id = MovementId::generate();
        let entries = self.ledger.apply_movement(
            EntryKind::Funding,
            movement_id,
            vec![Delta::credit(account.clone(), amount)],
        )?;
        debug!("funded {account} with {amount} (movement {movement_id})");
        Ok(Receipt {
            movement_id,
            kind: EntryKind::Funding,
            entries,
            escrow_id: None,
        })
    }

    /// Debits external value out of an account.
    ///
    /// Administrative: no policy check, but the balance must cover the
    /// amount.
    pub fn withdraw(
        &self,
        account: impl Into<AccountId>,
        amount: Amount,
        key: Option<&str>,
    ) -> Result<Receipt> {
        let account = account.into();
        validate_amount(amount)?;
        self.keyed(EntryKind::Withdrawal, key, || {
            self.withdraw_fresh(&account, amount)
        })
    }

    fn withdraw_fresh(&self, account: &AccountId, amount: Amount) -> Result<Receipt> {
        if !self.store.contains(account)? {
            return Err(EngineError::PayerNotFound(account.clone()));
        }

        let movement_id = MovementId::generate();
        let entries = match self.ledger.apply_movement(
            EntryKind::Withdrawal,
            movement_id,
            vec![Delta::debit(account.clone(), amount)],
        ) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("withdrawal of {amount} from {account} failed: {err}");
                return Err(err);
            }
        };
        debug!("withdrew {amount} from {account} (movement {movement_id})");
        Ok(Receipt {
            movement_id,
            kind: EntryKind::Withdrawal,
            entries,
            escrow_id: None,
        })
    }

    /// Pays `amount` from one account to another.
    ///
    /// Order of checks: amount validity, idempotency, payer and payee
    /// existence, payer policy, then the PAYMENT movement. A policy denial
    /// is a definitive outcome: retried under the same key it returns the
    /// same denial without re-evaluating.
    pub fn pay(
        &self,
        from: impl Into<AccountId>,
        to: impl Into<AccountId>,
        amount: Amount,
        key: Option<&str>,
    ) -> Result<Receipt> {
        let from = from.into();
        let to = to.into();
        validate_amount(amount)?;
        self.keyed(EntryKind::Payment, key, || {
            self.pay_fresh(&from, &to, amount)
        })
    }

    fn pay_fresh(&self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<Receipt> {
        let policy = match self.store.policy(from)? {
            Some(policy) => policy,
            None => return Err(EngineError::PayerNotFound(from.clone())),
        };
        if !self.store.contains(to)? {
            return Err(EngineError::PayeeNotFound(to.clone()));
        }
        if let Err(denied) = policy.evaluate(from, to, amount) {
            warn!("payment {from} -> {to} of {amount} denied: {denied}");
            return Err(denied);
        }

        let movement_id = MovementId::generate();
        let entries = match self.ledger.apply_movement(
            EntryKind::Payment,
            movement_id,
            vec![
                Delta::debit(from.clone(), amount),
                Delta::credit(to.clone(), amount),
            ],
        ) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("payment {from} -> {to} of {amount} failed: {err}");
                return Err(err);
            }
        };
        debug!("paid {amount} from {from} to {to} (movement {movement_id})");
        Ok(Receipt {
            movement_id,
            kind: EntryKind::Payment,
            entries,
            escrow_id: None,
        })
    }

    /// Locks `amount` of the payer's balance for a new escrow.
    ///
    /// Policy is evaluated here exactly as for a payment; release and
    /// cancel never re-check it, the funds are already committed.
    pub fn create_escrow(
        &self,
        from: impl Into<AccountId>,
        to: impl Into<AccountId>,
        amount: Amount,
        key: Option<&str>,
    ) -> Result<Receipt> {
        let from = from.into();
        let to = to.into();
        validate_amount(amount)?;
        self.keyed(EntryKind::EscrowLock, key, || {
            self.create_escrow_fresh(&from, &to, amount)
        })
    }

    fn create_escrow_fresh(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<Receipt> {
        let policy = match self.store.policy(from)? {
            Some(policy) => policy,
            None => return Err(EngineError::PayerNotFound(from.clone())),
        };
        if !self.store.contains(to)? {
            return Err(EngineError::PayeeNotFound(to.clone()));
        }
        if let Err(denied) = policy.evaluate(from, to, amount) {
            warn!("escrow {from} -> {to} of {amount} denied: {denied}");
            return Err(denied);
        }

        let escrow_id = EscrowId::generate();
        let movement_id = MovementId::generate();
        let entries = match self.ledger.apply_movement(
            EntryKind::EscrowLock,
            movement_id,
            Delta::hold_add(from.clone(), amount).to_vec(),
        ) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("escrow {from} -> {to} of {amount} failed to lock: {err}");
                return Err(err);
            }
        };

        self.escrows.open(Escrow {
            escrow_id,
            from_account: from.clone(),
            to_account: to.clone(),
            amount,
            status: EscrowStatus::Locked,
            created_movement_id: movement_id,
            closing_movement_id: None,
            created_at: Utc::now(),
            closed_at: None,
        })?;
        debug!("escrow {escrow_id}: locked {amount} from {from} for {to} (movement {movement_id})");
        Ok(Receipt {
            movement_id,
            kind: EntryKind::EscrowLock,
            entries,
            escrow_id: Some(escrow_id),
        })
    }

    /// Settles a locked escrow's funds to its counterparty.
    pub fn release_escrow(&self, escrow_id: EscrowId, key: Option<&str>) -> Result<Receipt> {
        self.keyed(EntryKind::EscrowRelease, key, || {
            self.release_escrow_fresh(escrow_id)
        })
    }

    fn release_escrow_fresh(&self, escrow_id: EscrowId) -> Result<Receipt> {
        let closed = self
            .escrows
            .close_with(&escrow_id, EscrowStatus::Released, |escrow, movement_id| {
                self.ledger.apply_movement(
                    EntryKind::EscrowRelease,
                    movement_id,
                    Delta::hold_release_to_other(
                        escrow.from_account.clone(),
                        escrow.to_account.clone(),
                        escrow.amount,
                    )
                    .to_vec(),
                )
            });
        let (escrow, entries) = match closed {
            Ok(pair) => pair,
            Err(err) => {
                warn!("escrow {escrow_id}: release rejected: {err}");
                return Err(err);
            }
        };

        // Safety: close_with stamps the closing movement on success.
        let movement_id = escrow
            .closing_movement_id
            .expect("closed escrow carries its closing movement");
        debug!(
            "escrow {escrow_id}: released {} from {} to {} (movement {movement_id})",
            escrow.amount, escrow.from_account, escrow.to_account
        );
        Ok(Receipt {
            movement_id,
            kind: EntryKind::EscrowRelease,
            entries,
            escrow_id: Some(escrow_id),
        })
    }

    /// Returns a locked escrow's funds to the payer's balance.
    pub fn cancel_escrow(&self, escrow_id: EscrowId, key: Option<&str>) -> Result<Receipt> {
        self.keyed(EntryKind::EscrowCancel, key, || {
            self.cancel_escrow_fresh(escrow_id)
        })
    }

    fn cancel_escrow_fresh(&self, escrow_id: EscrowId) -> Result<Receipt> {
        let closed = self
            .escrows
            .close_with(&escrow_id, EscrowStatus::Cancelled, |escrow, movement_id| {
                self.ledger.apply_movement(
                    EntryKind::EscrowCancel,
                    movement_id,
                    Delta::hold_release_to_balance(escrow.from_account.clone(), escrow.amount)
                        .to_vec(),
                )
            });
        let (escrow, entries) = match closed {
            Ok(pair) => pair,
            Err(err) => {
                warn!("escrow {escrow_id}: cancel rejected: {err}");
                return Err(err);
            }
        };

        // Safety: close_with stamps the closing movement on success.
        let movement_id = escrow
            .closing_movement_id
            .expect("closed escrow carries its closing movement");
        debug!(
            "escrow {escrow_id}: cancelled, {} returned to {} (movement {movement_id})",
            escrow.amount, escrow.from_account
        );
        Ok(Receipt {
            movement_id,
            kind: EntryKind::EscrowCancel,
            entries,
            escrow_id: Some(escrow_id),
        })
    }

    // ---- queries ----

    /// Point-in-time snapshot of one account.
    pub fn account(&self, id: impl Into<AccountId>) -> Result<Option<Account>> {
        self.store.snapshot(&id.into())
    }

    /// Snapshots of every account, sorted by id.
    pub fn accounts(&self) -> Result<Vec<Account>> {
        self.store.snapshots()
    }

    /// All entries touching one account, in append order.
    pub fn entries_for_account(&self, id: impl Into<AccountId>) -> Result<Vec<LedgerEntry>> {
        self.ledger.entries_for_account(&id.into())
    }

    /// All entries of one movement, in debit-before-credit order.
    pub fn entries_for_movement(&self, movement_id: &MovementId) -> Result<Vec<LedgerEntry>> {
        self.ledger.entries_for_movement(movement_id)
    }

    /// Checks value conservation for one recorded movement.
    pub fn verify_movement(&self, movement_id: &MovementId) -> Result<bool> {
        self.ledger.verify_movement(movement_id)
    }

    /// Point-in-time copy of one escrow.
    pub fn escrow(&self, escrow_id: &EscrowId) -> Result<Option<Escrow>> {
        self.escrows.get(escrow_id)
    }

    /// Escrows the account participates in, oldest first.
    pub fn escrows_for_account(&self, id: impl Into<AccountId>) -> Result<Vec<Escrow>> {
        self.escrows.for_account(&id.into())
    }

    // ---- idempotency plumbing ----

    /// Runs an operation through the idempotency cache.
    ///
    /// Without a key the operation executes fresh and nothing is cached.
    /// With a key, a committed outcome is returned verbatim; otherwise the
    /// operation runs under a reservation and its outcome is committed if
    /// definitive (success or coded failure). Faults leave the reservation
    /// to release on drop, so a retry can execute fresh.
    fn keyed<F>(&self, op: EntryKind, key: Option<&str>, run: F) -> Result<Receipt>
    where
        F: FnOnce() -> Result<Receipt>,
    {
        let key = match key {
            Some(key) => key,
            None => return run(),
        };

        match self.idempotency.get_or_reserve(op, key)? {
            Lookup::Hit(outcome) => {
                debug!("idempotency hit for {op} key {key:?}");
                outcome
            }
            Lookup::Miss(reservation) => {
                let outcome = run();
                let definitive = match &outcome {
                    Ok(_) => true,
                    Err(err) => err.code().is_some(),
                };
                if definitive {
                    reservation.commit(&outcome)?;
                }
                outcome
            }
        }
    }
}

impl Default for PaymentEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Rejects non-positive boundary amounts before any other check.
fn validate_amount(amount: Amount) -> Result<()> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(EngineError::InvalidAmount { amount })
    }
}
