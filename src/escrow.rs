//! Escrow records and the lock → release | cancel state machine.
//!
//! An escrow is created by an ESCROW_LOCK movement and terminates exactly
//! once, through release or cancel. Terminal states are final.

use crate::account::AccountId;
use crate::amount::Amount;
use crate::error::{EngineError, Result};
use crate::ledger::{LedgerEntry, MovementId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use uuid::Uuid;

/// Unique identifier of one escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EscrowId(Uuid);

impl EscrowId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        EscrowId(Uuid::new_v4())
    }
}

impl fmt::Display for EscrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Escrow lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    /// Funds sit in the payer's hold pocket.
    Locked,
    /// Held funds settled to the payee. Terminal.
    Released,
    /// Held funds returned to the payer. Terminal.
    Cancelled,
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EscrowStatus::Locked => "LOCKED",
            EscrowStatus::Released => "RELEASED",
            EscrowStatus::Cancelled => "CANCELLED",
        })
    }
}

/// One escrow: funds locked on the payer until released or cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Escrow {
    /// Unique escrow identifier.
    pub escrow_id: EscrowId,

    /// Account whose balance funded the lock.
    pub from_account: AccountId,

    /// Counterparty receiving the funds on release.
    pub to_account: AccountId,

    /// Locked amount in minor units.
    pub amount: Amount,

    /// Current lifecycle state.
    pub status: EscrowStatus,

    /// Movement that locked the funds.
    pub created_movement_id: MovementId,

    /// Movement that released or cancelled, once terminal.
    pub closing_movement_id: Option<MovementId>,

    /// Lock timestamp.
    pub created_at: DateTime<Utc>,

    /// Termination timestamp, once terminal.
    pub closed_at: Option<DateTime<Utc>>,
}

/// Book of all escrows.
///
/// Transitions hold the book lock across their closing movement (book
/// before account locks, never the reverse), so a terminal transition
/// happens exactly once: of two racing closers, the loser re-reads the
/// terminal state and fails with ESCROW_NOT_ACTIVE.
pub(crate) struct EscrowBook {
    escrows: Mutex<HashMap<EscrowId, Escrow>>,
}

impl EscrowBook {
    pub(crate) fn new() -> Self {
        EscrowBook {
            escrows: Mutex::new(HashMap::new()),
        }
    }

    /// Records a newly locked escrow.
    pub(crate) fn open(&self, escrow: Escrow) -> Result<()> {
        let mut escrows = self.escrows.lock().map_err(|_| EngineError::LockPoisoned)?;
        escrows.insert(escrow.escrow_id, escrow);
        Ok(())
    }

    /// Runs a closing movement and marks the escrow terminal.
    ///
    /// Valid only from LOCKED: unknown ids and already-terminal escrows
    /// fail with ESCROW_NOT_ACTIVE before any ledger interaction. The
    /// closure performs the ledger movement; if it fails, the escrow stays
    /// LOCKED and untouched.
    pub(crate) fn close_with<F>(
        &self,
        id: &EscrowId,
        terminal: EscrowStatus,
        movement: F,
    ) -> Result<(Escrow, Vec<LedgerEntry>)>
    where
        F: FnOnce(&Escrow, MovementId) -> Result<Vec<LedgerEntry>>,
    {
        debug_assert!(terminal != EscrowStatus::Locked);

        let mut escrows = self.escrows.lock().map_err(|_| EngineError::LockPoisoned)?;
        let escrow = escrows
            .get_mut(id)
            .ok_or(EngineError::EscrowNotActive(*id))?;
        if escrow.status != EscrowStatus::Locked {
            return Err(EngineError::EscrowNotActive(*id));
        }

        let movement_id = MovementId::generate();
        let entries = movement(escrow, movement_id)?;

        escrow.status = terminal;
        escrow.closing_movement_id = Some(movement_id);
        escrow.closed_at = Some(Utc::now());
        Ok((escrow.clone(), entries))
    }

    /// Point-in-time copy of one escrow.
    pub(crate) fn get(&self, id: &EscrowId) -> Result<Option<Escrow>> {
        let escrows = self.escrows.lock().map_err(|_| EngineError::LockPoisoned)?;
        Ok(escrows.get(id).cloned())
    }

    /// Escrows the account participates in, oldest first.
    pub(crate) fn for_account(&self, id: &AccountId) -> Result<Vec<Escrow>> {
        let escrows = self.escrows.lock().map_err(|_| EngineError::LockPoisoned)?;
        let mut matched: Vec<Escrow> = escrows
            .values()
            .filter(|e| &e.from_account == id || &e.to_account == id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.escrow_id.cmp(&b.escrow_id))
        });
        Ok(matched)
    }
}
