//! Error types for the payment engine and the replay CLI.

use crate::account::AccountId;
use crate::amount::Amount;
use crate::escrow::EscrowId;
use crate::ledger::MovementId;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned by engine operations.
///
/// The first eight variants are business failures with stable
/// machine-readable codes (see [`EngineError::code`]); they are valid,
/// cacheable outcomes of an operation. The remaining variants are contract
/// violations or internal faults: they carry no code, are never cached, and
/// indicate a bug in the caller or a panicked thread rather than a normal
/// business condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The payer's policy has the account paused.
    #[error("payer account {0} is paused")]
    AgentPaused(AccountId),

    /// The payer's allowlist is non-empty and does not contain the payee.
    #[error("recipient {to} is not on the payer's allowlist")]
    RecipientNotAllowed { to: AccountId },

    /// The amount is above the payer's per-transaction ceiling.
    #[error("amount {requested} exceeds the per-transaction limit {limit}")]
    AmountExceedsLimit { limit: Amount, requested: Amount },

    /// A debit would drive `balance` (or `hold`) negative.
    #[error("insufficient funds in {account}: {available} available, {requested} requested")]
    InsufficientFunds {
        account: AccountId,
        available: Amount,
        requested: Amount,
    },

    /// The paying account is not registered.
    #[error("payer account {0} is not registered")]
    PayerNotFound(AccountId),

    /// The receiving account is not registered.
    #[error("payee account {0} is not registered")]
    PayeeNotFound(AccountId),

    /// The escrow is unknown or already released/cancelled.
    #[error("escrow {0} is not active")]
    EscrowNotActive(EscrowId),

    /// Boundary amounts must be strictly positive.
    #[error("amount must be a positive number of minor units, got {amount}")]
    InvalidAmount { amount: Amount },

    /// A non-funding movement whose deltas do not sum to zero.
    #[error("movement {movement} deltas sum to {sum}, expected zero")]
    UnbalancedMovement { movement: MovementId, sum: i128 },

    /// A movement with no deltas at all.
    #[error("movement {0} carries no deltas")]
    EmptyMovement(MovementId),

    /// A movement id that already has entries in the log.
    #[error("movement {0} was already applied")]
    DuplicateMovement(MovementId),

    /// A movement referenced an account the store has never seen.
    #[error("account {0} is not registered")]
    UnregisteredAccount(AccountId),

    /// A credit would overflow the account's balance counter.
    #[error("balance overflow on account {0}")]
    BalanceOverflow(AccountId),

    /// A lock was poisoned by a panicked thread.
    #[error("internal lock poisoned by a panicked thread")]
    LockPoisoned,
}

impl EngineError {
    /// Stable machine-readable code for business failures.
    ///
    /// Returns `None` for contract violations and internal faults, which are
    /// not part of the coded error surface.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            EngineError::AgentPaused(_) => Some("AGENT_PAUSED"),
            EngineError::RecipientNotAllowed { .. } => Some("RECIPIENT_NOT_ALLOWED"),
            EngineError::AmountExceedsLimit { .. } => Some("AMOUNT_EXCEEDS_LIMIT"),
            EngineError::InsufficientFunds { .. } => Some("INSUFFICIENT_FUNDS"),
            EngineError::PayerNotFound(_) => Some("PAYER_NOT_FOUND"),
            EngineError::PayeeNotFound(_) => Some("PAYEE_NOT_FOUND"),
            EngineError::EscrowNotActive(_) => Some("ESCROW_NOT_ACTIVE"),
            EngineError::InvalidAmount { .. } => Some("INVALID_AMOUNT"),
            EngineError::UnbalancedMovement { .. }
            | EngineError::EmptyMovement(_)
            | EngineError::DuplicateMovement(_)
            | EngineError::UnregisteredAccount(_)
            | EngineError::BalanceOverflow(_)
            | EngineError::LockPoisoned => None,
        }
    }
}

/// Errors that can occur while driving the engine from a CSV replay file.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// Failed to open or read the input file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing error
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    /// The engine refused an operation the replay could not skip
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Missing input file argument
    #[error("Missing input file argument. Usage: payrail <input.csv>")]
    MissingArgument,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_failures_carry_stable_codes() {
        assert_eq!(
            EngineError::AgentPaused(AccountId::new("alice")).code(),
            Some("AGENT_PAUSED")
        );
        assert_eq!(
            EngineError::PayerNotFound(AccountId::new("ghost")).code(),
            Some("PAYER_NOT_FOUND")
        );
        assert_eq!(
            EngineError::InvalidAmount {
                amount: Amount::ZERO
            }
            .code(),
            Some("INVALID_AMOUNT")
        );
    }

    #[test]
    fn test_faults_carry_no_code() {
        assert_eq!(EngineError::LockPoisoned.code(), None);
        assert_eq!(
            EngineError::DuplicateMovement(MovementId::generate()).code(),
            None
        );
    }
}
