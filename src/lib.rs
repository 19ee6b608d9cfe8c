//! # Payrail
//!
//! A transactional accounting core for agent-driven payments: a
//! double-entry ledger with policy guardrails, escrowed transfers, and
//! idempotent orchestration.
//!
//! ## Design Principles
//!
//! - **Integer minor units**: all value is `i64` minor units, never floats
//! - **Value conservation**: internal movements balance to zero, checked on
//!   every apply and re-checkable per movement afterwards
//! - **Atomic movements**: a multi-account update lands fully or not at all
//! - **Stable refusal codes**: callers branch on codes, not message text
//! - **Deterministic replay**: CSV operations in, sorted account report out
//!
//! ## Example
//!
//! ```
//! use payrail::{Amount, PaymentEngine};
//!
//! let engine = PaymentEngine::new();
//! engine.register_account("alice").unwrap();
//! engine.register_account("bob").unwrap();
//! engine.fund("alice", Amount::new(10_000), None).unwrap();
//!
//! let receipt = engine.pay("alice", "bob", Amount::new(2_500), None).unwrap();
//! assert_eq!(receipt.entries.len(), 2);
//!
//! let bob = engine.account("bob").unwrap().unwrap();
//! assert_eq!(bob.balance, Amount::new(2_500));
//! ```

pub mod account;
pub mod amount;
pub mod engine;
pub mod error;
pub mod escrow;
pub mod idempotency;
pub mod ledger;
pub mod policy;
pub mod replay;
pub mod store;

pub use account::{Account, AccountId, Pocket};
pub use amount::Amount;
pub use engine::{PaymentEngine, Receipt};
pub use error::{EngineError, ReplayError, Result};
pub use escrow::{Escrow, EscrowId, EscrowStatus};
pub use idempotency::{IdempotencyCache, Lookup, Outcome, Reservation};
pub use ledger::{Delta, EntryId, EntryKind, Ledger, LedgerEntry, MovementId};
pub use policy::Policy;
pub use replay::{Command, Replay, ReplayRecord};
pub use store::AccountStore;
