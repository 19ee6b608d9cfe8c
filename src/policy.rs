//! Per-account spending guardrails.
//!
//! A policy is read-only input to evaluation: it never touches balances or
//! the ledger, and it is re-evaluated on every attempt (no caching of
//! outcomes).

use crate::account::AccountId;
use crate::amount::Amount;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Spending guardrails attached to one account.
///
/// The default policy permits everything: not paused, unrestricted
/// allowlist, no per-transaction ceiling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// When `true`, every outgoing movement is denied.
    pub paused: bool,

    /// Permitted counterparties. An empty set means unrestricted.
    pub allowlist: HashSet<AccountId>,

    /// Optional ceiling on the amount of a single movement.
    pub max_per_transaction: Option<Amount>,
}

impl Policy {
    /// Evaluates a proposed movement against this policy.
    ///
    /// Checks run in a fixed order so the reported denial is deterministic:
    ///
    /// 1. `paused` → [`EngineError::AgentPaused`]
    /// 2. non-empty allowlist missing `to` → [`EngineError::RecipientNotAllowed`]
    /// 3. amount above `max_per_transaction` → [`EngineError::AmountExceedsLimit`]
    ///
    /// Fund sufficiency is deliberately not checked here; that is the
    /// ledger's concern at apply time.
    pub fn evaluate(&self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<()> {
        if self.paused {
            return Err(EngineError::AgentPaused(from.clone()));
        }

        if !self.allowlist.is_empty() && !self.allowlist.contains(to) {
            return Err(EngineError::RecipientNotAllowed { to: to.clone() });
        }

        if let Some(limit) = self.max_per_transaction {
            if amount > limit {
                return Err(EngineError::AmountExceedsLimit {
                    limit,
                    requested: amount,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> AccountId {
        AccountId::new(s)
    }

    #[test]
    fn test_default_policy_allows_everything() {
        let policy = Policy::default();
        assert!(policy
            .evaluate(&id("alice"), &id("bob"), Amount::new(1_000_000))
            .is_ok());
    }

    #[test]
    fn test_paused_denies() {
        let policy = Policy {
            paused: true,
            ..Policy::default()
        };
        let err = policy
            .evaluate(&id("alice"), &id("bob"), Amount::new(1))
            .unwrap_err();
        assert_eq!(err.code(), Some("AGENT_PAUSED"));
    }

    #[test]
    fn test_empty_allowlist_is_unrestricted() {
        let policy = Policy::default();
        assert!(policy.allowlist.is_empty());
        assert!(policy
            .evaluate(&id("alice"), &id("anyone"), Amount::new(10))
            .is_ok());
    }

    #[test]
    fn test_allowlist_restricts_counterparties() {
        let mut policy = Policy::default();
        policy.allowlist.insert(id("bob"));

        assert!(policy.evaluate(&id("alice"), &id("bob"), Amount::new(10)).is_ok());
        let err = policy
            .evaluate(&id("alice"), &id("mallory"), Amount::new(10))
            .unwrap_err();
        assert_eq!(err.code(), Some("RECIPIENT_NOT_ALLOWED"));
    }

    #[test]
    fn test_limit_is_inclusive() {
        let policy = Policy {
            max_per_transaction: Some(Amount::new(6000)),
            ..Policy::default()
        };

        assert!(policy.evaluate(&id("alice"), &id("bob"), Amount::new(6000)).is_ok());
        let err = policy
            .evaluate(&id("alice"), &id("bob"), Amount::new(6001))
            .unwrap_err();
        assert_eq!(err.code(), Some("AMOUNT_EXCEEDS_LIMIT"));
    }

    #[test]
    fn test_checks_run_in_fixed_order() {
        // Paused wins over an allowlist violation, which wins over the limit.
        let mut policy = Policy {
            paused: true,
            max_per_transaction: Some(Amount::new(100)),
            ..Policy::default()
        };
        policy.allowlist.insert(id("bob"));

        let err = policy
            .evaluate(&id("alice"), &id("mallory"), Amount::new(500))
            .unwrap_err();
        assert_eq!(err.code(), Some("AGENT_PAUSED"));

        policy.paused = false;
        let err = policy
            .evaluate(&id("alice"), &id("mallory"), Amount::new(500))
            .unwrap_err();
        assert_eq!(err.code(), Some("RECIPIENT_NOT_ALLOWED"));

        let err = policy
            .evaluate(&id("alice"), &id("bob"), Amount::new(500))
            .unwrap_err();
        assert_eq!(err.code(), Some("AMOUNT_EXCEEDS_LIMIT"));
    }
}
