//! Shared registry of account state and policy.
//!
//! Each registered account lives in its own lock cell so the ledger can
//! serialize exactly the accounts a movement touches, nothing more. The
//! registry map itself is only write-locked on registration.

use crate::account::{Account, AccountId};
use crate::error::{EngineError, Result};
use crate::policy::Policy;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// One registered account: balance state and policy under separate locks.
///
/// The account mutex guards balance/hold mutation inside movements; the
/// policy lock is only taken for pre-flight reads and owner edits, so policy
/// traffic never contends with movement application.
pub(crate) struct AccountSlot {
    pub(crate) account: Mutex<Account>,
    pub(crate) policy: RwLock<Policy>,
}

impl AccountSlot {
    fn new(id: AccountId) -> Self {
        AccountSlot {
            account: Mutex::new(Account::new(id)),
            policy: RwLock::new(Policy::default()),
        }
    }
}

/// Registry of all known accounts.
///
/// Balance and hold are mutated only by the ledger, through
/// [`AccountStore::slot`]; everything public here is registration, policy
/// administration, and read-only snapshots.
pub struct AccountStore {
    accounts: RwLock<HashMap<AccountId, Arc<AccountSlot>>>,
}

impl AccountStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        AccountStore {
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Registers an account with zero balances and a default policy.
    ///
    /// Returns `false` if the id was already registered; existing state is
    /// never replaced.
    pub fn register(&self, id: AccountId) -> Result<bool> {
        let mut accounts = self.accounts.write().map_err(|_| EngineError::LockPoisoned)?;
        match accounts.entry(id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(AccountSlot::new(id)));
                Ok(true)
            }
        }
    }

    /// Returns `true` if the account is registered.
    pub fn contains(&self, id: &AccountId) -> Result<bool> {
        let accounts = self.accounts.read().map_err(|_| EngineError::LockPoisoned)?;
        Ok(accounts.contains_key(id))
    }

    /// Hands out the lock cell for one account.
    pub(crate) fn slot(&self, id: &AccountId) -> Result<Option<Arc<AccountSlot>>> {
        let accounts = self.accounts.read().map_err(|_| EngineError::LockPoisoned)?;
        Ok(accounts.get(id).cloned())
    }

    /// Returns a point-in-time copy of one account's state.
    pub fn snapshot(&self, id: &AccountId) -> Result<Option<Account>> {
        match self.slot(id)? {
            Some(slot) => {
                let account = slot.account.lock().map_err(|_| EngineError::LockPoisoned)?;
                Ok(Some(account.clone()))
            }
            None => Ok(None),
        }
    }

    /// Returns point-in-time copies of every account, sorted by id.
    pub fn snapshots(&self) -> Result<Vec<Account>> {
        let slots: Vec<Arc<AccountSlot>> = {
            let accounts = self.accounts.read().map_err(|_| EngineError::LockPoisoned)?;
            accounts.values().cloned().collect()
        };

        let mut snapshots = Vec::with_capacity(slots.len());
        for slot in slots {
            let account = slot.account.lock().map_err(|_| EngineError::LockPoisoned)?;
            snapshots.push(account.clone());
        }
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshots)
    }

    /// Returns a copy of the account's policy, or `None` if unregistered.
    pub fn policy(&self, id: &AccountId) -> Result<Option<Policy>> {
        match self.slot(id)? {
            Some(slot) => {
                let policy = slot.policy.read().map_err(|_| EngineError::LockPoisoned)?;
                Ok(Some(policy.clone()))
            }
            None => Ok(None),
        }
    }

    /// Replaces the account's policy.
    ///
    /// Returns `false` if the account is not registered. This is the
    /// account-owner admin surface; the ledger never writes policies.
    pub fn set_policy(&self, id: &AccountId, policy: Policy) -> Result<bool> {
        match self.slot(id)? {
            Some(slot) => {
                let mut current = slot.policy.write().map_err(|_| EngineError::LockPoisoned)?;
                *current = policy;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Default for AccountStore {
    fn default() -> Self {
        Self::new()
    }
}
