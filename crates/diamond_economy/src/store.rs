//! # Account Stores
//!
//! Persistence collaborators for account records.
//!
//! The engine only needs `exists`, `load` and `store`, and relies on one
//! guarantee: a `load` that follows a `store` for the same account returns
//! the stored record.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::account::AccountEconomy;
use crate::error::EconomyResult;

/// Opaque account identity.
pub type AccountId = u64;

/// Storage backend for account records.
pub trait EconomyStore: Send + Sync {
    /// Whether a record exists for `account`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn exists(&self, account: AccountId) -> EconomyResult<bool>;

    /// Loads the record for `account`, if any.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn load(&self, account: AccountId) -> EconomyResult<Option<AccountEconomy>>;

    /// Stores the record for `account`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Backend failures. A failed store leaves the previous record in place.
    fn store(&self, account: AccountId, record: &AccountEconomy) -> EconomyResult<()>;

    /// All accounts with a record, in ascending order.
    fn accounts(&self) -> Vec<AccountId>;
}

impl<S: EconomyStore + ?Sized> EconomyStore for Box<S> {
    fn exists(&self, account: AccountId) -> EconomyResult<bool> {
        (**self).exists(account)
    }

    fn load(&self, account: AccountId) -> EconomyResult<Option<AccountEconomy>> {
        (**self).load(account)
    }

    fn store(&self, account: AccountId, record: &AccountEconomy) -> EconomyResult<()> {
        (**self).store(account, record)
    }

    fn accounts(&self) -> Vec<AccountId> {
        (**self).accounts()
    }
}

/// Volatile store backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<AccountId, AccountEconomy>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-filled with records.
    #[must_use]
    pub fn with_records(records: HashMap<AccountId, AccountEconomy>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Number of stored accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no accounts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl EconomyStore for MemoryStore {
    fn exists(&self, account: AccountId) -> EconomyResult<bool> {
        Ok(self.records.read().contains_key(&account))
    }

    fn load(&self, account: AccountId) -> EconomyResult<Option<AccountEconomy>> {
        Ok(self.records.read().get(&account).cloned())
    }

    fn store(&self, account: AccountId, record: &AccountEconomy) -> EconomyResult<()> {
        self.records.write().insert(account, record.clone());
        Ok(())
    }

    fn accounts(&self) -> Vec<AccountId> {
        let mut accounts: Vec<_> = self.records.read().keys().copied().collect();
        accounts.sort_unstable();
        accounts
    }
}
