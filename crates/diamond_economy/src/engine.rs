//! # Economy Engine
//!
//! The single entry point for every economic operation.
//!
//! ## The Purchase Path
//!
//! ```text
//! upgrade(account, index, amount)
//!   1. Lock the account
//!   2. Load record          -> GameStoreMissing
//!   3. Resolve powerup      -> UpgradeNotFound
//!   4. Settle accrual (on a copy)
//!   5. Check cost           -> InsufficientBalance
//!   6. Debit + add units (on the copy)
//!   7. Store the copy once
//! ```
//!
//! A failure at any step returns before step 7, so the stored record is
//! never partially updated.
//!
//! ## Thread Safety
//!
//! Operations on one account are serialized by a per-account mutex held from
//! load to store. Different accounts never share a lock. A mutex lives in
//! the lock table only while an operation on its account is in flight.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::account::{AccountEconomy, OwnedUpgrade};
use crate::catalog::PowerupCatalog;
use crate::clock::Clock;
use crate::error::{EconomyError, EconomyResult};
use crate::store::{AccountId, EconomyStore, MemoryStore};

/// Oldest events are dropped past this many undrained events.
pub const MAX_PENDING_EVENTS: usize = 10_000;

/// Something that happened to an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EconomyEvent {
    /// A record was created.
    Initialized {
        /// The new account.
        account: AccountId,
        /// Creation time (seconds).
        at: u64,
    },
    /// A click added one diamond.
    Clicked {
        /// The clicking account.
        account: AccountId,
        /// Settled balance after the click.
        balance: u64,
    },
    /// Pending accrual was settled.
    Claimed {
        /// The settling account.
        account: AccountId,
        /// Diamonds folded into the balance.
        amount: u64,
        /// New settlement watermark (seconds).
        at: u64,
    },
    /// Powerup units were bought.
    Upgraded {
        /// The buying account.
        account: AccountId,
        /// Catalog index bought.
        powerup_index: usize,
        /// Units bought.
        amount: u64,
        /// Diamonds paid.
        cost: u64,
        /// Accrual settled just before the purchase.
        settled: u64,
    },
}

/// The diamond economy engine.
pub struct EconomyEngine<S, C> {
    /// Powerup table shared with other engines.
    catalog: Arc<PowerupCatalog>,
    /// Record storage.
    store: S,
    /// Time source.
    clock: C,
    /// One mutex per account with an operation in flight.
    locks: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
    /// Undrained events.
    events: Mutex<VecDeque<EconomyEvent>>,
}

impl<C: Clock> EconomyEngine<MemoryStore, C> {
    /// Creates an engine backed by a fresh [`MemoryStore`].
    #[must_use]
    pub fn in_memory(catalog: Arc<PowerupCatalog>, clock: C) -> Self {
        Self::new(catalog, MemoryStore::new(), clock)
    }
}

impl<S: EconomyStore, C: Clock> EconomyEngine<S, C> {
    /// Creates an engine.
    #[must_use]
    pub fn new(catalog: Arc<PowerupCatalog>, store: S, clock: C) -> Self {
        Self {
            catalog,
            store,
            clock,
            locks: Mutex::new(HashMap::new()),
            events: Mutex::new(VecDeque::with_capacity(1000)),
        }
    }

    /// The powerup catalog.
    #[must_use]
    pub fn catalog(&self) -> &PowerupCatalog {
        &self.catalog
    }

    /// The record store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The time source.
    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Runs `op` while holding the account's lock.
    ///
    /// The table entry is removed again once no other caller holds or waits
    /// on it, so the table only tracks accounts with operations in flight.
    fn with_account<T>(
        &self,
        account: AccountId,
        op: impl FnOnce() -> EconomyResult<T>,
    ) -> EconomyResult<T> {
        let lock = Arc::clone(self.locks.lock().entry(account).or_default());
        let result = {
            let _guard = lock.lock();
            op()
        };

        // Clones are only taken under the table lock, so a count of two
        // (table + this call) means nobody else can be queued.
        let mut locks = self.locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&account);
        }
        result
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.locks.lock().len()
    }

    fn emit(&self, event: EconomyEvent) {
        let mut events = self.events.lock();
        if events.len() >= MAX_PENDING_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    fn load_existing(&self, account: AccountId) -> EconomyResult<AccountEconomy> {
        self.store
            .load(account)?
            .ok_or(EconomyError::GameStoreMissing { account })
    }

    // ========================================================================
    // Mutating operations
    // ========================================================================

    /// Creates the record for `account`.
    ///
    /// # Errors
    ///
    /// Returns `GameStoreExists` if the account already has a record.
    pub fn initialize(&self, account: AccountId) -> EconomyResult<()> {
        self.with_account(account, || {
            if self.store.exists(account)? {
                return Err(EconomyError::GameStoreExists { account });
            }

            let now = self.clock.now_secs();
            self.store.store(account, &AccountEconomy::new(now))?;

            tracing::debug!(account, at = now, "account initialized");
            self.emit(EconomyEvent::Initialized { account, at: now });
            Ok(())
        })
    }

    /// Adds one diamond, creating the record first if needed.
    ///
    /// Pending accrual is left unsettled.
    ///
    /// # Errors
    ///
    /// Store failures, or `ArithmeticOverflow` on a saturated balance.
    pub fn click(&self, account: AccountId) -> EconomyResult<()> {
        self.with_account(account, || {
            let (mut record, created) = match self.store.load(account)? {
                Some(record) => (record, false),
                None => (AccountEconomy::new(self.clock.now_secs()), true),
            };
            record.click()?;
            self.store.store(account, &record)?;

            if created {
                let at = record.last_settled_at();
                tracing::debug!(account, at, "account initialized");
                self.emit(EconomyEvent::Initialized { account, at });
            }
            self.emit(EconomyEvent::Clicked {
                account,
                balance: record.balance(),
            });
            Ok(())
        })
    }

    /// Settles pending accrual into the balance.
    ///
    /// Returns the number of diamonds settled.
    ///
    /// # Errors
    ///
    /// - `GameStoreMissing` if the account has no record
    /// - `ClockWentBackwards` if the clock is behind the watermark
    pub fn claim(&self, account: AccountId) -> EconomyResult<u64> {
        self.with_account(account, || {
            let mut record = self.load_existing(account)?;
            let now = self.clock.now_secs();
            let amount = record.settle(&self.catalog, now)?;
            self.store.store(account, &record)?;

            tracing::debug!(account, amount, at = now, "accrual claimed");
            self.emit(EconomyEvent::Claimed {
                account,
                amount,
                at: now,
            });
            Ok(amount)
        })
    }

    /// Settles, then buys `amount` units of the powerup at `powerup_index`.
    ///
    /// # Errors
    ///
    /// Checked in this order, each before anything is stored:
    /// - `GameStoreMissing` if the account has no record
    /// - `UpgradeNotFound` if the index is outside the catalog
    /// - `InsufficientBalance` if the settled balance cannot cover the cost
    pub fn upgrade(
        &self,
        account: AccountId,
        powerup_index: usize,
        amount: u64,
    ) -> EconomyResult<()> {
        self.with_account(account, || {
            let mut record = self.load_existing(account)?;
            let now = self.clock.now_secs();
            let before = record.balance();

            let cost = match record.purchase(&self.catalog, powerup_index, amount, now) {
                Ok(cost) => cost,
                Err(e) => {
                    tracing::warn!(account, powerup_index, amount, error = %e, "upgrade rejected");
                    return Err(e);
                }
            };
            self.store.store(account, &record)?;

            // balance + cost is the settled balance, which never exceeds u64::MAX.
            let settled = record.balance() + cost - before;
            tracing::debug!(account, powerup_index, amount, cost, settled, "upgrade purchased");
            self.emit(EconomyEvent::Upgraded {
                account,
                powerup_index,
                amount,
                cost,
                settled,
            });
            Ok(())
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Settled balance plus pending accrual. Nothing is settled.
    ///
    /// # Errors
    ///
    /// `GameStoreMissing` if the account has no record.
    pub fn balance(&self, account: AccountId) -> EconomyResult<u64> {
        self.load_existing(account)?
            .projected_balance(&self.catalog, self.clock.now_secs())
    }

    /// Pending accrual at the current time.
    ///
    /// # Errors
    ///
    /// `GameStoreMissing` if the account has no record.
    pub fn unclaimed_accrual(&self, account: AccountId) -> EconomyResult<u64> {
        self.load_existing(account)?
            .unclaimed_accrual(&self.catalog, self.clock.now_secs())
    }

    /// Diamonds per minute produced by the account's upgrades.
    ///
    /// # Errors
    ///
    /// `GameStoreMissing` if the account has no record.
    pub fn accrual_rate(&self, account: AccountId) -> EconomyResult<u64> {
        self.load_existing(account)?.accrual_rate(&self.catalog)
    }

    /// Copy of the account's owned upgrades, ordered by powerup index.
    ///
    /// # Errors
    ///
    /// `GameStoreMissing` if the account has no record.
    pub fn owned_upgrades(&self, account: AccountId) -> EconomyResult<Vec<OwnedUpgrade>> {
        Ok(self.load_existing(account)?.owned_upgrades())
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Takes all pending events, oldest first.
    pub fn drain_events(&self) -> Vec<EconomyEvent> {
        self.events.lock().drain(..).collect()
    }

    /// Number of undrained events.
    #[must_use]
    pub fn pending_event_count(&self) -> usize {
        self.events.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const ALICE: AccountId = 1;
    const BOB: AccountId = 2;

    fn engine_at(start: u64) -> (EconomyEngine<MemoryStore, Arc<ManualClock>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let engine = EconomyEngine::in_memory(
            Arc::new(PowerupCatalog::aptos_monkeys()),
            Arc::clone(&clock),
        );
        (engine, clock)
    }

    #[test]
    fn test_initialize_then_reinitialize_fails() {
        let (engine, _clock) = engine_at(1_000);

        engine.initialize(ALICE).unwrap();
        assert_eq!(engine.balance(ALICE), Ok(0));
        assert_eq!(
            engine.initialize(ALICE),
            Err(EconomyError::GameStoreExists { account: ALICE })
        );
    }

    #[test]
    fn test_click_auto_initializes() {
        let (engine, _clock) = engine_at(1_000);

        engine.click(ALICE).unwrap();
        assert_eq!(engine.balance(ALICE), Ok(1));
        assert_eq!(
            engine.store().load(ALICE).unwrap().unwrap().last_settled_at(),
            1_000
        );
    }

    #[test]
    fn test_clicks_are_monotonic() {
        let (engine, _clock) = engine_at(0);
        for _ in 0..37 {
            engine.click(ALICE).unwrap();
        }
        assert_eq!(engine.balance(ALICE), Ok(37));
    }

    #[test]
    fn test_click_does_not_settle() {
        let (engine, clock) = engine_at(0);
        for _ in 0..5 {
            engine.click(ALICE).unwrap();
        }
        engine.upgrade(ALICE, 0, 1).unwrap();

        clock.advance(120);
        engine.click(ALICE).unwrap();

        let record = engine.store().load(ALICE).unwrap().unwrap();
        assert_eq!(record.balance(), 1);
        assert_eq!(record.last_settled_at(), 0);
        assert_eq!(engine.balance(ALICE), Ok(11));
    }

    #[test]
    fn test_queries_require_record() {
        let (engine, _clock) = engine_at(0);
        let missing = Err(EconomyError::GameStoreMissing { account: BOB });

        assert_eq!(engine.balance(BOB), missing);
        assert_eq!(engine.accrual_rate(BOB), missing);
        assert_eq!(engine.unclaimed_accrual(BOB), missing);
        assert_eq!(engine.claim(BOB), missing);
        assert_eq!(
            engine.owned_upgrades(BOB),
            Err(EconomyError::GameStoreMissing { account: BOB })
        );
        assert_eq!(
            engine.upgrade(BOB, 0, 1),
            Err(EconomyError::GameStoreMissing { account: BOB })
        );
        assert!(!engine.store().exists(BOB).unwrap());
    }

    #[test]
    fn test_missing_account_checked_before_index() {
        let (engine, _clock) = engine_at(0);
        assert_eq!(
            engine.upgrade(BOB, 99, 1),
            Err(EconomyError::GameStoreMissing { account: BOB })
        );
    }

    #[test]
    fn test_balance_query_is_read_only() {
        let (engine, clock) = engine_at(0);
        for _ in 0..5 {
            engine.click(ALICE).unwrap();
        }
        engine.upgrade(ALICE, 0, 1).unwrap();
        clock.advance(600);

        assert_eq!(engine.balance(ALICE), Ok(50));
        assert_eq!(engine.unclaimed_accrual(ALICE), Ok(50));

        let record = engine.store().load(ALICE).unwrap().unwrap();
        assert_eq!(record.balance(), 0);
        assert_eq!(record.last_settled_at(), 0);
    }

    #[test]
    fn test_claim_same_instant_twice() {
        let (engine, clock) = engine_at(0);
        for _ in 0..25 {
            engine.click(ALICE).unwrap();
        }
        engine.upgrade(ALICE, 1, 1).unwrap();
        clock.advance(180);

        assert_eq!(engine.claim(ALICE), Ok(90));
        assert_eq!(engine.claim(ALICE), Ok(0));
        assert_eq!(engine.balance(ALICE), Ok(90));
    }

    #[test]
    fn test_claim_rejects_clock_rewind() {
        let (engine, clock) = engine_at(500);
        engine.initialize(ALICE).unwrap();
        clock.set(400);

        assert_eq!(
            engine.claim(ALICE),
            Err(EconomyError::ClockWentBackwards {
                now: 400,
                last_settled_at: 500
            })
        );
        assert_eq!(
            engine.store().load(ALICE).unwrap().unwrap().last_settled_at(),
            500
        );
    }

    #[test]
    fn test_accrual_rate_ignores_pending() {
        let (engine, clock) = engine_at(0);
        for _ in 0..35 {
            engine.click(ALICE).unwrap();
        }
        engine.upgrade(ALICE, 0, 2).unwrap();
        engine.upgrade(ALICE, 1, 1).unwrap();
        clock.advance(3_600);

        assert_eq!(engine.accrual_rate(ALICE), Ok(40));
    }

    #[test]
    fn test_upgrade_settles_before_affordability() {
        let (engine, clock) = engine_at(0);
        for _ in 0..5 {
            engine.click(ALICE).unwrap();
        }
        engine.upgrade(ALICE, 0, 1).unwrap();

        // 4 minutes of Bruh = 20, not enough for Aptomingos.
        clock.advance(4 * 60);
        assert!(matches!(
            engine.upgrade(ALICE, 1, 1),
            Err(EconomyError::InsufficientBalance {
                required: 25,
                available: 20
            })
        ));

        // The failed attempt did not move the watermark.
        clock.advance(60);
        engine.upgrade(ALICE, 1, 1).unwrap();
        assert_eq!(engine.balance(ALICE), Ok(0));
        assert_eq!(engine.accrual_rate(ALICE), Ok(35));
    }

    #[test]
    fn test_events_follow_operations() {
        let (engine, clock) = engine_at(10);
        for _ in 0..5 {
            engine.click(ALICE).unwrap();
        }
        engine.upgrade(ALICE, 0, 1).unwrap();
        clock.advance(60);
        engine.claim(ALICE).unwrap();

        let events = engine.drain_events();
        assert_eq!(events.len(), 8);
        assert_eq!(events[0], EconomyEvent::Initialized { account: ALICE, at: 10 });
        assert_eq!(events[5], EconomyEvent::Clicked { account: ALICE, balance: 5 });
        assert_eq!(
            events[6],
            EconomyEvent::Upgraded {
                account: ALICE,
                powerup_index: 0,
                amount: 1,
                cost: 5,
                settled: 0
            }
        );
        assert_eq!(
            events[7],
            EconomyEvent::Claimed {
                account: ALICE,
                amount: 5,
                at: 70
            }
        );
        assert_eq!(engine.pending_event_count(), 0);
    }

    #[test]
    fn test_event_buffer_is_bounded() {
        let (engine, _clock) = engine_at(0);
        for _ in 0..MAX_PENDING_EVENTS + 10 {
            engine.click(ALICE).unwrap();
        }
        assert_eq!(engine.pending_event_count(), MAX_PENDING_EVENTS);
        assert!(matches!(
            engine.drain_events()[0],
            EconomyEvent::Clicked { balance: 11, .. }
        ));
    }

    #[test]
    fn test_concurrent_clicks_on_one_account() {
        let (engine, _clock) = engine_at(0);
        let engine = Arc::new(engine);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        engine.click(ALICE).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.balance(ALICE), Ok(4_000));
        assert_eq!(engine.lock_table_len(), 0);
    }

    #[test]
    fn test_lock_table_does_not_grow_on_missing_accounts() {
        let (engine, _clock) = engine_at(0);

        for account in 0..10_000 {
            assert!(engine.upgrade(account, 0, 1).is_err());
            assert!(engine.claim(account).is_err());
        }
        assert_eq!(engine.lock_table_len(), 0);
        assert!(engine.store().is_empty());

        engine.initialize(ALICE).unwrap();
        assert!(engine.initialize(ALICE).is_err());
        engine.click(BOB).unwrap();
        assert_eq!(engine.lock_table_len(), 0);
    }

    #[test]
    fn test_alternate_catalog() {
        use crate::catalog::Powerup;

        let catalog = PowerupCatalog::new(vec![Powerup::new("Drill", 1, 100)]).unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let engine = EconomyEngine::in_memory(Arc::new(catalog), Arc::clone(&clock));

        engine.click(ALICE).unwrap();
        engine.upgrade(ALICE, 0, 1).unwrap();
        clock.advance(60);
        assert_eq!(engine.balance(ALICE), Ok(100));
        assert!(matches!(
            engine.upgrade(ALICE, 1, 1),
            Err(EconomyError::UpgradeNotFound { index: 1, catalog_len: 1 })
        ));
    }
}
