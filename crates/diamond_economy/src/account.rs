//! # Account Economy
//!
//! The per-account record and the accrual arithmetic.
//!
//! Passive income is measured against one watermark per account
//! (`last_settled_at`), never per upgrade. Buying a new upgrade settles the
//! account first, so the newly bought units only earn from the purchase on.
//!
//! All arithmetic is checked `u64`. Minutes are whole minutes: a partial
//! minute earns nothing until it completes.

use std::collections::BTreeMap;

use crate::catalog::PowerupCatalog;
use crate::error::{EconomyError, EconomyResult};

/// Seconds in one accrual period.
pub const SECONDS_PER_MINUTE: u64 = 60;

/// Whole minutes between two clock readings.
///
/// # Errors
///
/// Returns `ClockWentBackwards` if `to` is earlier than `from`.
#[inline]
pub fn minutes_elapsed(from: u64, to: u64) -> EconomyResult<u64> {
    to.checked_sub(from)
        .map(|secs| secs / SECONDS_PER_MINUTE)
        .ok_or(EconomyError::ClockWentBackwards {
            now: to,
            last_settled_at: from,
        })
}

/// Quantity of one powerup owned by an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OwnedUpgrade {
    /// Index into the powerup catalog.
    pub powerup_index: usize,
    /// Units owned.
    pub amount: u64,
}

/// The economy record of a single account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountEconomy {
    /// Settled diamonds. Pending accrual is not included.
    pub(crate) balance: u64,
    /// Owned amount keyed by powerup index.
    pub(crate) owned: BTreeMap<usize, u64>,
    /// Clock reading (seconds) of the last settlement.
    pub(crate) last_settled_at: u64,
}

impl AccountEconomy {
    /// Creates an empty record settled at `now`.
    #[must_use]
    pub fn new(now: u64) -> Self {
        Self {
            balance: 0,
            owned: BTreeMap::new(),
            last_settled_at: now,
        }
    }

    /// Rebuilds a record from stored parts.
    #[must_use]
    pub fn from_parts(balance: u64, owned: BTreeMap<usize, u64>, last_settled_at: u64) -> Self {
        Self {
            balance,
            owned,
            last_settled_at,
        }
    }

    /// Settled balance.
    #[inline]
    #[must_use]
    pub const fn balance(&self) -> u64 {
        self.balance
    }

    /// Settlement watermark in seconds.
    #[inline]
    #[must_use]
    pub const fn last_settled_at(&self) -> u64 {
        self.last_settled_at
    }

    /// Units owned of a powerup (0 if none).
    #[must_use]
    pub fn amount_of(&self, powerup_index: usize) -> u64 {
        self.owned.get(&powerup_index).copied().unwrap_or(0)
    }

    /// Copy of the owned upgrades, ordered by powerup index.
    #[must_use]
    pub fn owned_upgrades(&self) -> Vec<OwnedUpgrade> {
        self.owned
            .iter()
            .map(|(&powerup_index, &amount)| OwnedUpgrade {
                powerup_index,
                amount,
            })
            .collect()
    }

    /// Adds one diamond to the settled balance.
    ///
    /// # Errors
    ///
    /// Returns `ArithmeticOverflow` if the balance is saturated.
    pub fn click(&mut self) -> EconomyResult<()> {
        self.balance = self
            .balance
            .checked_add(1)
            .ok_or(EconomyError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Diamonds per minute produced by the owned upgrades.
    ///
    /// # Errors
    ///
    /// - `UpgradeNotFound` if an owned index is missing from `catalog`
    /// - `ArithmeticOverflow` on overflow
    pub fn accrual_rate(&self, catalog: &PowerupCatalog) -> EconomyResult<u64> {
        self.owned.iter().try_fold(0u64, |total, (&index, &amount)| {
            let rate = catalog
                .get(index)?
                .rate
                .checked_mul(amount)
                .ok_or(EconomyError::ArithmeticOverflow)?;
            total.checked_add(rate).ok_or(EconomyError::ArithmeticOverflow)
        })
    }

    /// Diamonds accrued since the last settlement, evaluated at `at`.
    ///
    /// Pure: the record is not modified.
    ///
    /// # Errors
    ///
    /// - `ClockWentBackwards` if `at` precedes the watermark
    /// - `UpgradeNotFound` if an owned index is missing from `catalog`
    /// - `ArithmeticOverflow` on overflow
    pub fn unclaimed_accrual(&self, catalog: &PowerupCatalog, at: u64) -> EconomyResult<u64> {
        let minutes = minutes_elapsed(self.last_settled_at, at)?;
        self.accrual_rate(catalog)?
            .checked_mul(minutes)
            .ok_or(EconomyError::ArithmeticOverflow)
    }

    /// Settled balance plus pending accrual at `at`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::unclaimed_accrual`].
    pub fn projected_balance(&self, catalog: &PowerupCatalog, at: u64) -> EconomyResult<u64> {
        self.balance
            .checked_add(self.unclaimed_accrual(catalog, at)?)
            .ok_or(EconomyError::ArithmeticOverflow)
    }

    /// Folds pending accrual into the balance and moves the watermark to `now`.
    ///
    /// Returns the amount settled. On error nothing changes.
    ///
    /// # Errors
    ///
    /// Same as [`Self::unclaimed_accrual`].
    pub fn settle(&mut self, catalog: &PowerupCatalog, now: u64) -> EconomyResult<u64> {
        let unclaimed = self.unclaimed_accrual(catalog, now)?;
        self.balance = self
            .balance
            .checked_add(unclaimed)
            .ok_or(EconomyError::ArithmeticOverflow)?;
        self.last_settled_at = now;
        Ok(unclaimed)
    }

    /// Settles, then buys `amount` units of the powerup at `index`.
    ///
    /// All checks run before anything is written, so a failed purchase leaves
    /// balance, watermark and owned upgrades untouched.
    ///
    /// Returns the total cost paid.
    ///
    /// # Errors
    ///
    /// - `UpgradeNotFound` if `index` is outside the catalog
    /// - `InsufficientBalance` if the settled balance is below the cost
    /// - `ClockWentBackwards` / `ArithmeticOverflow` from settlement
    pub fn purchase(
        &mut self,
        catalog: &PowerupCatalog,
        index: usize,
        amount: u64,
        now: u64,
    ) -> EconomyResult<u64> {
        let powerup = catalog.get(index)?;

        let settled = self.projected_balance(catalog, now)?;
        let total_cost = powerup
            .cost
            .checked_mul(amount)
            .ok_or(EconomyError::ArithmeticOverflow)?;

        if settled < total_cost {
            return Err(EconomyError::InsufficientBalance {
                required: total_cost,
                available: settled,
            });
        }

        let owned = self
            .amount_of(index)
            .checked_add(amount)
            .ok_or(EconomyError::ArithmeticOverflow)?;

        self.balance = settled - total_cost;
        self.last_settled_at = now;
        self.owned.insert(index, owned);

        Ok(total_cost)
    }
}
