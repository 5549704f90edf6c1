//! # Economy Error Types
//!
//! Every failure the engine can report. All of them are raised before any
//! account state is mutated.

use thiserror::Error;

use crate::store::AccountId;

/// Errors that can occur in the diamond economy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EconomyError {
    /// The operation needs an account record but none exists.
    #[error("no game store for account {account}")]
    GameStoreMissing {
        /// The account that was looked up.
        account: AccountId,
    },

    /// Initialize was called for an account that already has a record.
    #[error("game store already exists for account {account}")]
    GameStoreExists {
        /// The account that was initialized twice.
        account: AccountId,
    },

    /// Powerup index outside the catalog.
    #[error("upgrade not found: index {index}, catalog has {catalog_len} powerups")]
    UpgradeNotFound {
        /// The requested powerup index.
        index: usize,
        /// Number of powerups in the catalog.
        catalog_len: usize,
    },

    /// Settled balance does not cover the purchase.
    #[error("insufficient balance: need {required} diamonds, have {available}")]
    InsufficientBalance {
        /// Total cost of the purchase.
        required: u64,
        /// Balance after settlement.
        available: u64,
    },

    /// The clock reported a time before the last settlement.
    #[error("clock went backwards: now {now}, last settled at {last_settled_at}")]
    ClockWentBackwards {
        /// Current clock reading (seconds).
        now: u64,
        /// Settlement watermark of the account (seconds).
        last_settled_at: u64,
    },

    /// Arithmetic overflow in a balance or accrual calculation.
    #[error("arithmetic overflow in economic calculation")]
    ArithmeticOverflow,

    /// Invalid configuration or catalog.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Journal I/O failure or corruption.
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Result type for economy operations.
pub type EconomyResult<T> = Result<T, EconomyError>;
