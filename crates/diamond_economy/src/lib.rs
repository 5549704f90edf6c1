//! # Diamond Economy
//!
//! Idle-accumulation economy: every account holds a diamond balance that
//! grows by clicks and, passively, by the powerups it owns.
//!
//! ## Design Principles
//!
//! 1. **Zero floating point** - Balances, rates and elapsed time are `u64`; minutes truncate
//! 2. **Settle before spend** - A purchase folds pending accrual in first
//! 3. **All-or-nothing** - Every check runs before the record is stored
//! 4. **External configuration** - The powerup table can be loaded from TOML
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use diamond_economy::{EconomyEngine, PowerupCatalog, SystemClock};
//!
//! let engine = EconomyEngine::in_memory(Arc::new(PowerupCatalog::aptos_monkeys()), SystemClock);
//!
//! for _ in 0..5 {
//!     engine.click(player)?;
//! }
//! engine.upgrade(player, 0, 1)?; // one "Bruh", 5 diamonds per minute
//! let diamonds = engine.balance(player)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod account;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod journal;
pub mod store;

pub use account::{minutes_elapsed, AccountEconomy, OwnedUpgrade, SECONDS_PER_MINUTE};
pub use catalog::{Powerup, PowerupCatalog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EconomyConfig;
pub use engine::{EconomyEngine, EconomyEvent, MAX_PENDING_EVENTS};
pub use error::{EconomyError, EconomyResult};
pub use journal::{JournalStore, RecoveryReport};
pub use store::{AccountId, EconomyStore, MemoryStore};
