//! # Powerup Catalog
//!
//! The immutable table of purchasable powerups.
//!
//! Powerups are referenced by their position in the catalog, so the order of
//! the table is part of the save format: a journal written against one
//! catalog must be replayed against the same ordering.
//!
//! ## Example
//!
//! ```rust,ignore
//! let catalog = PowerupCatalog::from_toml_file("data/economy/powerups.toml")?;
//! let bruh = catalog.get(0)?;
//! assert_eq!(bruh.cost, 5);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{EconomyError, EconomyResult};

/// A purchasable powerup definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Powerup {
    /// Unique name.
    pub name: String,
    /// Diamonds required to buy one unit.
    pub cost: u64,
    /// Diamonds produced per owned unit per minute.
    pub rate: u64,
}

impl Powerup {
    /// Creates a powerup definition.
    #[must_use]
    pub fn new(name: impl Into<String>, cost: u64, rate: u64) -> Self {
        Self {
            name: name.into(),
            cost,
            rate,
        }
    }
}

/// On-disk layout of a catalog file.
#[derive(Deserialize)]
struct CatalogFile {
    powerups: Vec<Powerup>,
}

/// Ordered, validated list of powerups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PowerupCatalog {
    powerups: Vec<Powerup>,
}

impl PowerupCatalog {
    /// Builds a catalog.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the list is empty or two powerups share a name.
    pub fn new(powerups: Vec<Powerup>) -> EconomyResult<Self> {
        if powerups.is_empty() {
            return Err(EconomyError::InvalidConfig(
                "catalog must contain at least one powerup".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(powerups.len());
        for powerup in &powerups {
            if !seen.insert(powerup.name.as_str()) {
                return Err(EconomyError::InvalidConfig(format!(
                    "duplicate powerup name: {}",
                    powerup.name
                )));
            }
        }

        Ok(Self { powerups })
    }

    /// The stock catalog: Bruh, Aptomingos and Aptos Monkeys.
    #[must_use]
    pub fn aptos_monkeys() -> Self {
        Self {
            powerups: vec![
                Powerup::new("Bruh", 5, 5),
                Powerup::new("Aptomingos", 25, 30),
                Powerup::new("Aptos Monkeys", 250, 350),
            ],
        }
    }

    /// Parses a catalog from TOML text (`[[powerups]]` tables).
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on parse failure or if validation fails.
    pub fn from_toml_str(text: &str) -> EconomyResult<Self> {
        let file: CatalogFile = toml::from_str(text)
            .map_err(|e| EconomyError::InvalidConfig(format!("catalog parse failed: {e}")))?;
        Self::new(file.powerups)
    }

    /// Loads a catalog from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the file cannot be read or parsed.
    pub fn from_toml_file(path: impl AsRef<Path>) -> EconomyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EconomyError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Looks up a powerup by index.
    ///
    /// # Errors
    ///
    /// Returns `UpgradeNotFound` if `index` is out of range.
    pub fn get(&self, index: usize) -> EconomyResult<&Powerup> {
        self.powerups.get(index).ok_or(EconomyError::UpgradeNotFound {
            index,
            catalog_len: self.powerups.len(),
        })
    }

    /// Finds the index of a powerup by name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.powerups.iter().position(|p| p.name == name)
    }

    /// Number of powerups.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.powerups.len()
    }

    /// Always false for a validated catalog.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.powerups.is_empty()
    }

    /// Iterates powerups in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Powerup> {
        self.powerups.iter()
    }
}

impl Default for PowerupCatalog {
    fn default() -> Self {
        Self::aptos_monkeys()
    }
}
