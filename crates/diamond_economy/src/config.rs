//! # Engine Configuration
//!
//! Loaded once at startup from TOML.
//!
//! ```toml
//! journal_path = "data/economy.djnl"
//!
//! [[powerups]]
//! name = "Bruh"
//! cost = 5
//! rate = 5
//! ```
//!
//! Missing keys fall back to the stock catalog and a volatile store.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::catalog::{Powerup, PowerupCatalog};
use crate::clock::Clock;
use crate::engine::EconomyEngine;
use crate::error::{EconomyError, EconomyResult};
use crate::journal::JournalStore;
use crate::store::{EconomyStore, MemoryStore};

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    /// Powerup table, in index order.
    pub powerups: Vec<Powerup>,
    /// Journal file. `None` keeps records in memory only.
    pub journal_path: Option<PathBuf>,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            powerups: PowerupCatalog::aptos_monkeys().iter().cloned().collect(),
            journal_path: None,
        }
    }
}

impl EconomyConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on parse failure.
    pub fn from_toml_str(text: &str) -> EconomyResult<Self> {
        toml::from_str(text)
            .map_err(|e| EconomyError::InvalidConfig(format!("config parse failed: {e}")))
    }

    /// Loads a configuration file.
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

    /// Builds the validated catalog.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the powerup table is empty or has duplicates.
    pub fn catalog(&self) -> EconomyResult<PowerupCatalog> {
        PowerupCatalog::new(self.powerups.clone())
    }

    /// Builds an engine: journal-backed when `journal_path` is set, in-memory
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Catalog validation failures, or `Storage` if the journal cannot be opened.
    pub fn open_engine<C: Clock>(
        &self,
        clock: C,
    ) -> EconomyResult<EconomyEngine<Box<dyn EconomyStore>, C>> {
        let catalog = Arc::new(self.catalog()?);

        let store: Box<dyn EconomyStore> = match &self.journal_path {
            Some(path) => Box::new(JournalStore::open(path)?),
            None => Box::new(MemoryStore::new()),
        };

        tracing::info!(
            powerups = catalog.len(),
            journal = self.journal_path.is_some(),
            "economy engine ready"
        );
        Ok(EconomyEngine::new(catalog, store, clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EconomyConfig::from_toml_str("").unwrap();
        assert_eq!(config, EconomyConfig::default());
        assert_eq!(config.catalog().unwrap(), PowerupCatalog::aptos_monkeys());
    }

    #[test]
    fn test_custom_powerups() {
        let config = EconomyConfig::from_toml_str(
            r#"
            [[powerups]]
            name = "Shovel"
            cost = 3
            rate = 1
            "#,
        )
        .unwrap();

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get(0).unwrap().name, "Shovel");
    }

    #[test]
    fn test_empty_powerup_list_rejected() {
        let config = EconomyConfig::from_toml_str("powerups = []").unwrap();
        assert!(matches!(
            config.open_engine(ManualClock::new(0)),
            Err(EconomyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_in_memory_engine() {
        let engine = EconomyConfig::default()
            .open_engine(ManualClock::new(0))
            .unwrap();
        engine.click(1).unwrap();
        assert_eq!(engine.balance(1), Ok(1));
    }
}
