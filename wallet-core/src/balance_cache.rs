//! Balance Cache (spec §4.4): keyed store of
//! `(chain, address, token) → amount + timestamp`, persisted to a
//! single JSON file.
//!
//! Grounded on this codebase's cache-file conventions (`sync_service.rs`
//! `SyncStats`-style single-file JSON persistence) generalized to a
//! keyed map and made atomic per spec §6.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::chain::ChainId;
use crate::config::WalletConfig;
use crate::error::BalanceCacheError;

const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub chain: ChainId,
    pub address: String,
    /// ERC-20 contract address for tokens, empty for native.
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceCacheEntry {
    pub chain: ChainId,
    pub address: String,
    pub token: String,
    pub balance: String,
    pub unconfirmed_delta: Option<String>,
    pub symbol: String,
    pub decimals: u8,
    pub updated_at: DateTime<Utc>,
}

impl BalanceCacheEntry {
    fn key(&self) -> CacheKey {
        CacheKey {
            chain: self.chain,
            address: self.address.clone(),
            token: self.token.clone(),
        }
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_seconds().max(0)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedCache {
    version: u32,
    entries: Vec<BalanceCacheEntry>,
}

pub struct BalanceCache {
    path: PathBuf,
    entries: HashMap<CacheKey, BalanceCacheEntry>,
    /// Set true when a `load` hit a parse error and fell back to empty,
    /// so the caller can surface a one-time warning.
    pub reset_on_load: bool,
}

impl BalanceCache {
    pub fn path_for(config: &WalletConfig, wallet_name: &str) -> PathBuf {
        config.cache_dir().join(format!("{wallet_name}.balances.json"))
    }

    pub fn load(config: &WalletConfig, wallet_name: &str) -> Self {
        let path = Self::path_for(config, wallet_name);
        match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<PersistedCache>(&bytes) {
                Ok(persisted) => BalanceCache {
                    path,
                    entries: persisted
                        .entries
                        .into_iter()
                        .map(|e| (e.key(), e))
                        .collect(),
                    reset_on_load: false,
                },
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "balance cache corrupt, resetting to empty");
                    BalanceCache {
                        path,
                        entries: HashMap::new(),
                        reset_on_load: true,
                    }
                }
            },
            Err(_) => BalanceCache {
                path,
                entries: HashMap::new(),
                reset_on_load: false,
            },
        }
    }

    pub fn save(&self) -> Result<(), BalanceCacheError> {
        let persisted = PersistedCache {
            version: CACHE_VERSION,
            entries: self.entries.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&persisted)
            .map_err(|e| BalanceCacheError::Io(e.to_string()))?;
        crate::persist::write_atomic(&self.path, &bytes)
            .map_err(|e| BalanceCacheError::Io(e.to_string()))
    }

    pub fn get(&self, key: &CacheKey) -> Option<&BalanceCacheEntry> {
        self.entries.get(key)
    }

    pub fn set(&mut self, mut entry: BalanceCacheEntry) {
        entry.updated_at = Utc::now();
        self.entries.insert(entry.key(), entry);
    }

    pub fn delete(&mut self, key: &CacheKey) {
        self.entries.remove(key);
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &BalanceCacheEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(address: &str, balance: &str) -> BalanceCacheEntry {
        BalanceCacheEntry {
            chain: ChainId::Eth,
            address: address.to_string(),
            token: String::new(),
            balance: balance.to_string(),
            unconfirmed_delta: None,
            symbol: "ETH".to_string(),
            decimals: 18,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn set_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut config = WalletConfig::default();
        config.home_dir = dir.path().to_path_buf();
        let mut cache = BalanceCache::load(&config, "w");
        cache.set(entry("addr1", "1.5"));
        let key = CacheKey {
            chain: ChainId::Eth,
            address: "addr1".to_string(),
            token: String::new(),
        };
        assert_eq!(cache.get(&key).unwrap().balance, "1.5");
    }

    #[test]
    fn save_load_round_trip_preserves_entries() {
        let dir = TempDir::new().unwrap();
        let mut config = WalletConfig::default();
        config.home_dir = dir.path().to_path_buf();
        let mut cache = BalanceCache::load(&config, "w");
        cache.set(entry("addr1", "2.0"));
        cache.save().unwrap();

        let reloaded = BalanceCache::load(&config, "w");
        assert_eq!(reloaded.size(), 1);
        assert!(!reloaded.reset_on_load);
    }

    #[test]
    fn corrupt_cache_file_resets_to_empty_with_warning_flag() {
        let dir = TempDir::new().unwrap();
        let mut config = WalletConfig::default();
        config.home_dir = dir.path().to_path_buf();
        let path = BalanceCache::path_for(&config, "w");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ invalid json").unwrap();

        let cache = BalanceCache::load(&config, "w");
        assert_eq!(cache.size(), 0);
        assert!(cache.reset_on_load);

        cache.save().unwrap();
        let reloaded = BalanceCache::load(&config, "w");
        assert!(!reloaded.reset_on_load);
    }

    #[test]
    fn delete_removes_entry() {
        let dir = TempDir::new().unwrap();
        let mut config = WalletConfig::default();
        config.home_dir = dir.path().to_path_buf();
        let mut cache = BalanceCache::load(&config, "w");
        cache.set(entry("addr1", "3.0"));
        let key = CacheKey {
            chain: ChainId::Eth,
            address: "addr1".to_string(),
            token: String::new(),
        };
        cache.delete(&key);
        assert!(cache.get(&key).is_none());
    }
}
