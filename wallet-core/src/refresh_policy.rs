//! Refresh Policy (spec §4.5): pure decision function mapping
//! `(address-metadata, cache-age, has-balance) → {RefreshRequired, CacheOK}`.
//!
//! No grounding file in this codebase implements tiered cache-refresh
//! decisions; this is new logic built in the codebase's idiom (plain
//! enum decision type, config-driven thresholds, no hidden state).

use chrono::Utc;

use crate::balance_cache::{BalanceCache, CacheKey};
use crate::chain::ChainId;
use crate::config::WalletConfig;
use crate::utxo_store::AddressMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    RefreshRequired,
    CacheOk,
}

/// USDC contract address consulted when deciding `has_balance` for ETH
/// (spec §4.5 step 4). Only USDC is resolved per spec §4.8 step 2.
pub const USDC_CONTRACT: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";

pub fn decide(
    config: &WalletConfig,
    chain: ChainId,
    address: &str,
    cache: &BalanceCache,
    metadata: Option<&AddressMetadata>,
) -> RefreshDecision {
    let native_key = CacheKey {
        chain,
        address: address.to_string(),
        token: String::new(),
    };
    let native_entry = match cache.get(&native_key) {
        Some(e) => e,
        None => return RefreshDecision::RefreshRequired,
    };

    let metadata = match metadata {
        Some(m) => m,
        None => return RefreshDecision::RefreshRequired,
    };

    let now = Utc::now();
    if let Some(last_scanned) = metadata.last_scanned {
        let age = (now - last_scanned).num_seconds();
        if age < config.fresh_address_window_secs {
            return RefreshDecision::RefreshRequired;
        }
    } else {
        return RefreshDecision::RefreshRequired;
    }

    let native_balance_positive = native_entry.balance.parse::<f64>().unwrap_or(0.0) > 0.0;
    let token_balance_positive = if chain == ChainId::Eth {
        let usdc_key = CacheKey {
            chain,
            address: address.to_string(),
            token: USDC_CONTRACT.to_string(),
        };
        cache
            .get(&usdc_key)
            .map(|e| e.balance.parse::<f64>().unwrap_or(0.0) > 0.0)
            .unwrap_or(false)
    } else {
        false
    };
    let has_balance = native_balance_positive || token_balance_positive;

    let age = native_entry.age_secs(now);
    match (metadata.has_activity, has_balance) {
        (true, true) => RefreshDecision::RefreshRequired,
        (true, false) => {
            if age < config.medium_tier_window_secs {
                RefreshDecision::CacheOk
            } else {
                RefreshDecision::RefreshRequired
            }
        }
        (false, false) => {
            if age < config.low_tier_window_secs {
                RefreshDecision::CacheOk
            } else {
                RefreshDecision::RefreshRequired
            }
        }
        (false, true) => RefreshDecision::RefreshRequired,
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::balance_cache::BalanceCacheEntry;
    use chrono::Duration;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn entry_aged(age_secs: i64) -> BalanceCacheEntry {
        BalanceCacheEntry {
            chain: ChainId::Eth,
            address: "addr1".to_string(),
            token: String::new(),
            balance: "0.0".to_string(),
            unconfirmed_delta: None,
            symbol: "ETH".to_string(),
            decimals: 18,
            updated_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    proptest! {
        /// Monotonicity property (spec §8): for a fixed address/metadata,
        /// an older cache entry can never flip a RefreshRequired decision
        /// back to CacheOk.
        #[test]
        fn older_cache_entry_never_turns_refresh_into_cache_ok(age_a in 0i64..20_000, extra in 0i64..20_000) {
            let age_b = age_a + extra;
            let dir = TempDir::new().unwrap();
            let mut config = WalletConfig::default();
            config.home_dir = dir.path().to_path_buf();
            let metadata = AddressMetadata {
                address: "addr1".to_string(),
                has_activity: true,
                last_scanned: Some(Utc::now() - Duration::seconds(48 * 3600)),
                label: None,
                is_change: false,
                index: 0,
                path: "m/44'/60'/0'/0/0".to_string(),
            };

            let mut cache_a = BalanceCache::load(&config, "w");
            cache_a.set(entry_aged(age_a));
            let decision_a = decide(&config, ChainId::Eth, "addr1", &cache_a, Some(&metadata));

            let mut cache_b = BalanceCache::load(&config, "w");
            cache_b.set(entry_aged(age_b));
            let decision_b = decide(&config, ChainId::Eth, "addr1", &cache_b, Some(&metadata));

            if decision_a == RefreshDecision::RefreshRequired {
                prop_assert_eq!(decision_b, RefreshDecision::RefreshRequired);
            }
        }
    }
}
