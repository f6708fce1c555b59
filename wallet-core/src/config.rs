//! Wallet core configuration surface.
//!
//! Concrete file parsing is an external collaborator's job (see
//! spec §1); this module only owns the in-memory struct, its defaults,
//! and an optional TOML loader for callers that already have a path.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Home directory under which `wallets/`, `cache/` and per-wallet
    /// subdirectories live.
    pub home_dir: PathBuf,

    pub kdf: KdfParams,

    /// Max in-flight balance fetches (spec §4.6 default 8).
    pub max_concurrent: usize,
    /// Per-fetch timeout in seconds (spec §4.6 default 30s).
    pub fetch_timeout_secs: u64,
    /// Overall batch deadline in seconds (spec §4.6 default 60s).
    pub batch_deadline_secs: u64,

    /// Refresh policy thresholds (spec §4.5).
    pub fresh_address_window_secs: i64,
    pub medium_tier_window_secs: i64,
    pub low_tier_window_secs: i64,

    /// Balance cache windows (spec §4.4).
    pub post_send_trust_secs: i64,
    pub default_staleness_secs: i64,

    /// BSV fee defaults (spec §4.9).
    pub bsv_default_fee_rate_sat_per_kb: u64,
    pub bsv_dust_limit_sats: u64,

    /// ETH gas fallbacks (spec §4.8).
    pub eth_native_gas_limit: u64,
    pub eth_erc20_gas_limit: u64,
    /// EIP-155 chain id bound into every signed account-model payload
    /// (spec §4.8 step 6), so a signature cannot be replayed on another
    /// chain. Defaults to Ethereum mainnet.
    pub eth_chain_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub m_cost_kib: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // Matches the Argon2id parameters this codebase already uses
        // for wallet-file encryption.
        KdfParams {
            m_cost_kib: 65536,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wallet-core");

        WalletConfig {
            home_dir,
            kdf: KdfParams::default(),
            max_concurrent: 8,
            fetch_timeout_secs: 30,
            batch_deadline_secs: 60,
            fresh_address_window_secs: 24 * 3600,
            medium_tier_window_secs: 30 * 60,
            low_tier_window_secs: 2 * 3600,
            post_send_trust_secs: 60,
            default_staleness_secs: 5 * 60,
            bsv_default_fee_rate_sat_per_kb: 1,
            bsv_dust_limit_sats: 546,
            eth_native_gas_limit: 21_000,
            eth_erc20_gas_limit: 65_000,
            eth_chain_id: 1,
        }
    }
}

impl WalletConfig {
    pub fn wallets_dir(&self) -> PathBuf {
        self.home_dir.join("wallets")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.home_dir.join("cache")
    }

    /// Load from a TOML file, falling back to defaults for any field the
    /// file omits. The file itself may not exist; that is not an error.
    pub fn load_or_default(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to parse config file, using defaults");
                WalletConfig::default()
            }),
            Err(_) => WalletConfig::default(),
        }
    }
}
