//! Wallet core: the wallet-state and balance/UTXO coordination engine
//! for a terminal-based multi-chain wallet.
//!
//! Owns derived addresses across chains from a single encrypted seed,
//! a locally persisted UTXO ledger with spent-output tracking, a
//! tiered-refresh balance cache fed by a bounded concurrent fetch
//! fan-out, and the two transaction pipelines (account-model ETH/ERC-20
//! and UTXO-model BSV). CLI plumbing, terminal rendering, configuration
//! file parsing, and the wire-level HTTP provider clients are external
//! collaborators — see [`provider`] for the boundary this crate expects
//! them to implement.

pub mod amount;
pub mod balance_cache;
pub mod balance_service;
pub mod chain;
pub mod config;
pub mod error;
pub mod keys;
pub mod persist;
pub mod provider;
pub mod refresh_policy;
pub mod registry;
pub mod tx_engine;
pub mod utxo_service;
pub mod utxo_store;
pub mod vault;

pub use chain::ChainId;
pub use config::WalletConfig;
pub use error::{WalletCoreError, WalletCoreResult};
pub use keys::Seed;
pub use registry::{WalletHandle, WalletRegistry};
