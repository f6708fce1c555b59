//! External chain provider contract (spec §6 / §10.4).
//!
//! Concrete HTTP clients for specific providers are an external
//! collaborator per spec §1 — only the trait boundary lives here, plus
//! the small set of wire-shape structs every implementation returns.
//! Mirrors this codebase's capability-oriented split between
//! `utxo_manager.rs`/`sync_service.rs` (consumers) and `rpc_client.rs`
//! (the thing they consume), generalized to a chain-agnostic trait so
//! test doubles can stand in for the network.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteUtxo {
    pub txid: String,
    pub vout: u32,
    pub amount: u64,
    pub script_pubkey: Vec<u8>,
    pub confirmations: u32,
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeBalance {
    pub amount: u128,
    pub decimals: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBalance {
    pub amount: u128,
    pub decimals: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasKind {
    Native,
    Erc20,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasSpeed {
    Slow,
    Medium,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasEstimate {
    pub gas_price: u64,
    pub gas_limit: u64,
}

impl GasEstimate {
    pub fn total_fee(&self) -> u64 {
        self.gas_price.saturating_mul(self.gas_limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeQuote {
    pub standard_rate_sat_per_kb: u64,
    pub source: String,
}

/// UTXO-chain capability (BSV today; any future UTXO chain).
#[async_trait]
pub trait UtxoChainProvider: Send + Sync {
    async fn list_utxos(&self, address: &str) -> Result<Vec<RemoteUtxo>, FetchError>;
    async fn broadcast(&self, signed_tx_bytes: &[u8]) -> Result<String, FetchError>;
    async fn get_fee_quote(&self) -> Result<FeeQuote, FetchError>;
}

/// Account-model capability (ETH / ERC-20 today).
#[async_trait]
pub trait AccountChainProvider: Send + Sync {
    async fn get_native_balance(&self, address: &str) -> Result<NativeBalance, FetchError>;
    async fn get_token_balance(
        &self,
        address: &str,
        token_contract: &str,
    ) -> Result<TokenBalance, FetchError>;
    async fn estimate_gas(&self, kind: GasKind, speed: GasSpeed) -> Result<GasEstimate, FetchError>;
    async fn broadcast(&self, signed_tx_bytes: &[u8]) -> Result<String, FetchError>;
}
