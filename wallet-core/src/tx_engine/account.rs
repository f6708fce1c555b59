//! Account-model pipeline (spec §4.8): ETH native transfers and USDC
//! (the only resolved ERC-20 token).

use bitcoin::secp256k1::{ecdsa, Message, Secp256k1, SecretKey};
use sha3::{Digest, Keccak256};

use crate::amount;
use crate::balance_cache::{BalanceCache, BalanceCacheEntry, CacheKey};
use crate::chain::ChainId;
use crate::config::WalletConfig;
use crate::error::TransactionError;
use crate::keys::{self, Seed};
use crate::provider::{AccountChainProvider, GasEstimate, GasKind, GasSpeed};
use crate::registry::WalletHandle;
use crate::tx_engine::TxStatus;

/// Gas price used for the fallback estimate when the gas oracle errors
/// (spec only names fallback gas *limits*; a conservative fixed price
/// keeps the fallback path from sending with a zero fee).
const FALLBACK_GAS_PRICE_GWEI: u64 = 50;

pub const USDC_CONTRACT: &str = crate::refresh_policy::USDC_CONTRACT;
pub const USDC_DECIMALS: u8 = 6;
pub const ETH_DECIMALS: u8 = 18;

#[derive(Debug, Clone)]
pub enum AmountSpec {
    Exact(String),
    All,
}

#[derive(Debug, Clone)]
pub struct AccountSendRequest {
    pub from: String,
    pub to: String,
    pub amount: AmountSpec,
    /// `None` for native ETH, `Some("USDC")` for the one resolved token.
    pub token_symbol: Option<String>,
    pub gas_speed: GasSpeed,
}

#[derive(Debug, Clone)]
pub struct AccountSendResult {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub fee: u64,
    pub status: TxStatus,
    pub gas_used: u64,
    pub gas_price: u64,
}

fn resolve_token(symbol: &str) -> Result<(&'static str, u8), TransactionError> {
    match symbol.to_ascii_uppercase().as_str() {
        "USDC" => Ok((USDC_CONTRACT, USDC_DECIMALS)),
        other => Err(TransactionError::UnsupportedToken(other.to_string())),
    }
}

/// send(request): implements spec §4.8 steps 1-9.
pub async fn send(
    request: &AccountSendRequest,
    wallet: &mut WalletHandle,
    seed: &Seed,
    cache: &mut BalanceCache,
    provider: &dyn AccountChainProvider,
    config: &WalletConfig,
) -> Result<AccountSendResult, TransactionError> {
    tracing::debug!(from = %request.from, to = %request.to, "tx pipeline: validate");
    let checksummed = keys::validate_eth_address(&request.to).map_err(|reason| {
        TransactionError::InvalidAddress {
            address: request.to.clone(),
            reason,
        }
    })?;
    if !checksummed {
        tracing::warn!(address = %request.to, "destination given in lower-case form, accepted without checksum verification");
    }

    let token = request
        .token_symbol
        .as_deref()
        .map(resolve_token)
        .transpose()?;
    let (decimals, gas_kind) = match token {
        Some((_, decimals)) => (decimals, GasKind::Erc20),
        None => (ETH_DECIMALS, GasKind::Native),
    };

    let eth_addresses = wallet.chain_addresses(ChainId::Eth)?;
    let index = eth_addresses
        .index_of(&request.from)
        .ok_or_else(|| TransactionError::InvalidAddress {
            address: request.from.clone(),
            reason: "address is not owned by this wallet".to_string(),
        })?;

    tracing::debug!(?gas_kind, speed = ?request.gas_speed, "tx pipeline: estimate");
    let gas_estimate = match provider.estimate_gas(gas_kind, request.gas_speed).await {
        Ok(estimate) => estimate,
        Err(e) => {
            tracing::warn!(error = %e, "gas oracle failed, falling back to configured gas limit");
            let gas_limit = match gas_kind {
                GasKind::Native => config.eth_native_gas_limit,
                GasKind::Erc20 => config.eth_erc20_gas_limit,
            };
            GasEstimate {
                gas_price: FALLBACK_GAS_PRICE_GWEI,
                gas_limit,
            }
        }
    };
    let total_fee = gas_estimate.total_fee();

    let eth_balance = provider
        .get_native_balance(&request.from)
        .await
        .map_err(|e| TransactionError::NetworkError(e.to_string()))?;

    let final_amount: u128 = match (&request.amount, token) {
        (AmountSpec::All, None) => {
            let balance = eth_balance.amount;
            let fee = total_fee as u128;
            if balance <= fee {
                return Err(insufficient(fee as u64, balance as u64, "ETH"));
            }
            balance - fee
        }
        (AmountSpec::All, Some((contract, token_decimals))) => {
            let token_balance = provider
                .get_token_balance(&request.from, contract)
                .await
                .map_err(|e| TransactionError::NetworkError(e.to_string()))?;
            if (eth_balance.amount as u128) < total_fee as u128 {
                return Err(insufficient(total_fee, eth_balance.amount as u64, "ETH (gas)"));
            }
            let _ = token_decimals;
            token_balance.amount
        }
        (AmountSpec::Exact(amount_str), None) => {
            let amount = amount::parse_amount(amount_str, decimals)?;
            let required = amount + total_fee as u128;
            if (eth_balance.amount as u128) < required {
                return Err(insufficient(required as u64, eth_balance.amount as u64, "ETH"));
            }
            amount
        }
        (AmountSpec::Exact(amount_str), Some((contract, token_decimals))) => {
            let amount = amount::parse_amount(amount_str, token_decimals)?;
            let token_balance = provider
                .get_token_balance(&request.from, contract)
                .await
                .map_err(|e| TransactionError::NetworkError(e.to_string()))?;
            if token_balance.amount < amount {
                return Err(insufficient(amount as u64, token_balance.amount as u64, "USDC"));
            }
            if (eth_balance.amount as u128) < total_fee as u128 {
                return Err(insufficient(total_fee, eth_balance.amount as u64, "ETH (gas)"));
            }
            amount
        }
    };

    let path = keys::derivation_path(ChainId::Eth, 0, index);
    let private_key = keys::derive_key(seed, &path)?;

    tracing::debug!(chain_id = config.eth_chain_id, "tx pipeline: sign");
    // Binds the signature to the configured chain id (spec §4.8 step 6)
    // so a signed payload cannot be replayed on a different chain.
    let payload = format!(
        "{}:{}:{}:{}:{}:{}",
        config.eth_chain_id,
        request.from,
        request.to,
        final_amount,
        token.map(|(c, _)| c).unwrap_or(""),
        gas_estimate.gas_price
    );
    let mut hasher = Keccak256::new();
    hasher.update(payload.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();

    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(private_key.as_bytes())
        .map_err(|e| TransactionError::SigningFailed(e.to_string()))?;
    let message = Message::from_digest(digest);
    let signature: ecdsa::Signature = secp.sign_ecdsa(&message, &secret);
    drop(private_key); // zeroed by ZeroizeOnDrop

    let mut signed_bytes = digest.to_vec();
    signed_bytes.extend_from_slice(&signature.serialize_compact());

    tracing::debug!("tx pipeline: broadcast");
    let hash = provider
        .broadcast(&signed_bytes)
        .await
        .map_err(|e| TransactionError::NetworkError(e.to_string()))?;
    tracing::info!(hash = %hash, "tx pipeline: broadcast succeeded");

    invalidate_cache_after_send(cache, &request.from, token.map(|(c, _)| c), &request.amount);

    Ok(AccountSendResult {
        hash,
        from: request.from.clone(),
        to: request.to.clone(),
        amount: amount::format_amount(final_amount, decimals),
        fee: total_fee,
        status: TxStatus::Broadcast,
        gas_used: gas_estimate.gas_limit,
        gas_price: gas_estimate.gas_price,
    })
}

fn insufficient(required: u64, available: u64, symbol: &str) -> TransactionError {
    TransactionError::InsufficientFunds {
        required,
        available,
        symbol: symbol.to_string(),
    }
}

/// Post-send invalidation per spec §4.8 step 8.
fn invalidate_cache_after_send(
    cache: &mut BalanceCache,
    from: &str,
    token_contract: Option<&str>,
    amount: &AmountSpec,
) {
    let native_key = CacheKey {
        chain: ChainId::Eth,
        address: from.to_string(),
        token: String::new(),
    };
    match (token_contract, amount) {
        (None, AmountSpec::All) => {
            cache.set(BalanceCacheEntry {
                chain: ChainId::Eth,
                address: from.to_string(),
                token: String::new(),
                balance: "0.0".to_string(),
                unconfirmed_delta: None,
                symbol: "ETH".to_string(),
                decimals: ETH_DECIMALS,
                updated_at: chrono::Utc::now(),
            });
        }
        (Some(contract), AmountSpec::All) => {
            cache.set(BalanceCacheEntry {
                chain: ChainId::Eth,
                address: from.to_string(),
                token: contract.to_string(),
                balance: "0.0".to_string(),
                unconfirmed_delta: None,
                symbol: "USDC".to_string(),
                decimals: USDC_DECIMALS,
                updated_at: chrono::Utc::now(),
            });
            cache.delete(&native_key);
        }
        (None, AmountSpec::Exact(_)) => {
            cache.delete(&native_key);
        }
        (Some(contract), AmountSpec::Exact(_)) => {
            cache.delete(&native_key);
            cache.delete(&CacheKey {
                chain: ChainId::Eth,
                address: from.to_string(),
                token: contract.to_string(),
            });
        }
    }
}
