//! UTXO-model pipeline (spec §4.9): BSV multi-address sweeps and
//! partial sends. Transactions are assembled and signed using the
//! `bitcoin` crate's legacy transaction and sighash types, since BSV
//! inherited Bitcoin's pre-fork wire format and P2PKH script layout
//! (the same simplification [`crate::keys::bsv_p2pkh_address`] makes
//! for address encoding).

use std::collections::{HashMap, HashSet};

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{ecdsa, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};

use crate::balance_cache::{BalanceCache, BalanceCacheEntry, CacheKey};
use crate::chain::ChainId;
use crate::error::TransactionError;
use crate::keys::{self, Seed};
use crate::provider::UtxoChainProvider;
use crate::registry::WalletHandle;
use crate::tx_engine::{estimate_fee, fee_for_bytes, TxStatus};
use crate::utxo_store::{StoredUtxo, UtxoStore};

#[derive(Debug, Clone)]
pub enum BsvAmountSpec {
    Exact(u64),
    Sweep,
}

#[derive(Debug, Clone)]
pub struct UtxoSendRequest {
    pub to: String,
    pub amount: BsvAmountSpec,
    pub fee_rate_sat_per_kb: u64,
}

#[derive(Debug, Clone)]
pub struct UtxoSendResult {
    pub hash: String,
    pub from: Vec<String>,
    pub to: String,
    pub amount: u64,
    pub fee: u64,
    pub status: TxStatus,
}

/// send(request): implements spec §4.9 steps 1-11.
pub async fn send(
    request: &UtxoSendRequest,
    wallet: &mut WalletHandle,
    seed: &Seed,
    store: &mut UtxoStore,
    cache: &mut BalanceCache,
    provider: &dyn UtxoChainProvider,
) -> Result<UtxoSendResult, TransactionError> {
    tracing::debug!(to = %request.to, "tx pipeline: validate");
    keys::parse_bsv_address(&request.to).map_err(|reason| TransactionError::InvalidAddress {
        address: request.to.clone(),
        reason,
    })?;

    tracing::debug!("tx pipeline: fee quote");
    let fee_rate = match provider.get_fee_quote().await {
        Ok(quote) => quote.standard_rate_sat_per_kb,
        Err(_) => request.fee_rate_sat_per_kb,
    };

    let bsv_addresses = wallet.chain_addresses(ChainId::Bsv)?.clone();
    let all_addresses: Vec<String> = bsv_addresses.all().map(|a| a.address.clone()).collect();

    tracing::debug!(addresses = all_addresses.len(), "tx pipeline: reconcile");
    for address in &all_addresses {
        if let Ok(remote) = provider.list_utxos(address).await {
            store.reconcile(ChainId::Bsv, address, &remote);
        }
    }

    let candidates: Vec<StoredUtxo> = all_addresses
        .iter()
        .flat_map(|addr| store.get_utxos(ChainId::Bsv, Some(addr)))
        .filter(|u| !store.is_spent(ChainId::Bsv, &u.txid, u.vout))
        .collect();

    tracing::debug!(candidates = candidates.len(), "tx pipeline: select");
    let (selected, recipient_amount, fee) = match request.amount {
        BsvAmountSpec::Sweep => {
            if candidates.is_empty() {
                return Err(TransactionError::NoUtxosAvailable);
            }
            let total: u64 = candidates.iter().map(|u| u.amount).sum();
            let fee = estimate_fee(candidates.len(), 1, fee_rate);
            if total <= fee {
                return Err(TransactionError::InsufficientFunds {
                    required: fee,
                    available: total,
                    symbol: "BSV".to_string(),
                });
            }
            (candidates, total - fee, fee)
        }
        BsvAmountSpec::Exact(amount_sats) => {
            let mut sorted = candidates.clone();
            sorted.sort_by(|a, b| b.amount.cmp(&a.amount));

            let mut selected = Vec::new();
            let mut total = 0u64;
            let mut fee = estimate_fee(0, 2, fee_rate);
            for utxo in sorted {
                if total >= amount_sats + fee {
                    break;
                }
                total += utxo.amount;
                selected.push(utxo);
                fee = estimate_fee(selected.len(), 2, fee_rate);
            }
            if total < amount_sats + fee {
                return Err(TransactionError::InsufficientFunds {
                    required: amount_sats + fee,
                    available: total,
                    symbol: "BSV".to_string(),
                });
            }
            (selected, amount_sats, fee)
        }
    };

    let is_sweep = matches!(request.amount, BsvAmountSpec::Sweep);
    let total_inputs: u64 = selected.iter().map(|u| u.amount).sum();
    let change_amount = if is_sweep {
        0
    } else {
        total_inputs - recipient_amount - fee
    };

    let change_address = if !is_sweep && change_amount > 0 {
        let record = wallet.derive_next_change(ChainId::Bsv, seed)?;
        wallet.persist_metadata()?;
        Some(record.address)
    } else {
        None
    };

    let owning_addresses: HashSet<String> = selected.iter().map(|u| u.address.clone()).collect();
    let mut keys_by_address: HashMap<String, keys::PrivateKeyBytes> = HashMap::new();
    for address in &owning_addresses {
        let index = bsv_addresses
            .index_of(address)
            .ok_or_else(|| TransactionError::InvalidAddress {
                address: address.clone(),
                reason: "input address is not owned by this wallet".to_string(),
            })?;
        let path = keys::derivation_path(ChainId::Bsv, 0, index);
        keys_by_address.insert(address.clone(), keys::derive_key(seed, &path)?);
    }

    // Sign, then reconcile the preliminary `estimate_fee()` figure against
    // the real serialized size: DER ECDSA signatures vary 70-72 bytes, so
    // the byte-accurate fee can differ by a few sats/kb from the estimate.
    // Amount changes never affect serialized size, so at most one resign
    // is needed to converge; the loop bound is defensive.
    tracing::debug!(inputs = selected.len(), "tx pipeline: sign");
    let mut recipient_amount = recipient_amount;
    let mut change_amount = change_amount;
    let mut fee = fee;
    let mut signed_bytes;
    const MAX_FEE_RECONCILE_ITERS: u32 = 3;
    let mut iteration = 0;
    loop {
        let build_result = build_and_sign(
            &selected,
            &request.to,
            recipient_amount,
            change_address.as_deref(),
            change_amount,
            &keys_by_address,
        );
        let bytes = build_result?;
        let actual_fee = fee_for_bytes(bytes.len() as u64, fee_rate);
        iteration += 1;
        if actual_fee == fee || iteration >= MAX_FEE_RECONCILE_ITERS {
            fee = actual_fee;
            signed_bytes = bytes;
            break;
        }
        if is_sweep {
            if total_inputs <= actual_fee {
                keys_by_address.clear();
                return Err(TransactionError::InsufficientFunds {
                    required: actual_fee,
                    available: total_inputs,
                    symbol: "BSV".to_string(),
                });
            }
            recipient_amount = total_inputs - actual_fee;
        } else {
            if total_inputs < recipient_amount + actual_fee {
                keys_by_address.clear();
                return Err(TransactionError::InsufficientFunds {
                    required: recipient_amount + actual_fee,
                    available: total_inputs,
                    symbol: "BSV".to_string(),
                });
            }
            change_amount = total_inputs - recipient_amount - actual_fee;
        }
        fee = actual_fee;
    }
    keys_by_address.clear(); // drops each PrivateKeyBytes, zeroing on drop

    tracing::debug!("tx pipeline: broadcast");
    let hash = provider
        .broadcast(&signed_bytes)
        .await
        .map_err(|e| TransactionError::NetworkError(e.to_string()))?;
    tracing::info!(hash = %hash, "tx pipeline: broadcast succeeded");

    for utxo in &selected {
        store.mark_spent(ChainId::Bsv, &utxo.txid, utxo.vout, &hash);
    }
    store.save()?;

    invalidate_cache_after_send(cache, &owning_addresses, is_sweep);

    Ok(UtxoSendResult {
        hash,
        from: owning_addresses.into_iter().collect(),
        to: request.to.clone(),
        amount: recipient_amount,
        fee,
        status: TxStatus::Broadcast,
    })
}

fn build_and_sign(
    inputs: &[StoredUtxo],
    recipient: &str,
    recipient_amount: u64,
    change_address: Option<&str>,
    change_amount: u64,
    keys_by_address: &HashMap<String, keys::PrivateKeyBytes>,
) -> Result<Vec<u8>, TransactionError> {
    let recipient_addr = keys::parse_bsv_address(recipient)
        .map_err(TransactionError::SigningFailed)?
        .assume_checked();
    let recipient_script = recipient_addr.script_pubkey();

    let mut outputs = vec![TxOut {
        value: Amount::from_sat(recipient_amount),
        script_pubkey: recipient_script,
    }];
    if let Some(change) = change_address {
        if change_amount > 0 {
            let change_addr = keys::parse_bsv_address(change)
                .map_err(TransactionError::SigningFailed)?
                .assume_checked();
            outputs.push(TxOut {
                value: Amount::from_sat(change_amount),
                script_pubkey: change_addr.script_pubkey(),
            });
        }
    }

    let tx_inputs: Vec<TxIn> = inputs
        .iter()
        .map(|u| TxIn {
            previous_output: OutPoint {
                txid: u
                    .txid
                    .parse::<Txid>()
                    .unwrap_or_else(|_| Txid::from_byte_array([0u8; 32])),
                vout: u.vout,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        })
        .collect();

    let mut tx = Transaction {
        version: bitcoin::transaction::Version::ONE,
        lock_time: LockTime::ZERO,
        input: tx_inputs,
        output: outputs,
    };

    let secp = Secp256k1::new();
    for (i, utxo) in inputs.iter().enumerate() {
        let key = keys_by_address
            .get(&utxo.address)
            .ok_or_else(|| TransactionError::SigningFailed("missing key for input".to_string()))?;
        let secret = SecretKey::from_slice(key.as_bytes())
            .map_err(|e| TransactionError::SigningFailed(e.to_string()))?;
        let public = bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &secret);
        let script_pubkey = ScriptBuf::from_bytes(utxo.script_pubkey.clone());

        let mut cache = SighashCache::new(&tx);
        let sighash = cache
            .legacy_signature_hash(i, &script_pubkey, EcdsaSighashType::All.to_u32())
            .map_err(|e| TransactionError::SigningFailed(e.to_string()))?;
        let message = Message::from_digest(sighash.to_byte_array());
        let signature: ecdsa::Signature = secp.sign_ecdsa(&message, &secret);

        let mut sig_bytes = signature.serialize_der().to_vec();
        sig_bytes.push(EcdsaSighashType::All.to_u32() as u8);

        let script_sig = bitcoin::script::Builder::new()
            .push_slice(<&bitcoin::script::PushBytes>::try_from(sig_bytes.as_slice()).unwrap())
            .push_slice(public.serialize())
            .into_script();
        tx.input[i].script_sig = script_sig;
    }

    Ok(bitcoin::consensus::encode::serialize(&tx))
}

/// Post-send invalidation per spec §4.9 step 11.
fn invalidate_cache_after_send(cache: &mut BalanceCache, source_addresses: &HashSet<String>, sweep: bool) {
    for address in source_addresses {
        let key = CacheKey {
            chain: ChainId::Bsv,
            address: address.clone(),
            token: String::new(),
        };
        if sweep {
            cache.set(BalanceCacheEntry {
                chain: ChainId::Bsv,
                address: address.clone(),
                token: String::new(),
                balance: "0.0".to_string(),
                unconfirmed_delta: None,
                symbol: "BSV".to_string(),
                decimals: 8,
                updated_at: chrono::Utc::now(),
            });
        } else {
            cache.delete(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletConfig;
    use crate::provider::{FeeQuote, RemoteUtxo};
    use crate::registry::WalletRegistry;
    use async_trait::async_trait;
    use tempfile::TempDir;

    const CANONICAL_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    const RECIPIENT: &str = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2";

    struct FakeProvider {
        utxos_by_address: HashMap<String, Vec<RemoteUtxo>>,
    }

    fn p2pkh_script_for(address: &str) -> Vec<u8> {
        keys::parse_bsv_address(address)
            .unwrap()
            .assume_checked()
            .script_pubkey()
            .to_bytes()
    }

    #[async_trait]
    impl UtxoChainProvider for FakeProvider {
        async fn list_utxos(&self, address: &str) -> Result<Vec<RemoteUtxo>, crate::error::FetchError> {
            Ok(self.utxos_by_address.get(address).cloned().unwrap_or_default())
        }
        async fn broadcast(&self, _signed_tx_bytes: &[u8]) -> Result<String, crate::error::FetchError> {
            Ok("bsv-tx-hash".to_string())
        }
        async fn get_fee_quote(&self) -> Result<FeeQuote, crate::error::FetchError> {
            Ok(FeeQuote {
                standard_rate_sat_per_kb: 1,
                source: "fake".to_string(),
            })
        }
    }

    fn setup() -> (TempDir, WalletConfig, WalletRegistry) {
        let dir = TempDir::new().unwrap();
        let mut config = WalletConfig::default();
        config.home_dir = dir.path().to_path_buf();
        let registry = WalletRegistry::new(config.clone());
        (dir, config, registry)
    }

    #[tokio::test]
    async fn partial_send_excludes_locally_spent_utxo() {
        let (_dir, config, registry) = setup();
        registry
            .create("w", &[ChainId::Bsv], CANONICAL_MNEMONIC, "", b"pw")
            .unwrap();
        let (mut wallet, seed) = registry.unlock("w", b"pw").unwrap();
        let address = wallet.chain_addresses(ChainId::Bsv).unwrap().receive[0].address.clone();

        let mut store = UtxoStore::new_for_wallet(&config, "w");
        store.reconcile(
            ChainId::Bsv,
            &address,
            &[
                RemoteUtxo {
                    txid: "a".repeat(64),
                    vout: 0,
                    amount: 1_000_000,
                    script_pubkey: p2pkh_script_for(&address),
                    confirmations: 6,
                    address: address.clone(),
                },
                RemoteUtxo {
                    txid: "b".repeat(64),
                    vout: 0,
                    amount: 500_000,
                    script_pubkey: p2pkh_script_for(&address),
                    confirmations: 6,
                    address: address.clone(),
                },
            ],
        );
        store.mark_spent(ChainId::Bsv, &"a".repeat(64), 0, "already-spent-tx");

        let mut cache = BalanceCache::load(&config, "w");
        let provider = FakeProvider {
            utxos_by_address: HashMap::new(),
        };

        let request = UtxoSendRequest {
            to: RECIPIENT.to_string(),
            amount: BsvAmountSpec::Exact(400_000),
            fee_rate_sat_per_kb: 1,
        };

        let result = send(&request, &mut wallet, &seed, &mut store, &mut cache, &provider)
            .await
            .unwrap();
        assert_eq!(result.from, vec![address]);
        assert_eq!(result.amount, 400_000);
    }

    #[tokio::test]
    async fn sweep_across_two_addresses_uses_both_keys_and_leaves_no_change() {
        let (_dir, config, registry) = setup();
        registry
            .create("w", &[ChainId::Bsv], CANONICAL_MNEMONIC, "", b"pw")
            .unwrap();
        let (mut wallet, seed) = registry.unlock("w", b"pw").unwrap();
        let addr_a = wallet.chain_addresses(ChainId::Bsv).unwrap().receive[0].address.clone();
        let addr_b = wallet.derive_next_receive(ChainId::Bsv, &seed).unwrap().address;
        wallet.persist_metadata().unwrap();

        let mut store = UtxoStore::new_for_wallet(&config, "w");
        store.reconcile(
            ChainId::Bsv,
            &addr_a,
            &[RemoteUtxo {
                txid: "c".repeat(64),
                vout: 0,
                amount: 600_000,
                script_pubkey: p2pkh_script_for(&addr_a),
                confirmations: 6,
                address: addr_a.clone(),
            }],
        );
        store.reconcile(
            ChainId::Bsv,
            &addr_b,
            &[RemoteUtxo {
                txid: "d".repeat(64),
                vout: 0,
                amount: 900_000,
                script_pubkey: p2pkh_script_for(&addr_b),
                confirmations: 6,
                address: addr_b.clone(),
            }],
        );

        let mut cache = BalanceCache::load(&config, "w");
        let provider = FakeProvider {
            utxos_by_address: HashMap::new(),
        };

        let request = UtxoSendRequest {
            to: RECIPIENT.to_string(),
            amount: BsvAmountSpec::Sweep,
            fee_rate_sat_per_kb: 1,
        };

        let result = send(&request, &mut wallet, &seed, &mut store, &mut cache, &provider)
            .await
            .unwrap();

        assert_eq!(result.from.len(), 2);
        assert_eq!(result.amount + result.fee, 1_500_000);
        assert!(store.is_spent(ChainId::Bsv, &"c".repeat(64), 0));
        assert!(store.is_spent(ChainId::Bsv, &"d".repeat(64), 0));

        let key_a = CacheKey {
            chain: ChainId::Bsv,
            address: addr_a,
            token: String::new(),
        };
        assert_eq!(cache.get(&key_a).unwrap().balance, "0.0");
    }
}
