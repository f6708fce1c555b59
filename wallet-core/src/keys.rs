//! Seed handling, BIP-32 key derivation and per-chain address rendering.
//!
//! BIP-32/BIP-39/secp256k1 primitives themselves are an external
//! collaborator per spec §1 — this module is a thin, deterministic
//! wrapper around the `bitcoin` crate's `bip32` module plus the
//! chain-specific address encodings (EIP-55 checksummed hex for ETH,
//! Base58Check P2PKH for BSV).

use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{Address as BtcAddress, CompressedPublicKey, NetworkKind};
use sha3::{Digest, Keccak256};
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::chain::ChainId;
use crate::error::VaultError;

/// A BIP-39 seed, typically 64 bytes. Zeroed on drop; never persisted
/// unencrypted, never sent across task boundaries. The drop itself is
/// this crate's "vault lock" moment, logged without ever touching the
/// seed bytes.
pub struct Seed(Vec<u8>);

impl Drop for Seed {
    fn drop(&mut self) {
        self.0.zeroize();
        tracing::debug!("vault locked");
    }
}

impl Seed {
    pub fn from_mnemonic(phrase: &str, passphrase: &str) -> Result<Self, VaultError> {
        let mnemonic = bip39::Mnemonic::parse_normalized(phrase)
            .map_err(|e| VaultError::InvalidMnemonic(e.to_string()))?;
        // Full 64-byte PBKDF2-HMAC-SHA512 seed per BIP-39; unlike this
        // codebase's existing bip39.rs wrapper, this is NOT truncated.
        let seed = mnemonic.to_seed(passphrase);
        Ok(Seed(seed.to_vec()))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Seed(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A derived 32-byte secp256k1 private key. Zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKeyBytes([u8; 32]);

impl PrivateKeyBytes {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Derivation path `m/44'/coin'/0'/0/index`, `change` selecting the
/// receive (0) or change (1) sub-path.
pub fn derivation_path(chain: ChainId, change: u32, index: u32) -> String {
    format!(
        "m/44'/{}'/0'/{}/{}",
        chain.bip44_coin_type(),
        change,
        index
    )
}

/// BIP-32 derive a private key from a seed along `path`.
pub fn derive_key(seed: &Seed, path: &str) -> Result<PrivateKeyBytes, VaultError> {
    let secp = Secp256k1::new();
    let master = Xpriv::new_master(NetworkKind::Main, seed.as_bytes())
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;
    let derivation = DerivationPath::from_str(path)
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;
    let child = master
        .derive_priv(&secp, &derivation)
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;
    Ok(PrivateKeyBytes(child.private_key.secret_bytes()))
}

/// Derive the externally displayable address string for `chain` from a
/// private key, deterministically.
pub fn derive_address(chain: ChainId, key: &PrivateKeyBytes) -> Result<String, VaultError> {
    match chain {
        ChainId::Eth => eth_checksummed_address(key),
        ChainId::Bsv | ChainId::Btc | ChainId::Bch => bsv_p2pkh_address(key),
    }
}

fn secp_pubkey(
    key: &PrivateKeyBytes,
) -> Result<bitcoin::secp256k1::PublicKey, VaultError> {
    let secp = Secp256k1::new();
    let secret = bitcoin::secp256k1::SecretKey::from_slice(key.as_bytes())
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;
    Ok(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &secret))
}

fn eth_checksummed_address(key: &PrivateKeyBytes) -> Result<String, VaultError> {
    let pubkey = secp_pubkey(key)?;
    let uncompressed = pubkey.serialize_uncompressed(); // 0x04 || X || Y, 65 bytes
    let mut hasher = Keccak256::new();
    hasher.update(&uncompressed[1..]);
    let hash = hasher.finalize();
    let address_bytes = &hash[12..]; // last 20 bytes

    let lower_hex = hex::encode(address_bytes);
    Ok(format!("0x{}", eip55_checksum(&lower_hex)))
}

/// EIP-55 mixed-case checksum: a hex digit is upper-cased if the
/// corresponding nibble of keccak256(lowercase address) is >= 8.
fn eip55_checksum(lower_hex: &str) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(lower_hex.as_bytes());
    let hash = hasher.finalize();

    lower_hex
        .chars()
        .enumerate()
        .map(|(i, c)| {
            if c.is_ascii_digit() {
                return c;
            }
            let byte = hash[i / 2];
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
            if nibble >= 8 {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect()
}

/// BSV inherited Bitcoin's P2PKH address format at the fork; mainnet
/// version byte and Base58Check layout are identical, so `bitcoin`'s
/// own mainnet P2PKH encoder is reused rather than reimplemented.
fn bsv_p2pkh_address(key: &PrivateKeyBytes) -> Result<String, VaultError> {
    let pubkey = secp_pubkey(key)?;
    let compressed = CompressedPublicKey(pubkey);
    let address = BtcAddress::p2pkh(compressed, bitcoin::Network::Bitcoin);
    Ok(address.to_string())
}

/// Parse a BSV/Bitcoin-style Base58Check P2PKH address, validating the
/// checksum and version byte.
pub fn parse_bsv_address(address: &str) -> Result<BtcAddress<bitcoin::address::NetworkUnchecked>, String> {
    BtcAddress::from_str(address).map_err(|e| e.to_string())
}

/// Validates an ETH destination address per spec §4.8 step 1: must be
/// `0x` + 40 hex digits, and if mixed-case must match its EIP-55
/// checksum. Returns `true` when the input was already checksummed,
/// `false` when it was accepted as an all-lowercase form (caller emits
/// a warning for that case).
pub fn validate_eth_address(address: &str) -> Result<bool, String> {
    let hex_part = address
        .strip_prefix("0x")
        .ok_or_else(|| "address must start with 0x".to_string())?;
    if hex_part.len() != 40 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err("address must be 0x followed by 40 hex digits".to_string());
    }
    if hex_part.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()) {
        return Ok(false);
    }
    let expected = eip55_checksum(&hex_part.to_ascii_lowercase());
    if hex_part == expected {
        Ok(true)
    } else {
        Err("address fails EIP-55 checksum".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn eth_index_zero_matches_canonical_vector() {
        let seed = Seed::from_mnemonic(CANONICAL_MNEMONIC, "").unwrap();
        let path = derivation_path(ChainId::Eth, 0, 0);
        assert_eq!(path, "m/44'/60'/0'/0/0");
        let key = derive_key(&seed, &path).unwrap();
        let address = derive_address(ChainId::Eth, &key).unwrap();
        assert_eq!(address, "0x9858EfFD232B4033E47d90003D41EC34EcaEda94");
    }

    #[test]
    fn bsv_index_zero_is_deterministic() {
        let seed = Seed::from_mnemonic(CANONICAL_MNEMONIC, "").unwrap();
        let path = derivation_path(ChainId::Bsv, 0, 0);
        assert_eq!(path, "m/44'/236'/0'/0/0");
        let key1 = derive_key(&seed, &path).unwrap();
        let addr1 = derive_address(ChainId::Bsv, &key1).unwrap();

        let key2 = derive_key(&seed, &path).unwrap();
        let addr2 = derive_address(ChainId::Bsv, &key2).unwrap();
        assert_eq!(addr1, addr2);
        assert!(addr1.starts_with('1'));
    }

    #[test]
    fn derive_key_is_deterministic_across_calls() {
        let seed = Seed::from_mnemonic(CANONICAL_MNEMONIC, "").unwrap();
        let path = derivation_path(ChainId::Eth, 0, 3);
        let k1 = derive_key(&seed, &path).unwrap();
        let k2 = derive_key(&seed, &path).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn different_indices_produce_different_addresses() {
        let seed = Seed::from_mnemonic(CANONICAL_MNEMONIC, "").unwrap();
        let a0 = derive_address(
            ChainId::Eth,
            &derive_key(&seed, &derivation_path(ChainId::Eth, 0, 0)).unwrap(),
        )
        .unwrap();
        let a1 = derive_address(
            ChainId::Eth,
            &derive_key(&seed, &derivation_path(ChainId::Eth, 0, 1)).unwrap(),
        )
        .unwrap();
        assert_ne!(a0, a1);
    }
}
