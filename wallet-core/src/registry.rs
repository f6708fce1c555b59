//! Wallet Registry (spec §4.2): the set of chains enabled per wallet,
//! the derived-address lists per chain, and the monotonic next-unused
//! index counters.
//!
//! Grounded on this codebase's `wallet_manager.rs` (multi-wallet
//! lifecycle: create/list/load/save) generalized from its ML-DSA,
//! single-address-per-wallet shape to the spec's per-chain derivation
//! ladder, and on `wallet_serde.rs` for the one-file-per-wallet
//! persistence shape (here split into a cleartext metadata section and
//! an encrypted seed section per spec §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::chain::ChainId;
use crate::config::WalletConfig;
use crate::error::RegistryError;
use crate::keys::{self, Seed};
use crate::vault::EncryptedSeed;

const SCHEMA_VERSION: u32 = 1;

/// One derived address: immutable once created (spec §3 `Address`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressRecord {
    pub index: u32,
    pub path: String,
    pub address: String,
    pub is_change: bool,
}

/// Per-chain derivation ladder: receive and change address lists plus
/// their next-unused index counters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChainAddresses {
    pub receive: Vec<AddressRecord>,
    pub change: Vec<AddressRecord>,
    pub next_receive_index: u32,
    pub next_change_index: u32,
}

impl ChainAddresses {
    /// All addresses (receive + change) this wallet owns on the chain,
    /// used by the transaction engine to map an owning address back to
    /// a derivation index for signing.
    pub fn all(&self) -> impl Iterator<Item = &AddressRecord> {
        self.receive.iter().chain(self.change.iter())
    }

    pub fn index_of(&self, address: &str) -> Option<u32> {
        self.all().find(|a| a.address == address).map(|a| a.index)
    }
}

/// On-disk file shape per spec §6: cleartext address lists alongside
/// one encrypted seed envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalletFile {
    version: u32,
    created_at: DateTime<Utc>,
    encrypted_seed: EncryptedSeed,
    chains: HashMap<ChainId, ChainAddresses>,
}

/// A loaded wallet's metadata. Holds no secret material; `unlock`
/// separately returns an owned [`Seed`] scoped to the caller.
pub struct WalletHandle {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
    pub chains: HashMap<ChainId, ChainAddresses>,
    encrypted_seed: EncryptedSeed,
    path: PathBuf,
}

impl WalletHandle {
    pub fn add_chain(&mut self, chain: ChainId) {
        self.chains.entry(chain).or_default();
    }

    pub fn chain_addresses(&self, chain: ChainId) -> Result<&ChainAddresses, RegistryError> {
        self.chains
            .get(&chain)
            .ok_or(RegistryError::ChainNotEnabled(chain))
    }

    /// derive-next-receive: increments the per-chain counter, derives
    /// the address at that index, appends it, returns the record. Does
    /// not persist — callers that need crash-safety around a change
    /// address call [`Self::persist_metadata`] explicitly before using
    /// the derived address (spec §4.9 step 6).
    pub fn derive_next_receive(
        &mut self,
        chain: ChainId,
        seed: &Seed,
    ) -> Result<AddressRecord, RegistryError> {
        self.derive_next(chain, seed, false)
    }

    /// derive-next-change: analogous but uses the change=1 sub-path
    /// for UTXO chains. For ETH the caller should reuse the existing
    /// receive address instead of calling this (account model has no
    /// distinct change output).
    pub fn derive_next_change(
        &mut self,
        chain: ChainId,
        seed: &Seed,
    ) -> Result<AddressRecord, RegistryError> {
        self.derive_next(chain, seed, true)
    }

    fn derive_next(
        &mut self,
        chain: ChainId,
        seed: &Seed,
        is_change: bool,
    ) -> Result<AddressRecord, RegistryError> {
        if !chain.is_operational() {
            return Err(RegistryError::NotImplemented(chain));
        }
        let entry = self
            .chains
            .get_mut(&chain)
            .ok_or(RegistryError::ChainNotEnabled(chain))?;
        let index = if is_change {
            entry.next_change_index
        } else {
            entry.next_receive_index
        };
        let change_flag = if is_change { 1 } else { 0 };
        let path = keys::derivation_path(chain, change_flag, index);
        let key = keys::derive_key(seed, &path)?;
        let address = keys::derive_address(chain, &key)?;
        let record = AddressRecord {
            index,
            path,
            address,
            is_change,
        };
        if is_change {
            entry.change.push(record.clone());
            entry.next_change_index += 1;
        } else {
            entry.receive.push(record.clone());
            entry.next_receive_index += 1;
        }
        Ok(record)
    }

    /// derive-initial-addresses: populates `count` receive addresses
    /// up front for a freshly created chain (index 0..count).
    pub fn derive_initial_addresses(
        &mut self,
        chain: ChainId,
        seed: &Seed,
        count: u32,
    ) -> Result<Vec<AddressRecord>, RegistryError> {
        (0..count)
            .map(|_| self.derive_next_receive(chain, seed))
            .collect()
    }

    /// persist-metadata: atomically rewrites the whole wallet file
    /// (cleartext chains + unchanged encrypted seed envelope).
    pub fn persist_metadata(&self) -> Result<(), RegistryError> {
        let file = WalletFile {
            version: self.schema_version,
            created_at: self.created_at,
            encrypted_seed: self.encrypted_seed.clone(),
            chains: self.chains.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(|e| RegistryError::Io(e.to_string()))?;
        crate::persist::write_atomic(&self.path, &bytes).map_err(|e| RegistryError::Io(e.to_string()))
    }
}

pub struct WalletRegistry {
    config: WalletConfig,
}

impl WalletRegistry {
    pub fn new(config: WalletConfig) -> Self {
        WalletRegistry { config }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.config.wallets_dir().join(format!("{name}.wallet.json"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).exists()
    }

    pub fn list(&self) -> Result<Vec<String>, RegistryError> {
        let dir = self.config.wallets_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| RegistryError::Io(e.to_string()))? {
            let entry = entry.map_err(|e| RegistryError::Io(e.to_string()))?;
            if let Some(name) = entry
                .file_name()
                .to_string_lossy()
                .strip_suffix(".wallet.json")
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// create(name, chains): derives the seed from `mnemonic`, encrypts
    /// it under `password`, derives one initial receive address per
    /// requested chain, and persists the new wallet file.
    pub fn create(
        &self,
        name: &str,
        chains: &[ChainId],
        mnemonic: &str,
        passphrase: &str,
        password: &[u8],
    ) -> Result<WalletHandle, RegistryError> {
        if self.exists(name) {
            return Err(RegistryError::WalletExists(name.to_string()));
        }
        let seed = Seed::from_mnemonic(mnemonic, passphrase)?;
        let encrypted_seed = EncryptedSeed::encrypt(&seed, password, &self.config.kdf)?;

        let mut handle = WalletHandle {
            name: name.to_string(),
            created_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
            chains: HashMap::new(),
            encrypted_seed,
            path: self.path_for(name),
        };
        for &chain in chains {
            handle.add_chain(chain);
            if chain.is_operational() {
                handle.derive_next_receive(chain, &seed)?;
            }
        }
        handle.persist_metadata()?;
        Ok(handle)
    }

    /// Load wallet metadata (cleartext chain/address lists) without
    /// decrypting the seed.
    pub fn load_metadata(&self, name: &str) -> Result<WalletHandle, RegistryError> {
        let path = self.path_for(name);
        let bytes = std::fs::read(&path).map_err(|_| RegistryError::WalletNotFound(name.to_string()))?;
        let file: WalletFile =
            serde_json::from_slice(&bytes).map_err(|e| RegistryError::Io(e.to_string()))?;
        Ok(WalletHandle {
            name: name.to_string(),
            created_at: file.created_at,
            schema_version: file.version,
            chains: file.chains,
            encrypted_seed: file.encrypted_seed,
            path,
        })
    }

    /// Unlock: loads metadata and decrypts the seed. The returned
    /// [`Seed`] is owned by the caller for the duration of the
    /// unlocked session and zeroes on drop.
    pub fn unlock(&self, name: &str, password: &[u8]) -> Result<(WalletHandle, Seed), RegistryError> {
        let handle = self.load_metadata(name)?;
        let seed = match handle.encrypted_seed.decrypt(password) {
            Ok(seed) => seed,
            Err(e) => {
                tracing::warn!(wallet = %name, "wallet unlock failed");
                return Err(RegistryError::Vault(e));
            }
        };
        tracing::info!(wallet = %name, "wallet unlocked");
        Ok((handle, seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CANONICAL_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn test_registry() -> (TempDir, WalletRegistry) {
        let dir = TempDir::new().unwrap();
        let mut config = WalletConfig::default();
        config.home_dir = dir.path().to_path_buf();
        (dir, WalletRegistry::new(config))
    }

    #[test]
    fn create_derives_index_zero_address() {
        let (_dir, registry) = test_registry();
        let handle = registry
            .create(
                "alice",
                &[ChainId::Eth, ChainId::Bsv],
                CANONICAL_MNEMONIC,
                "",
                b"password",
            )
            .unwrap();
        let eth = handle.chain_addresses(ChainId::Eth).unwrap();
        assert_eq!(eth.receive.len(), 1);
        assert_eq!(eth.receive[0].index, 0);
        assert_eq!(
            eth.receive[0].address,
            "0x9858EfFD232B4033E47d90003D41EC34EcaEda94"
        );
    }

    #[test]
    fn create_twice_fails_with_wallet_exists() {
        let (_dir, registry) = test_registry();
        registry
            .create("bob", &[ChainId::Eth], CANONICAL_MNEMONIC, "", b"pw")
            .unwrap();
        let result = registry.create("bob", &[ChainId::Eth], CANONICAL_MNEMONIC, "", b"pw");
        assert!(matches!(result, Err(RegistryError::WalletExists(_))));
    }

    #[test]
    fn unlock_round_trips_seed_and_derives_more_addresses() {
        let (_dir, registry) = test_registry();
        registry
            .create("carol", &[ChainId::Eth], CANONICAL_MNEMONIC, "", b"pw")
            .unwrap();

        let (mut handle, seed) = registry.unlock("carol", b"pw").unwrap();
        let next = handle.derive_next_receive(ChainId::Eth, &seed).unwrap();
        assert_eq!(next.index, 1);
        handle.persist_metadata().unwrap();

        let reloaded = registry.load_metadata("carol").unwrap();
        assert_eq!(reloaded.chain_addresses(ChainId::Eth).unwrap().receive.len(), 2);
    }

    #[test]
    fn unlock_wrong_password_fails() {
        let (_dir, registry) = test_registry();
        registry
            .create("dave", &[ChainId::Eth], CANONICAL_MNEMONIC, "", b"pw")
            .unwrap();
        let result = registry.unlock("dave", b"wrong");
        assert!(result.is_err());
    }

    #[test]
    fn list_returns_created_wallets() {
        let (_dir, registry) = test_registry();
        registry
            .create("erin", &[ChainId::Eth], CANONICAL_MNEMONIC, "", b"pw")
            .unwrap();
        registry
            .create("frank", &[ChainId::Bsv], CANONICAL_MNEMONIC, "", b"pw")
            .unwrap();
        let names = registry.list().unwrap();
        assert_eq!(names, vec!["erin".to_string(), "frank".to_string()]);
    }
}
