//! Error taxonomy for the wallet core.
//!
//! Each component exposes a `thiserror`-derived error enumerating the
//! failure kinds it can produce. [`WalletCoreError`] aggregates all of
//! them behind one type for call sites that need to collect errors from
//! more than one component (batch operations, the transaction engine).

use std::fmt;

/// Errors produced by the Secret Vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("vault password is incorrect")]
    WrongPassword,
    #[error("vault file is corrupt or tampered: {0}")]
    CorruptVault(String),
    #[error("unsupported vault format version {0}")]
    UnsupportedVersion(u32),
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
}

/// Errors produced by the Wallet Registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("wallet '{0}' not found")]
    WalletNotFound(String),
    #[error("wallet '{0}' already exists")]
    WalletExists(String),
    #[error("chain {0:?} is not enabled for this wallet")]
    ChainNotEnabled(crate::chain::ChainId),
    #[error("chain {0:?} is recognized but not operational")]
    NotImplemented(crate::chain::ChainId),
    #[error("io error: {0}")]
    Io(String),
    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Errors produced by the UTXO Store.
#[derive(Debug, thiserror::Error)]
pub enum UtxoStoreError {
    #[error("address {0} is not registered")]
    AddressUnknown(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("corrupt utxo store: {0}")]
    Corrupt(String),
}

/// Errors produced by the Balance Cache.
#[derive(Debug, thiserror::Error)]
pub enum BalanceCacheError {
    #[error("cache file not found")]
    CacheNotFound,
    #[error("corrupt cache, resetting to empty: {0}")]
    CorruptCache(String),
    #[error("io error: {0}")]
    Io(String),
}

/// Errors produced by the Balance Service and UTXO Service fan-out.
#[derive(Debug, thiserror::Error, Clone)]
pub enum FetchError {
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("retryable provider error: {0}")]
    Retryable(String),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("canceled")]
    Canceled,
}

/// Errors produced by the Transaction Engine.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("invalid destination address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("invalid amount string '{amount}': {reason}")]
    InvalidAmount { amount: String, reason: String },
    #[error("unsupported token symbol '{0}'")]
    UnsupportedToken(String),
    #[error("insufficient funds: required {required}, available {available} {symbol}")]
    InsufficientFunds {
        required: u64,
        available: u64,
        symbol: String,
    },
    #[error("no utxos available to spend")]
    NoUtxosAvailable,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    UtxoStore(#[from] UtxoStoreError),
    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Aggregate error used at component-boundary call sites and by batch
/// operations that need one error type.
#[derive(Debug)]
pub enum WalletCoreError {
    InputInvalid(String),
    Vault(VaultError),
    Registry(RegistryError),
    UtxoStore(UtxoStoreError),
    BalanceCache(BalanceCacheError),
    Fetch(FetchError),
    Transaction(TransactionError),
    PolicyDenied(String),
}

impl fmt::Display for WalletCoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletCoreError::InputInvalid(msg) => write!(f, "invalid input: {msg}"),
            WalletCoreError::Vault(e) => write!(f, "vault error: {e}"),
            WalletCoreError::Registry(e) => write!(f, "registry error: {e}"),
            WalletCoreError::UtxoStore(e) => write!(f, "utxo store error: {e}"),
            WalletCoreError::BalanceCache(e) => write!(f, "balance cache error: {e}"),
            WalletCoreError::Fetch(e) => write!(f, "fetch error: {e}"),
            WalletCoreError::Transaction(e) => write!(f, "transaction error: {e}"),
            WalletCoreError::PolicyDenied(msg) => write!(f, "policy denied: {msg}"),
        }
    }
}

impl std::error::Error for WalletCoreError {}

impl From<VaultError> for WalletCoreError {
    fn from(e: VaultError) -> Self {
        WalletCoreError::Vault(e)
    }
}
impl From<RegistryError> for WalletCoreError {
    fn from(e: RegistryError) -> Self {
        WalletCoreError::Registry(e)
    }
}
impl From<UtxoStoreError> for WalletCoreError {
    fn from(e: UtxoStoreError) -> Self {
        WalletCoreError::UtxoStore(e)
    }
}
impl From<BalanceCacheError> for WalletCoreError {
    fn from(e: BalanceCacheError) -> Self {
        WalletCoreError::BalanceCache(e)
    }
}
impl From<FetchError> for WalletCoreError {
    fn from(e: FetchError) -> Self {
        WalletCoreError::Fetch(e)
    }
}
impl From<TransactionError> for WalletCoreError {
    fn from(e: TransactionError) -> Self {
        WalletCoreError::Transaction(e)
    }
}

pub type WalletCoreResult<T> = Result<T, WalletCoreError>;
