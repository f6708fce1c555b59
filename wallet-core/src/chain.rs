use serde::{Deserialize, Serialize};

/// A supported or recognized chain. Only [`ChainId::Eth`] and
/// [`ChainId::Bsv`] are operational; the others are accepted at parse
/// boundaries and rejected with `NotImplemented` everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainId {
    Eth,
    Bsv,
    Btc,
    Bch,
}

impl ChainId {
    pub fn is_operational(&self) -> bool {
        matches!(self, ChainId::Eth | ChainId::Bsv)
    }

    pub fn is_utxo_model(&self) -> bool {
        matches!(self, ChainId::Bsv | ChainId::Btc | ChainId::Bch)
    }

    /// BIP-44 coin type for the derivation path `m/44'/coin'/0'/0/index`.
    pub fn bip44_coin_type(&self) -> u32 {
        match self {
            ChainId::Eth => 60,
            ChainId::Bsv => 236,
            ChainId::Btc => 0,
            ChainId::Bch => 145,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainId::Eth => "ETH",
            ChainId::Bsv => "BSV",
            ChainId::Btc => "BTC",
            ChainId::Bch => "BCH",
        }
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChainId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ETH" => Ok(ChainId::Eth),
            "BSV" => Ok(ChainId::Bsv),
            "BTC" => Ok(ChainId::Btc),
            "BCH" => Ok(ChainId::Bch),
            other => Err(format!("unknown chain id '{other}'")),
        }
    }
}
