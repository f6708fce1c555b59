//! Transaction Engine (spec §4.8/§4.9): two independent pipelines
//! sharing a status type and the fee/size estimation helpers that are
//! not chain-model-specific.
//!
//! Grounded on this codebase's `transaction_builder.rs`
//! (`TransactionBuilder`'s fee/size/dust/change helper shape) with its
//! post-quantum-sized constants (`ESTIMATED_INPUT_SIZE = 4700`) replaced
//! by realistic P2PKH sizes, since this crate signs with secp256k1
//! ECDSA rather than ML-DSA.

pub mod account;
pub mod utxo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Broadcast,
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxStatus::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// P2PKH legacy serialized-size estimate in bytes (spec §4.9 step 5).
/// Base tx overhead (version + input/output counts + locktime), plus
/// one scriptSig/scriptPubKey-sized slot per input/output.
const BASE_TX_SIZE: u64 = 10;
const INPUT_SIZE: u64 = 148;
const OUTPUT_SIZE: u64 = 34;

pub fn estimate_tx_size(n_inputs: usize, n_outputs: usize) -> u64 {
    BASE_TX_SIZE + INPUT_SIZE * n_inputs as u64 + OUTPUT_SIZE * n_outputs as u64
}

/// Fee in satoshis for `n_inputs`/`n_outputs` at `fee_rate_sat_per_kb`.
pub fn estimate_fee(n_inputs: usize, n_outputs: usize, fee_rate_sat_per_kb: u64) -> u64 {
    let size = estimate_tx_size(n_inputs, n_outputs);
    fee_for_bytes(size, fee_rate_sat_per_kb)
}

/// Fee in satoshis for an already-known serialized size, used to
/// reconcile `estimate_fee`'s preliminary figure against the real
/// signed transaction's byte length (DER ECDSA signatures vary 70-72
/// bytes, so the preliminary estimate can be off by a few sats/kb).
pub fn fee_for_bytes(size_bytes: u64, fee_rate_sat_per_kb: u64) -> u64 {
    (size_bytes * fee_rate_sat_per_kb).div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_scales_with_input_count() {
        let one_input = estimate_fee(1, 2, 1);
        let two_inputs = estimate_fee(2, 2, 1);
        assert!(two_inputs > one_input);
    }
}
