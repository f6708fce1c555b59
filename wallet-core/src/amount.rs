//! Strict decimal amount parsing/formatting (spec §4.8 step 3, §8
//! round-trip property). Converts between human decimal strings (e.g.
//! `"1.5"`) and base-unit integers (wei, sats, token base units) given
//! a `decimals` exponent.
//!
//! No grounding file in this codebase does strict (non-permissive)
//! decimal parsing; amounts there are integers already. Built fresh,
//! in the small-pure-function idiom this crate uses for `keys.rs`.

use crate::error::TransactionError;

/// Parses a decimal amount string into base units. Rejects anything
/// that is not `[0-9]+(\.[0-9]+)?` — no sign, no thousands separators,
/// no leading `+`, no scientific notation, no empty string.
pub fn parse_amount(amount: &str, decimals: u8) -> Result<u128, TransactionError> {
    if amount.is_empty() {
        return Err(invalid(amount, "amount is empty"));
    }
    if !amount
        .bytes()
        .all(|b| b.is_ascii_digit() || b == b'.')
    {
        return Err(invalid(amount, "amount contains non-digit characters"));
    }

    let mut parts = amount.splitn(2, '.');
    let int_part = parts.next().unwrap();
    let frac_part = parts.next();

    if int_part.is_empty() {
        return Err(invalid(amount, "missing integer part"));
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(amount, "integer part is not numeric"));
    }

    let frac_digits = match frac_part {
        Some(f) => {
            if f.is_empty() {
                return Err(invalid(amount, "missing fractional digits after '.'"));
            }
            if !f.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid(amount, "fractional part is not numeric"));
            }
            if f.len() > decimals as usize {
                return Err(invalid(
                    amount,
                    &format!("more than {decimals} fractional digits"),
                ));
            }
            f.to_string()
        }
        None => String::new(),
    };

    let padded_frac = format!("{frac_digits:0<width$}", width = decimals as usize);
    let combined = format!("{int_part}{padded_frac}");
    combined
        .parse::<u128>()
        .map_err(|e| invalid(amount, &e.to_string()))
}

/// Formats base units back into a minimal decimal string (no trailing
/// zeros, no trailing `.`).
pub fn format_amount(base_units: u128, decimals: u8) -> String {
    if decimals == 0 {
        return base_units.to_string();
    }
    let divisor = 10u128.pow(decimals as u32);
    let int_part = base_units / divisor;
    let frac_part = base_units % divisor;
    if frac_part == 0 {
        return int_part.to_string();
    }
    let frac_str = format!("{frac_part:0width$}", width = decimals as usize);
    let trimmed = frac_str.trim_end_matches('0');
    format!("{int_part}.{trimmed}")
}

fn invalid(amount: &str, reason: &str) -> TransactionError {
    TransactionError::InvalidAmount {
        amount: amount.to_string(),
        reason: reason.to_string(),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// format_amount/parse_amount round-trip (spec §8): any base-unit
        /// value, formatted and reparsed at the same `decimals`, comes
        /// back unchanged.
        #[test]
        fn format_then_parse_round_trips(base_units in any::<u64>(), decimals in 0u8..=18) {
            let base_units = base_units as u128;
            let formatted = format_amount(base_units, decimals);
            let reparsed = parse_amount(&formatted, decimals).unwrap();
            prop_assert_eq!(reparsed, base_units);
        }
    }
}
