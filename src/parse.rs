use ethers_core::types::{Address, H256, U256};
use std::str::FromStr;
use thiserror::Error;

pub const ETH_DECIMALS: usize = 18;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid eth amount: {0:?}")]
    InvalidAmount(String),

    #[error("invalid address: {0:?}, expected 0x + 40 hex characters")]
    InvalidAddress(String),

    #[error("invalid transaction hash: {0:?}, expected 0x + 64 hex characters")]
    InvalidTxHash(String),
}

pub fn wei_per_eth() -> U256 {
    U256::exp10(ETH_DECIMALS)
}

fn is_hex_of_len(s: &str, len: usize) -> bool {
    let s = s.trim();
    let digits = s.strip_prefix("0x").unwrap_or(s);
    digits.len() == len && hex::decode(digits).is_ok()
}

pub fn is_tx_hash(s: &str) -> bool {
    is_hex_of_len(s, 64)
}

pub fn is_eth_address(s: &str) -> bool {
    is_hex_of_len(s, 40)
}

pub fn parse_address(s: &str) -> Result<Address, ParseError> {
    if !is_eth_address(s) {
        return Err(ParseError::InvalidAddress(s.to_string()));
    }
    Address::from_str(s.trim()).map_err(|_| ParseError::InvalidAddress(s.to_string()))
}

pub fn parse_tx_hash(s: &str) -> Result<H256, ParseError> {
    if !is_tx_hash(s) {
        return Err(ParseError::InvalidTxHash(s.to_string()));
    }
    H256::from_str(s.trim()).map_err(|_| ParseError::InvalidTxHash(s.to_string()))
}

/// Parses a human ETH amount ("1.5", "0,5") into wei, rounding down.
/// Only strictly positive results are accepted.
pub fn parse_eth_to_wei(amount: &str) -> Result<U256, ParseError> {
    let invalid = || ParseError::InvalidAmount(amount.to_string());

    let normalized = amount.trim().replace(',', ".");
    let (int_part, frac_part) = normalized
        .split_once('.')
        .unwrap_or((normalized.as_str(), ""));

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(invalid());
    }

    let int_wei = if int_part.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(int_part)
            .map_err(|_| invalid())?
            .checked_mul(wei_per_eth())
            .ok_or_else(invalid)?
    };

    // digits past the 18th are below one wei and are dropped
    let frac = &frac_part[..frac_part.len().min(ETH_DECIMALS)];
    let frac_wei = if frac.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(frac).map_err(|_| invalid())? * U256::exp10(ETH_DECIMALS - frac.len())
    };

    let total = int_wei.checked_add(frac_wei).ok_or_else(invalid)?;
    if total.is_zero() {
        return Err(invalid());
    }
    Ok(total)
}
