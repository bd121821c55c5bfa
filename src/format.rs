use chrono::{DateTime, SecondsFormat, Utc};
use ethers_core::types::{Address, H256, U256};
use ethers_core::utils::to_checksum;
use std::fmt::Write;

use crate::models::{HistoryItem, TxStatus};
use crate::parse::ETH_DECIMALS;

const DISPLAY_DECIMALS: usize = 6;
pub const CONTRACT_CREATION: &str = "contract-creation";

/// Renders wei as ETH with six decimals, rounding half up.
pub fn wei_to_eth_string(wei: U256) -> String {
    let unit = U256::exp10(ETH_DECIMALS - DISPLAY_DECIMALS);
    let (mut scaled, rem) = wei.div_mod(unit);
    if rem * U256::from(2) >= unit {
        scaled = scaled + U256::one();
    }
    let (whole, frac) = scaled.div_mod(U256::exp10(DISPLAY_DECIMALS));
    format!("{}.{:0width$}", whole, frac.as_u64(), width = DISPLAY_DECIMALS)
}

pub fn format_address(address: Address) -> String {
    to_checksum(&address, None)
}

pub fn format_unix_time(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

pub fn format_tx_notification(
    hash: H256,
    from: Address,
    to: Option<Address>,
    value_wei: U256,
    block_number: u64,
    block_time: u64,
) -> String {
    let to = to
        .map(format_address)
        .unwrap_or_else(|| CONTRACT_CREATION.to_string());

    format!(
        "🔔 New tx\n\nHash: 0x{:x}\nFrom: {}\nTo: {}\nValue: {} ETH\nBlock: #{}\nTime: {}",
        hash,
        format_address(from),
        to,
        wei_to_eth_string(value_wei),
        block_number,
        format_unix_time(block_time),
    )
}

pub fn shorten_hash(hash: &str) -> String {
    let chars: Vec<char> = hash.chars().collect();
    if chars.len() <= 14 {
        return hash.to_string();
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

fn status_glyph(status: Option<TxStatus>) -> &'static str {
    match status {
        Some(TxStatus::Success) => " ✅",
        Some(TxStatus::Failed) => " ❌",
        None => "",
    }
}

pub fn format_history(items: &[HistoryItem]) -> String {
    let mut out = format!("🕘 History (last {})\n\n", items.len());

    for item in items {
        let value = U256::from_dec_str(&item.value_wei).unwrap_or_default();
        let block = item
            .block_number
            .map(|n| format!(" #{n}"))
            .unwrap_or_default();

        let _ = writeln!(
            out,
            "• {} ({}){}\n  {} ETH{}",
            shorten_hash(&item.hash),
            item.event_type,
            block,
            wei_to_eth_string(value),
            status_glyph(item.status),
        );
    }

    out
}
