//! Display formatting for costs, prices and identifiers.
//!
//! Everything here is pure: no clock, no I/O, identical output for identical input.

use ethers::types::U256;

/// Fractional digits shown for native-currency amounts
pub const COST_DECIMALS: u32 = 6;

/// Fractional digits shown for gas prices in gwei
pub const PRICE_DECIMALS: u32 = 2;

const ETHER_DECIMALS: u32 = 18;
const GWEI_DECIMALS: u32 = 9;

/// Formats `gas * price` (wei) as ether with six fractional digits.
///
/// Rounds half up at the last shown digit, so `21000 gas * 20 gwei` is `"0.000420"`.
pub fn format_cost(gas: U256, price: U256) -> String {
    format_wei(gas.saturating_mul(price))
}

/// Formats a wei amount as ether with six fractional digits.
pub fn format_wei(amount: U256) -> String {
    format_fixed(amount, ETHER_DECIMALS, COST_DECIMALS)
}

/// Formats a per-gas price (wei) in gwei with two fractional digits.
pub fn format_price(price: U256) -> String {
    format_fixed(price, GWEI_DECIMALS, PRICE_DECIMALS)
}

/// Fixed-point rendering of an integer amount with `unit_decimals` implied decimals,
/// rounded half up to `places` fractional digits.
pub fn format_fixed(amount: U256, unit_decimals: u32, places: u32) -> String {
    debug_assert!(places <= unit_decimals);
    let drop = U256::exp10((unit_decimals - places) as usize);
    let half = drop / 2;
    let scaled = amount.saturating_add(half) / drop;

    if places == 0 {
        return scaled.to_string();
    }

    let scale = U256::exp10(places as usize);
    let whole = scaled / scale;
    let fraction = scaled % scale;
    format!(
        "{}.{:0>width$}",
        whole,
        fraction.to_string(),
        width = places as usize
    )
}

/// Shortens a hash or address for log lines: first 10 characters followed by "..".
pub fn truncate_id(id: &str) -> String {
    if id.len() <= 10 {
        id.to_string()
    } else {
        format!("{}..", &id[..10])
    }
}
