//! ETH / wei conversions for user-facing amounts

use anyhow::{bail, Context, Result};

const WEI_DECIMALS: usize = 18;
const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000;

/// Parse a decimal ETH amount ("1", "0.25", ".5") into wei
pub fn parse_amount(input: &str) -> Result<u128> {
    let input = input.trim();
    let (whole, fraction) = match input.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (input, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        bail!("Invalid amount: '{}'", input);
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        bail!("Invalid amount: '{}'", input);
    }
    if fraction.len() > WEI_DECIMALS {
        bail!("Amount has more than {} decimal places", WEI_DECIMALS);
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().context("Amount too large")?
    };
    let padded = format!("{:0<width$}", fraction, width = WEI_DECIMALS);
    let fraction: u128 = padded.parse().context("Invalid amount")?;

    let wei = whole
        .checked_mul(WEI_PER_ETH)
        .and_then(|w| w.checked_add(fraction))
        .context("Amount too large")?;
    if wei == 0 {
        bail!("Amount must be greater than zero");
    }
    Ok(wei)
}

/// Format wei as ETH without trailing zeros
pub fn format_amount(wei: u128) -> String {
    let whole = wei / WEI_PER_ETH;
    let fraction = wei % WEI_PER_ETH;
    if fraction == 0 {
        return format!("{} ETH", whole);
    }
    let digits = format!("{:0>width$}", fraction, width = WEI_DECIMALS);
    format!("{}.{} ETH", whole, digits.trim_end_matches('0'))
}
