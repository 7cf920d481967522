//! Derive the spending key for a received payment

use anyhow::{Context, Result};
use colored::Colorize;
use zeroize::Zeroizing;

use stealthpay_engine::claim_key;

use crate::config::CliContext;
use crate::units::format_amount;

pub async fn run(ctx: &CliContext, payment: &str, show_key: bool) -> Result<()> {
    let (session, account) = ctx.unlock().await?;
    let keys = session.keys()?;
    let ledger = ctx.load_ledger()?;
    let scanner = ctx.scanner(&ledger);

    let cache = scanner.payments(&account, keys)?;
    let record = cache.find(payment).with_context(|| {
        format!("No cached payment matches '{}'. Run 'stealthpay scan' first.", payment)
    })?;

    let key = claim_key(keys, record).context("Cannot claim this payment")?;

    // Withdrawal lands on the ledger before the local cache is updated
    ledger.set_claimed(&key.stealth_address)?;
    ctx.save_ledger(&ledger)?;
    let claimed = scanner.record_claim(&account, keys, &record.id)?;

    println!();
    println!("{}", "Payment claimed!".green().bold());
    println!();
    println!("Payment:      {}", claimed.id);
    println!("Stealth addr: {}", key.stealth_address);
    println!("Amount:       {}", format_amount(claimed.amount));

    if show_key {
        let encoded = Zeroizing::new(hex::encode(key.private_key()));
        println!();
        println!(
            "{}",
            "WARNING: Anyone with this key controls the funds at the stealth address.".red().bold()
        );
        println!("Private key:  0x{}", encoded.as_str());
    } else {
        println!();
        println!("{}", "Pass --show-key to print the stealth private key.".dimmed());
    }

    Ok(())
}
