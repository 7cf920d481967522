//! Send to a stealth address

use anyhow::{bail, Context, Result};
use colored::Colorize;

use stealthpay_engine::calldata::encode_send_stealth_payment;
use stealthpay_engine::{Address, Ledger, StealthMetaAddress};

use crate::config::CliContext;
use crate::units::{format_amount, parse_amount};

/// Resolve a meta-address string or a registered account
async fn resolve_recipient<L: Ledger>(ledger: &L, recipient: &str) -> Result<StealthMetaAddress> {
    if let Ok(account) = recipient.parse::<Address>() {
        return match ledger.meta_address(&account).await? {
            Some(meta) => Ok(meta),
            None => bail!("{} has no registered meta-address", account),
        };
    }
    recipient
        .parse::<StealthMetaAddress>()
        .context("Invalid meta-address format")
}

pub async fn run(ctx: &CliContext, recipient: &str, amount: &str) -> Result<()> {
    println!("{}", "Preparing stealth payment...".cyan());

    let amount = parse_amount(amount)?;
    let ledger = ctx.load_ledger()?;
    let meta = resolve_recipient(&ledger, recipient).await?;

    let payment = meta
        .generate_payment()
        .context("Failed to compute stealth address")?;

    let sender = if ctx.has_signer() {
        ctx.account()?
    } else {
        Address::ZERO
    };

    println!("Stealth address: {}", payment.stealth_address);
    println!("Ephemeral key:   0x{}", hex::encode(payment.ephemeral_public_key));

    let tx = ledger.announce(sender, &payment, amount)?;
    ctx.save_ledger(&ledger)?;

    let calldata = encode_send_stealth_payment(
        &payment.stealth_address,
        amount,
        &payment.ephemeral_public_key,
    );

    println!();
    println!("{}", "Payment sent successfully!".green().bold());
    println!();
    println!("Transaction:  {}", tx);
    println!("Amount:       {}", format_amount(amount));
    println!("Stealth addr: {}", payment.stealth_address);
    println!("Call data:    0x{}", hex::encode(&calldata));
    println!();
    println!(
        "{}",
        "The recipient can scan for this payment using their viewing key.".dimmed()
    );

    Ok(())
}
