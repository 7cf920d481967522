//! Display stealth meta-address

use anyhow::Result;
use colored::Colorize;

use stealthpay_engine::Ledger;

use crate::config::CliContext;

pub async fn run(ctx: &CliContext) -> Result<()> {
    let account = ctx.account()?;

    // Registered meta-addresses are public; fall back to unlocking
    let ledger = ctx.load_ledger()?;
    let meta = match ledger.meta_address(&account).await? {
        Some(meta) => meta,
        None => {
            let (session, _) = ctx.unlock().await?;
            session.meta_address()?
        }
    };

    println!();
    println!("{}", "Your Stealth Meta-Address".yellow().bold());
    println!();
    println!("{}", meta);
    println!();
    println!("{}:", "Components".dimmed());
    println!("  Spending pubkey: 0x{}", hex::encode(meta.spending_public));
    println!("  Viewing pubkey:  0x{}", hex::encode(meta.viewing_public));
    println!();
    println!(
        "{}",
        "Share the meta-address above to receive private payments.".dimmed()
    );

    Ok(())
}
