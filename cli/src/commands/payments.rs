//! List cached payments

use anyhow::Result;
use colored::Colorize;

use crate::commands::print_payment;
use crate::config::CliContext;
use crate::units::format_amount;

pub async fn run(ctx: &CliContext, all: bool) -> Result<()> {
    let (session, account) = ctx.unlock().await?;
    let ledger = ctx.load_ledger()?;
    let cache = ctx.scanner(&ledger).payments(&account, session.keys()?)?;

    println!();
    println!("{}", "Stealth Payments".yellow().bold());
    println!();

    let shown: Vec<_> = cache
        .records()
        .iter()
        .filter(|r| all || r.is_claimable())
        .collect();
    if shown.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for record in shown {
        print_payment(record);
    }

    println!();
    println!(
        "Received: {}   Sent: {}",
        cache.incoming().count(),
        cache.outgoing().count()
    );
    println!(
        "Unclaimed balance: {}",
        format_amount(cache.unclaimed_balance()).green().bold()
    );
    if !all {
        println!("{}", "Pass --all to include claimed and sent payments.".dimmed());
    }

    Ok(())
}
