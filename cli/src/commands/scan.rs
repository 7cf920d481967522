//! Scan for incoming stealth payments

use anyhow::{Context, Result};
use colored::Colorize;

use stealthpay_engine::ScanOptions;

use crate::commands::print_payment;
use crate::config::CliContext;
use crate::units::format_amount;

pub async fn run(ctx: &CliContext, from_block: Option<u64>) -> Result<()> {
    println!("{}", "Scanning for incoming stealth payments...".cyan());

    let (session, account) = ctx.unlock().await?;
    let keys = session.keys()?;
    let ledger = ctx.load_ledger()?;
    let scanner = ctx.scanner(&ledger);

    let report = scanner
        .scan(&account, keys, ScanOptions { from_block })
        .await
        .context("Scan failed; progress up to the last completed window was saved")?;
    let updated = scanner.refresh_claims(&account, keys).await?;

    if report.windows == 0 {
        println!("Already up to date (block {}).", report.to_block);
    } else {
        println!(
            "Scanned blocks {}..={} in {} window(s), {} event(s)",
            report.from_block, report.to_block, report.windows, report.events_seen
        );
    }
    if report.skipped > 0 {
        println!(
            "{}",
            format!("Skipped {} event(s) with unreadable call data", report.skipped).yellow()
        );
    }
    if updated > 0 {
        println!("{} payment(s) were claimed since the last scan", updated);
    }

    let cache = scanner.payments(&account, keys)?;
    let unclaimed: Vec<_> = cache.incoming().filter(|r| r.is_claimable()).collect();

    println!();
    if report.new_incoming == 0 && unclaimed.is_empty() {
        println!("{}", "No incoming payments found.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} new incoming payment(s)", report.new_incoming)
            .green()
            .bold()
    );
    println!();
    for record in &unclaimed {
        print_payment(record);
    }
    println!();
    println!(
        "Unclaimed balance: {}",
        format_amount(cache.unclaimed_balance()).green().bold()
    );
    println!();
    println!(
        "{}",
        "Use 'stealthpay claim <id>' to derive the key for a payment.".dimmed()
    );

    Ok(())
}
