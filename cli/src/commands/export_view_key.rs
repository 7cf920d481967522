//! Export view key for watch-only scanning

use anyhow::Result;
use colored::Colorize;

use stealthpay_engine::ExportedViewKey;

use crate::config::CliContext;

pub async fn run(ctx: &CliContext) -> Result<()> {
    let (session, _) = ctx.unlock().await?;
    let view_key = ExportedViewKey::from_keys(session.keys()?);

    println!();
    println!("{}", "View Key Export".yellow().bold());
    println!();
    println!(
        "{}",
        "This key can DETECT payments to you but cannot SPEND them.".cyan()
    );
    println!(
        "{}",
        "Share it with an auditor or a watch-only service.".dimmed()
    );
    println!();
    println!("{}", view_key.export().as_str());
    println!();
    println!(
        "{}",
        "WARNING: Anyone with this key can see all your incoming payments.".red()
    );

    Ok(())
}
