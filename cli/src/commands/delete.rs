//! Remove stored keys and scan state

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::io::{self, Write};

use stealthpay_engine::KeySession;

use crate::config::CliContext;
use crate::password::prompt_password;

fn confirm(account: &str) -> Result<bool> {
    print!("Type DELETE to remove all keys for {}: ", account);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(answer.trim() == "DELETE")
}

pub async fn run(ctx: &CliContext, yes: bool) -> Result<()> {
    let account = ctx.account()?;
    let keystore = ctx.keystore();
    if !keystore.exists(&account)? {
        bail!("No keys found for {}", account);
    }

    println!(
        "{}",
        "This permanently removes your encrypted keys and payment cache.".red().bold()
    );
    if !yes && !confirm(&account.to_string())? {
        println!("Aborted.");
        return Ok(());
    }

    let password = prompt_password("Enter password to confirm: ")?;
    let mut session = KeySession::from_config(&ctx.config);
    session
        .delete_account(&keystore, &account, &password)
        .await
        .context("Failed to delete keys")?;

    println!();
    println!("{}", "Keys deleted.".green());
    println!(
        "{}",
        format!("The signing key at {} was kept.", ctx.signer_path.display()).dimmed()
    );

    Ok(())
}
