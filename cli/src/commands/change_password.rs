//! Re-encrypt stored keys under a new password

use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::CliContext;
use crate::password::{prompt_new_password, prompt_password};

pub async fn run(ctx: &CliContext) -> Result<()> {
    let old_password = prompt_password("Enter current password: ")?;
    let (mut session, account) = ctx.unlock_with_password(&old_password).await?;

    let new_password = prompt_new_password("Enter new password: ")?;

    session
        .change_password(&ctx.keystore(), &old_password, &new_password)
        .await
        .context("Failed to change password")?;
    session.lock();

    println!();
    println!("{}", "Password changed.".green().bold());
    println!("Account: {}", account);
    println!();
    println!(
        "{}",
        "Recovering keys from scratch still requires the ORIGINAL setup password.".yellow()
    );

    Ok(())
}
