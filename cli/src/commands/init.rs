//! First-time key setup

use anyhow::{bail, Context, Result};
use colored::Colorize;

use stealthpay_engine::{AuthMethod, KeySession, SigningAuthority};

use crate::config::CliContext;
use crate::password::prompt_new_password;

pub async fn run(ctx: &CliContext, identifier: &str, auth_method: AuthMethod) -> Result<()> {
    let (signer, created) = ctx.load_or_create_signer()?;
    let account = signer.address();
    if created {
        println!("{}", "Generated a new local signing key".yellow());
        println!("  Saved to: {}", ctx.signer_path.display());
    }

    let keystore = ctx.keystore();
    if keystore.exists(&account)? {
        bail!(
            "Keys already exist for {}. Use 'stealthpay delete' first to start over.",
            account
        );
    }

    println!();
    println!("{}", "Choose a password to protect your stealth keys.".cyan());
    println!(
        "{}",
        "Minimum 8 characters with uppercase, lowercase, and a digit.".dimmed()
    );
    let password = prompt_new_password("Enter password: ")?;

    println!("Deriving keys (this takes a few seconds)...");
    let mut session = KeySession::from_config(&ctx.config);
    session
        .initialize(&keystore, &signer, &password, identifier, auth_method)
        .await
        .context("Failed to initialize keys")?;
    let meta = session.meta_address()?;

    // Publish the meta-address so senders can resolve it by account
    let ledger = ctx.load_ledger()?;
    ledger.register(account, meta)?;
    ctx.save_ledger(&ledger)?;
    session.lock();

    println!();
    println!("{}", "Stealth keys created!".green().bold());
    println!();
    println!("Account:      {}", account);
    println!("Meta-address: {}", meta);
    println!();
    println!(
        "{}",
        "You need BOTH the password and this signing key to recover your keys.".yellow()
    );

    Ok(())
}
