//! Show configuration and key info

use anyhow::Result;
use colored::Colorize;

use stealthpay_engine::{SigningAuthority, UnlockPolicy};

use crate::config::CliContext;

pub fn run(ctx: &CliContext) -> Result<()> {
    println!();
    println!("{}", "StealthPay Configuration".yellow().bold());
    println!();

    println!("{}:", "Data Directory".cyan());
    println!("  {}", ctx.data_dir.display());
    println!();

    println!("{}:", "Signing Key".cyan());
    match ctx.load_signer() {
        Ok(signer) => {
            let account = signer.address();
            println!("  Account: {}", account);
            println!();

            match ctx.keystore().load(&account) {
                Ok(record) => {
                    println!("{}", "Stealth Keys: CONFIGURED".green());
                    println!("  User id:  {}", record.user_id);
                    println!("  Auth:     {:?}", record.auth_method);
                    println!("  Created:  {}", record.created_at);
                    println!("  Updated:  {}", record.updated_at);
                    println!(
                        "  Argon2id: {} KiB, {} pass(es), {} lane(s) (stored)",
                        record.kdf.memory_kib, record.kdf.iterations, record.kdf.parallelism
                    );
                }
                Err(_) => {
                    println!("{}", "Stealth Keys: NOT CONFIGURED".red());
                    println!("  Run 'stealthpay init --id <name>' to create keys");
                }
            }
        }
        Err(_) => {
            println!("  {}", "NOT CONFIGURED".red());
            println!("  Run 'stealthpay init' or pass --signer-key");
        }
    }
    println!();

    println!("{}:", "Security".cyan());
    let policy = match ctx.config.unlock_policy {
        UnlockPolicy::PasswordOnly => "password only",
        UnlockPolicy::RequireSigner => "password + signature",
    };
    println!("  Unlock:   {}", policy);
    println!(
        "  Argon2id: {} KiB, {} pass(es), {} lane(s)",
        ctx.config.kdf.memory_kib, ctx.config.kdf.iterations, ctx.config.kdf.parallelism
    );
    println!();

    println!("{}:", "Scanner".cyan());
    println!("  Window:      {} blocks", ctx.config.scan.window_size);
    println!(
        "  Retries:     {} (every {} ms)",
        ctx.config.scan.max_retries, ctx.config.scan.retry_delay_ms
    );
    println!("  Start block: {}", ctx.config.scan.start_block);
    println!();

    println!("{}:", "File Locations".cyan());
    println!("  Config: {}", ctx.config_path.display());
    println!("  Ledger: {}", ctx.ledger_path.display());
    println!("  Signer: {}", ctx.signer_path.display());

    Ok(())
}
