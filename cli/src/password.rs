//! Terminal password prompts

use anyhow::{bail, Context, Result};
use zeroize::Zeroizing;

use stealthpay_engine::kdf::validate_password_strength;

pub fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password))
}

/// Prompt twice and enforce the strength rules
pub fn prompt_new_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = prompt_password(prompt)?;
    let confirm = prompt_password("Confirm password: ")?;
    check_new_password(&password, &confirm)?;
    Ok(password)
}

fn check_new_password(password: &str, confirm: &str) -> Result<()> {
    if password != confirm {
        bail!("Passwords do not match");
    }
    validate_password_strength(password)?;
    Ok(())
}
