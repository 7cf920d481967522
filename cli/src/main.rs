//! StealthPay CLI - Command line interface for stealth payment key management

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use stealthpay_engine::AuthMethod;

mod commands;
mod config;
mod password;
mod units;

use commands::*;
use config::{CliContext, GlobalArgs};

#[derive(Parser)]
#[command(name = "stealthpay")]
#[command(author = "StealthPay Team")]
#[command(version = "0.1.0")]
#[command(about = "Stealth payments on secp256k1 - private receiving with one-time addresses")]
#[command(long_about = r#"
StealthPay derives viewing and spending keys from your password and a
wallet signature, keeps them encrypted at rest, and scans announced
payments for the ones sent to you.

Each payment lands on a unique one-time address. Share your meta-address
publicly, receive payments privately.

Quick Start:
  1. stealthpay init             Derive and store your stealth keys
  2. stealthpay address          Show the meta-address to share
  3. stealthpay scan             Check for incoming payments
  4. stealthpay claim <id>       Derive the key for a received payment

Logging is controlled with STEALTHPAY_LOG (e.g. STEALTHPAY_LOG=debug).
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file (default: <data-dir>/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for keys and scan state (default: ~/.stealthpay)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Ledger snapshot file (default: <data-dir>/ledger.json)
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    /// Hex signing key standing in for the wallet (default: <data-dir>/signer.key)
    #[arg(long, global = true)]
    signer_key: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum AuthArg {
    Wallet,
    Passkey,
}

impl From<AuthArg> for AuthMethod {
    fn from(arg: AuthArg) -> Self {
        match arg {
            AuthArg::Wallet => AuthMethod::Wallet,
            AuthArg::Passkey => AuthMethod::Passkey,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Derive stealth keys from password + signature and store them encrypted
    Init {
        /// User identifier bound into the signed derivation message
        #[arg(short, long)]
        id: String,

        /// How the signing authority authenticates
        #[arg(short, long, value_enum, default_value = "wallet")]
        auth: AuthArg,
    },

    /// Show your stealth meta-address
    Address,

    /// Send to a stealth meta-address (or a registered account)
    Send {
        /// Recipient meta-address (st:eth:0x...) or registered 0x account
        #[arg(short, long)]
        to: String,

        /// Amount in ETH (e.g. 0.25)
        #[arg(short, long)]
        amount: String,
    },

    /// Scan for incoming stealth payments
    Scan {
        /// Re-scan from this block instead of the stored mark
        #[arg(long)]
        from_block: Option<u64>,
    },

    /// List cached payments
    Payments {
        /// Include claimed and outgoing payments
        #[arg(short, long)]
        all: bool,
    },

    /// Derive the spending key for a received payment and mark it claimed
    Claim {
        /// Payment id (<tx>:<log>) or stealth address
        payment: String,

        /// Print the derived private key
        #[arg(long)]
        show_key: bool,
    },

    /// Re-encrypt stored keys under a new password
    ChangePassword,

    /// Export view key (scan-only, no spending capability)
    ExportViewKey,

    /// Show configuration and key info
    Info,

    /// Delete stored keys and scan state
    Delete {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env("STEALTHPAY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let ctx = CliContext::load(&GlobalArgs {
        config: cli.config,
        data_dir: cli.data_dir,
        ledger: cli.ledger,
        signer_key: cli.signer_key,
    })?;

    match cli.command {
        Commands::Init { id, auth } => {
            init::run(&ctx, &id, auth.into()).await?;
        }
        Commands::Address => {
            address::run(&ctx).await?;
        }
        Commands::Send { to, amount } => {
            send::run(&ctx, &to, &amount).await?;
        }
        Commands::Scan { from_block } => {
            scan::run(&ctx, from_block).await?;
        }
        Commands::Payments { all } => {
            payments::run(&ctx, all).await?;
        }
        Commands::Claim { payment, show_key } => {
            claim::run(&ctx, &payment, show_key).await?;
        }
        Commands::ChangePassword => {
            change_password::run(&ctx).await?;
        }
        Commands::ExportViewKey => {
            export_view_key::run(&ctx).await?;
        }
        Commands::Info => {
            info::run(&ctx)?;
        }
        Commands::Delete { yes } => {
            delete::run(&ctx, yes).await?;
        }
    }

    Ok(())
}
