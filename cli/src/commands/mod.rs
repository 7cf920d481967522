//! CLI subcommands

pub mod address;
pub mod change_password;
pub mod claim;
pub mod delete;
pub mod export_view_key;
pub mod info;
pub mod init;
pub mod payments;
pub mod scan;
pub mod send;

use colored::Colorize;
use stealthpay_engine::{PaymentDirection, StealthPaymentRecord};

use crate::units::format_amount;

/// One-line summary of a cached payment
pub(crate) fn print_payment(record: &StealthPaymentRecord) {
    let status = match (record.direction, record.claimed) {
        (PaymentDirection::Outgoing, _) => "sent".dimmed(),
        (PaymentDirection::Incoming, true) => "claimed".dimmed(),
        (PaymentDirection::Incoming, false) => "unclaimed".green(),
    };
    println!("  {} [{}]", record.id.cyan(), status);
    println!("    Stealth addr: {}", record.stealth_address);
    println!("    Amount:       {}", format_amount(record.amount));
    println!("    From:         {}", record.sender);
    println!("    Block:        {}", record.block_number);
}
