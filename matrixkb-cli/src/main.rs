mod device;
mod halfkay;
mod ihex;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use matrixkb_core::{PRODUCT_ID, VENDOR_ID};
use std::fs;
use std::time::Duration;

/// How long to wait for HalfKay after asking the keyboard to reboot.
const REBOOT_TIMEOUT: Duration = Duration::from_secs(5);
/// How long to wait for the reset button when no keyboard is attached.
const BUTTON_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "matrixkb-cli")]
#[command(about = "matrixkb keyboard flasher and debug console")]
struct Cli {
    /// USB vendor ID of the keyboard (decimal or 0x-prefixed hex)
    #[arg(short = 'V', long, global = true, default_value_t = VENDOR_ID, value_parser = parse_id)]
    vendor: u16,

    /// USB product ID of the keyboard (decimal or 0x-prefixed hex)
    #[arg(short = 'P', long, global = true, default_value_t = PRODUCT_ID, value_parser = parse_id)]
    product: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Flash a .hex firmware file via the HalfKay bootloader
    Flash {
        /// Path to the Intel HEX firmware file
        firmware: String,
    },
    /// Reset the keyboard through its debug interface
    Reset {
        /// Reboot into the HalfKay bootloader instead of restarting
        #[arg(short = 'H', long)]
        halfkay: bool,
    },
    /// Show the keyboard's debug log
    Log {
        /// Print the raw packets received
        #[arg(long)]
        raw: bool,
    },
    /// Show the keyboard's USB descriptors
    Descriptors,
    /// Detect the keyboard and the HalfKay bootloader
    Detect,
}

fn parse_id(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid USB ID '{}': {}", s, e))
}

fn flash(vendor: u16, product: u16, firmware: &str) -> Result<()> {
    let contents =
        fs::read_to_string(firmware).with_context(|| format!("reading {}", firmware))?;

    let file = ihex::parse_hex(&contents).context("parsing Intel HEX file")?;
    let (base_address, data) =
        ihex::flatten_segments(&file.segments).context("flattening HEX segments")?;

    println!(
        "Firmware: {} bytes at base address 0x{:04X}",
        data.len(),
        base_address
    );

    if !halfkay::detect()? {
        let timeout = if device::find_device(vendor, product)?.is_some() {
            println!("Rebooting keyboard into bootloader...");
            device::reboot(vendor, product, true)?;
            REBOOT_TIMEOUT
        } else {
            println!("Keyboard not found. Press the reset button on the Teensy.");
            BUTTON_TIMEOUT
        };
        if !halfkay::wait_for_bootloader(timeout)? {
            bail!("Teensy bootloader not detected. Press the reset button and try again.");
        }
    }

    halfkay::flash(base_address, &data)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Flash { firmware } => flash(cli.vendor, cli.product, &firmware)?,
        Command::Reset { halfkay } => device::reboot(cli.vendor, cli.product, halfkay)?,
        Command::Log { raw } => device::stream_log(cli.vendor, cli.product, raw)?,
        Command::Descriptors => device::show_descriptors(cli.vendor, cli.product)?,
        Command::Detect => {
            if device::find_device(cli.vendor, cli.product)?.is_some() {
                println!(
                    "Keyboard detected ({:04x}:{:04x}).",
                    cli.vendor, cli.product
                );
            } else {
                println!("Keyboard not detected.");
            }
            if halfkay::detect()? {
                println!("Teensy bootloader detected (HalfKay mode).");
            } else {
                println!("Teensy bootloader not detected.");
            }
        }
    }

    Ok(())
}
