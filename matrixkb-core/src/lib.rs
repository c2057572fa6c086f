//! Hardware-independent core of the matrixkb keyboard firmware.
//!
//! This crate is `no_std` so it can be used by both the AVR firmware and
//! the native CLI tool. Everything that touches registers is reached
//! through small traits ([`usb::UsbBus`], [`matrix::KeyMatrix`]) so the
//! USB state machine and the ghost-resolution engine can be exercised on
//! the host.

#![cfg_attr(not(test), no_std)]

pub mod bitmap;
pub mod keyboard;
pub mod keycode;
pub mod matrix;
pub mod report;
pub mod usb;

#[cfg(test)]
mod testing;

pub use bitmap::{Bitmap, LineMap};
pub use keyboard::{DiodeKeyboard, KeyTable, Keyboard, KeyboardError};
pub use keycode::Keycode;
pub use matrix::KeyMatrix;
pub use report::KeyReport;

/// USB vendor ID shared by the firmware descriptors and the CLI.
pub const VENDOR_ID: u16 = 0x16C0;
/// USB product ID shared by the firmware descriptors and the CLI.
pub const PRODUCT_ID: u16 = 0x03F1;

/// Vendor/product IDs of the PJRC HalfKay bootloader.
pub const HALFKAY_VENDOR_ID: u16 = 0x16C0;
pub const HALFKAY_PRODUCT_ID: u16 = 0x0478;

/// Feature report values understood by the debug interface.
pub const DEBUG_CMD_BOOTLOADER: u8 = 1;
pub const DEBUG_CMD_RESET: u8 = 2;
