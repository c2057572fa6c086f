//! The on-board LED (PD6). It blinks while the host has not configured
//! the device, then mirrors the host's Caps Lock state.

use matrixkb_core::keycode::led;
use matrixkb_core::usb::LedCallback;
use portable_atomic::{AtomicU8, Ordering};

use crate::gpio::{Pin, D6};

const STATUS_LED: Pin = D6;

/// Last LED report from the host. Written from the USB interrupt, applied
/// to the pin from the main loop (PORTD is shared with the matrix).
static HOST_LEDS: AtomicU8 = AtomicU8::new(0);

pub struct HostLeds;

impl LedCallback for HostLeds {
    fn update_leds(&mut self, leds: u8) {
        HOST_LEDS.store(leds, Ordering::Relaxed);
    }
}

pub fn init() {
    STATUS_LED.drive_low();
}

pub fn toggle() {
    STATUS_LED.toggle();
}

pub fn apply() {
    if HOST_LEDS.load(Ordering::Relaxed) & led::CAPS_LOCK != 0 {
        STATUS_LED.drive_high();
    } else {
        STATUS_LED.drive_low();
    }
}
