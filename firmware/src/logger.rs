//! `log` output routed to the debug HID interface.

use log::LevelFilter;
use matrixkb_core::usb::{DebugLogger, LogBuffer};

pub const LOG_SIZE: usize = 256;

const LEVEL: LevelFilter = LevelFilter::Debug;

static BUFFER: LogBuffer<LOG_SIZE> = LogBuffer::new();
static LOGGER: DebugLogger<LOG_SIZE> = DebugLogger::new(&BUFFER, LEVEL);

/// Install the logger. Must run before interrupts are enabled.
pub fn init() {
    // No atomic compare-and-swap on AVR: the racy setters are the only
    // option, and nothing else runs yet.
    unsafe {
        log::set_logger_racy(&LOGGER).ok();
        log::set_max_level_racy(LEVEL);
    }
}

pub fn buffer() -> &'static LogBuffer<LOG_SIZE> {
    &BUFFER
}
