//! Busy-wait delays calibrated for a 16MHz clock.

use embedded_hal::delay::DelayNs;

/// Roughly four cycles (250ns) per iteration.
#[inline(always)]
fn spin(iterations: u32) {
    for _ in 0..iterations {
        unsafe { core::arch::asm!("nop") };
    }
}

pub struct AvrDelay;

impl DelayNs for AvrDelay {
    fn delay_ns(&mut self, ns: u32) {
        spin((ns / 250).max(1));
    }

    fn delay_us(&mut self, us: u32) {
        spin(us.saturating_mul(4));
    }
}

/// Busy-wait delay in milliseconds (approximate, at 16MHz).
pub fn delay_ms(ms: u16) {
    AvrDelay.delay_ms(ms as u32);
}
