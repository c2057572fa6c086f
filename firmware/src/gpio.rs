//! Single-pin access to the Teensy 2.0 GPIO ports.
//!
//! Pins are plain `(port, mask)` pairs so they can live in const tables.
//! Every operation is a read-modify-write on the port registers, so pins
//! must only be touched from the main loop.

use avr_device::atmega32u4::Peripherals;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Port {
    B,
    D,
    F,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Pin {
    port: Port,
    mask: u8,
}

/// Run `$body` with `$ddr`, `$out` and `$pin` bound to the registers of
/// `$port`.
macro_rules! with_port {
    ($port:expr, |$ddr:ident, $out:ident, $pin:ident| $body:expr) => {{
        // The port registers are only used from the main loop.
        let dp = unsafe { Peripherals::steal() };
        match $port {
            Port::B => {
                let ($ddr, $out, $pin) = (&dp.PORTB.ddrb, &dp.PORTB.portb, &dp.PORTB.pinb);
                $body
            }
            Port::D => {
                let ($ddr, $out, $pin) = (&dp.PORTD.ddrd, &dp.PORTD.portd, &dp.PORTD.pind);
                $body
            }
            Port::F => {
                let ($ddr, $out, $pin) = (&dp.PORTF.ddrf, &dp.PORTF.portf, &dp.PORTF.pinf);
                $body
            }
        }
    }};
}

impl Pin {
    pub const fn new(port: Port, bit: u8) -> Self {
        Self {
            port,
            mask: 1 << bit,
        }
    }

    /// Input with the internal pull-up enabled.
    pub fn release(self) {
        let m = self.mask;
        with_port!(self.port, |ddr, out, _pin| {
            ddr.modify(|r, w| unsafe { w.bits(r.bits() & !m) });
            out.modify(|r, w| unsafe { w.bits(r.bits() | m) });
        })
    }

    /// Output, driven low.
    pub fn drive_low(self) {
        let m = self.mask;
        with_port!(self.port, |ddr, out, _pin| {
            out.modify(|r, w| unsafe { w.bits(r.bits() & !m) });
            ddr.modify(|r, w| unsafe { w.bits(r.bits() | m) });
        })
    }

    /// Output, driven high.
    pub fn drive_high(self) {
        let m = self.mask;
        with_port!(self.port, |ddr, out, _pin| {
            out.modify(|r, w| unsafe { w.bits(r.bits() | m) });
            ddr.modify(|r, w| unsafe { w.bits(r.bits() | m) });
        })
    }

    /// Flip an output pin.
    pub fn toggle(self) {
        let m = self.mask;
        with_port!(self.port, |_ddr, out, _pin| {
            out.modify(|r, w| unsafe { w.bits(r.bits() ^ m) });
        })
    }

    pub fn is_low(self) -> bool {
        let m = self.mask;
        with_port!(self.port, |_ddr, _out, pin| pin.read().bits() & m == 0)
    }
}

pub const B0: Pin = Pin::new(Port::B, 0);
pub const B1: Pin = Pin::new(Port::B, 1);
pub const B2: Pin = Pin::new(Port::B, 2);
pub const B3: Pin = Pin::new(Port::B, 3);
pub const B6: Pin = Pin::new(Port::B, 6);
pub const D2: Pin = Pin::new(Port::D, 2);
pub const D3: Pin = Pin::new(Port::D, 3);
pub const D6: Pin = Pin::new(Port::D, 6);
pub const F0: Pin = Pin::new(Port::F, 0);
pub const F1: Pin = Pin::new(Port::F, 1);
pub const F4: Pin = Pin::new(Port::F, 4);
pub const F5: Pin = Pin::new(Port::F, 5);
pub const F6: Pin = Pin::new(Port::F, 6);
pub const F7: Pin = Pin::new(Port::F, 7);
